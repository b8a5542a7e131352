//! Deterministic topological sorting of package records.

use std::collections::BTreeMap;

use fxhash::FxHashSet;

use super::PackageRecord;

/// Sorts the records so that every record's run-time dependencies come
/// before the record itself.
///
/// The result is deterministic: it does not depend on the order of
/// `records` or of the `depends` vectors. Dependency cycles are allowed;
/// the back edge that closes a cycle is simply ignored. Only works for
/// records with unique names.
pub fn sort_topologically<T: AsRef<PackageRecord>>(records: Vec<T>) -> Vec<T> {
    let by_name: BTreeMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| (record.as_ref().name.clone(), idx))
        .collect();

    let mut order = Vec::with_capacity(records.len());
    let mut visited = FxHashSet::default();
    let mut in_progress = FxHashSet::default();

    fn visit(
        name: &str,
        records: &[impl AsRef<PackageRecord>],
        by_name: &BTreeMap<String, usize>,
        visited: &mut FxHashSet<usize>,
        in_progress: &mut FxHashSet<usize>,
        order: &mut Vec<usize>,
    ) {
        let Some(&idx) = by_name.get(name) else {
            return;
        };
        if visited.contains(&idx) || !in_progress.insert(idx) {
            // Either done already or a cycle; both are fine to skip.
            return;
        }

        let mut dependency_names: Vec<&str> = records[idx]
            .as_ref()
            .depends()
            .iter()
            .map(|spec| spec_name(spec))
            .collect();
        dependency_names.sort_unstable();
        for dependency in dependency_names {
            visit(dependency, records, by_name, visited, in_progress, order);
        }

        in_progress.remove(&idx);
        visited.insert(idx);
        order.push(idx);
    }

    for name in by_name.keys() {
        visit(
            name,
            &records,
            &by_name,
            &mut visited,
            &mut in_progress,
            &mut order,
        );
    }

    // Reorder the owned records according to the computed order.
    let mut slots: Vec<Option<T>> = records.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|idx| slots[idx].take().expect("every index appears exactly once"))
        .collect()
}

/// Extracts the package name from a dependency spec string.
fn spec_name(spec: &str) -> &str {
    spec.split(|c: char| c.is_whitespace() || matches!(c, '=' | '<' | '>' | '!' | '~' | '['))
        .next()
        .unwrap_or(spec)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::sort_topologically;
    use crate::{PackageRecord, Version};

    fn record(name: &str, depends: &[&str]) -> PackageRecord {
        let mut record = PackageRecord::new(name, Version::from_str("1.0").unwrap(), "0");
        record.depends = Some(depends.iter().map(|s| (*s).to_owned()).collect());
        record
    }

    fn names(records: &[PackageRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn dependencies_come_first() {
        let sorted = sort_topologically(vec![
            record("a", &["b >=2", "c"]),
            record("b", &["c"]),
            record("c", &[]),
        ]);
        assert_eq!(names(&sorted), ["c", "b", "a"]);
    }

    #[test]
    fn deterministic_regardless_of_input_order() {
        let forward = sort_topologically(vec![
            record("a", &["b"]),
            record("b", &[]),
            record("d", &[]),
            record("c", &["d"]),
        ]);
        let backward = sort_topologically(vec![
            record("c", &["d"]),
            record("d", &[]),
            record("b", &[]),
            record("a", &["b"]),
        ]);
        assert_eq!(names(&forward), names(&backward));
    }

    #[test]
    fn cycles_do_not_loop() {
        let sorted = sort_topologically(vec![
            record("a", &["b"]),
            record("b", &["a"]),
            record("c", &[]),
        ]);
        assert_eq!(sorted.len(), 3);
        // `b` is visited through `a`'s dependency edge before `a` itself
        // is emitted; the `b -> a` back edge is ignored.
        assert_eq!(names(&sorted), ["b", "a", "c"]);
    }

    #[test]
    fn missing_dependencies_are_ignored() {
        let sorted = sort_topologically(vec![record("a", &["not-in-the-set"])]);
        assert_eq!(names(&sorted), ["a"]);
    }
}
