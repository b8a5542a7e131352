//! Classifying the solver's solution against the installed prefix into
//! an ordered transaction plan.

use fxhash::FxHashMap;
use taipan_conda_types::{sort_topologically, RepoDataRecord};

/// The operation to perform for a single package.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransactionKind {
    /// The package is new in the environment.
    Install,
    /// The package leaves the environment.
    Remove,
    /// The same version and build is installed again (the artifact
    /// changed).
    Reinstall,
    /// The package moves to a higher version.
    Upgrade,
    /// The package moves to a lower version.
    Downgrade,
}

/// One step of a transaction.
#[derive(Debug, Clone)]
pub struct TransactionOperation {
    /// What to do.
    pub kind: TransactionKind,
    /// The record the operation applies to. For `Upgrade`, `Downgrade`
    /// and `Reinstall` this is the new record.
    pub record: RepoDataRecord,
    /// For `Upgrade`, `Downgrade` and `Reinstall`: the installed record
    /// that is replaced.
    pub replaces: Option<RepoDataRecord>,
}

/// An ordered sequence of operations that moves a prefix from one
/// consistent state to another: removals first, then installs in
/// topological order so every package's run-time dependencies precede
/// it.
#[derive(Debug, Default)]
pub struct Transaction {
    /// The operations, in execution order.
    pub operations: Vec<TransactionOperation>,
}

impl Transaction {
    /// Classifies a solution (the set of records that make up the
    /// target environment) against the installed records.
    pub(crate) fn from_solution(
        solution: Vec<RepoDataRecord>,
        installed: &[RepoDataRecord],
    ) -> Self {
        let installed_by_name: FxHashMap<&str, &RepoDataRecord> = installed
            .iter()
            .map(|record| (record.package_record.name.as_str(), record))
            .collect();

        // Removals: installed packages whose name does not occur in the
        // solution at all.
        let mut operations: Vec<TransactionOperation> = installed
            .iter()
            .filter(|record| {
                !solution
                    .iter()
                    .any(|chosen| chosen.package_record.name == record.package_record.name)
            })
            .map(|record| TransactionOperation {
                kind: TransactionKind::Remove,
                record: record.clone(),
                replaces: None,
            })
            .collect();

        // Installs and replacements, dependencies before dependents.
        for record in sort_topologically(solution) {
            let name = record.package_record.name.as_str();
            let operation = match installed_by_name.get(name) {
                None => TransactionOperation {
                    kind: TransactionKind::Install,
                    record,
                    replaces: None,
                },
                Some(&previous) => {
                    let new = &record.package_record;
                    let old = &previous.package_record;
                    let kind = if new.version > old.version {
                        TransactionKind::Upgrade
                    } else if new.version < old.version {
                        TransactionKind::Downgrade
                    } else if new.build != old.build || new.build_number != old.build_number {
                        TransactionKind::Reinstall
                    } else if new.sha256.is_some() && old.sha256.is_some() && new.sha256 != old.sha256
                    {
                        // Same version and build but the artifact
                        // changed underneath.
                        TransactionKind::Reinstall
                    } else {
                        // Unchanged; nothing to do.
                        continue;
                    };
                    TransactionOperation {
                        kind,
                        record,
                        replaces: Some(previous.clone()),
                    }
                }
            };
            operations.push(operation);
        }

        Self { operations }
    }

    /// Returns true when the transaction has nothing to do.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use taipan_conda_types::{PackageRecord, RepoDataRecord, Version};

    use super::{Transaction, TransactionKind};

    fn record(name: &str, version: &str, depends: &[&str]) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(name, Version::from_str(version).unwrap(), "0");
        package_record.depends = Some(depends.iter().map(|s| (*s).to_owned()).collect());
        RepoDataRecord {
            url: format!("https://repo.example.com/pkgs/{name}-{version}-0.conda")
                .parse()
                .unwrap(),
            channel: "test".to_owned(),
            file_name: format!("{name}-{version}-0.conda"),
            package_record,
        }
    }

    #[test]
    fn classification() {
        let installed = vec![record("kept", "1.0", &[]), record("upgraded", "1.0", &[]), record("dropped", "1.0", &[])];
        let solution = vec![
            record("kept", "1.0", &[]),
            record("upgraded", "2.0", &[]),
            record("fresh", "1.0", &[]),
        ];

        let transaction = Transaction::from_solution(solution, &installed);
        let kinds: Vec<(&str, TransactionKind)> = transaction
            .operations
            .iter()
            .map(|op| (op.record.package_record.name.as_str(), op.kind))
            .collect();

        assert!(kinds.contains(&("dropped", TransactionKind::Remove)));
        assert!(kinds.contains(&("upgraded", TransactionKind::Upgrade)));
        assert!(kinds.contains(&("fresh", TransactionKind::Install)));
        assert!(!kinds.iter().any(|(name, _)| *name == "kept"));

        // Removals come first.
        assert_eq!(kinds[0].0, "dropped");
    }

    #[test]
    fn downgrade_and_reinstall() {
        let installed = vec![record("down", "2.0", &[]), record("rebuilt", "1.0", &[])];
        let mut rebuilt = record("rebuilt", "1.0", &[]);
        rebuilt.package_record.build = "1".to_owned();
        rebuilt.package_record.build_number = 1;

        let transaction =
            Transaction::from_solution(vec![record("down", "1.0", &[]), rebuilt], &installed);
        let kinds: Vec<(&str, TransactionKind)> = transaction
            .operations
            .iter()
            .map(|op| (op.record.package_record.name.as_str(), op.kind))
            .collect();
        assert!(kinds.contains(&("down", TransactionKind::Downgrade)));
        assert!(kinds.contains(&("rebuilt", TransactionKind::Reinstall)));
    }

    #[test]
    fn installs_follow_dependency_order() {
        let transaction = Transaction::from_solution(
            vec![
                record("app", "1.0", &["lib", "runtime"]),
                record("lib", "1.0", &["runtime"]),
                record("runtime", "1.0", &[]),
            ],
            &[],
        );
        let names: Vec<&str> = transaction
            .operations
            .iter()
            .map(|op| op.record.package_record.name.as_str())
            .collect();
        assert_eq!(names, ["runtime", "lib", "app"]);
    }
}
