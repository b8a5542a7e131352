//! Translating user requests into solver jobs and lifting the solution
//! back out.

use fxhash::{FxHashMap, FxHashSet};
use taipan_conda_types::{MatchSpec, NamelessMatchSpec, RepoDataRecord, StringMatcher};
use taipan_solv::{Pool, RepoPriority, SolveJobs, SolvableId, Solver};
use tracing::debug;

use crate::{conflict::ConflictGraph, transaction::Transaction, SolveError};

/// The records of one `channel × subdir` repository, with its priority.
#[derive(Debug, Clone)]
pub struct RepoSource {
    /// A display name, e.g. `conda-forge/linux-64`.
    pub name: String,
    /// The priority tuple: higher tuples win.
    pub priority: RepoPriority,
    /// The records of the repository.
    pub records: Vec<RepoDataRecord>,
}

/// One user request.
#[derive(Debug, Clone)]
pub enum RequestedOperation {
    /// Install something matching the spec.
    Install(MatchSpec),
    /// Update the installed package matching the spec.
    Update(MatchSpec),
    /// Update everything that is installed.
    UpdateAll,
    /// Remove the installed package matching the spec.
    Remove {
        /// The spec selecting what to remove.
        spec: MatchSpec,
        /// Also drop dependencies that nothing else needs.
        prune: bool,
    },
}

/// Everything the resolver needs to compute a transaction.
#[derive(Debug, Default)]
pub struct SolverTask {
    /// The available repositories.
    pub repos: Vec<RepoSource>,
    /// The records installed in the prefix.
    pub installed: Vec<RepoDataRecord>,
    /// The requested operations.
    pub operations: Vec<RequestedOperation>,
    /// When false, packages named in the request may not move to a
    /// lower version than the installed one.
    pub allow_downgrade: bool,
    /// When true, installed packages are pinned instead of just
    /// favored.
    pub freeze_installed: bool,
    /// When true, a name provided by a higher-priority channel is never
    /// taken from a lower-priority one.
    pub strict_channel_priority: bool,
}

impl SolverTask {
    /// Creates a task with the default flags: downgrades allowed,
    /// nothing frozen, flexible channel priority.
    pub fn new(repos: Vec<RepoSource>, installed: Vec<RepoDataRecord>) -> Self {
        Self {
            repos,
            installed,
            operations: Vec::new(),
            allow_downgrade: true,
            freeze_installed: false,
            strict_channel_priority: false,
        }
    }
}

/// The name a spec applies to. Globs are not valid in request position.
fn spec_name(spec: &MatchSpec) -> Result<String, SolveError> {
    match &spec.name {
        Some(StringMatcher::Exact(name)) => Ok(name.clone()),
        _ => Err(SolveError::UnsupportedSpec(format!(
            "a request must name a concrete package: {spec}"
        ))),
    }
}

/// Resolves the task into an ordered transaction.
pub fn solve(task: SolverTask) -> Result<Transaction, SolveError> {
    let mut pool = Pool::new();

    // The installed prefix is the "system" repository.
    let system_repo = pool.add_system_repo("installed");
    let mut installed_by_name: FxHashMap<String, SolvableId> = FxHashMap::default();
    for record in &task.installed {
        let solvable = pool
            .add_solvable(system_repo, record.clone())
            .map_err(SolveError::ErrorAddingRepodata)?;
        installed_by_name.insert(record.package_record.name.clone(), solvable);
    }

    // One repository per channel × subdir, tagged with its priority.
    // Track which channel solvables carry which name for the priority
    // and policy passes below.
    let mut channel_solvables: FxHashMap<String, Vec<SolvableId>> = FxHashMap::default();
    for source in &task.repos {
        let repo = pool.add_repo(source.name.clone(), source.priority);
        for record in &source.records {
            let solvable = pool
                .add_solvable(repo, record.clone())
                .map_err(SolveError::ErrorAddingRepodata)?;
            channel_solvables
                .entry(record.package_record.name.clone())
                .or_default()
                .push(solvable);
        }
    }

    // Classify the request.
    let mut install_specs: Vec<(String, MatchSpec)> = Vec::new();
    let mut update_names: FxHashSet<String> = FxHashSet::default();
    let mut removed_names: FxHashSet<String> = FxHashSet::default();
    let mut remove_specs: Vec<MatchSpec> = Vec::new();
    let mut prune = false;
    let mut update_all = false;
    for operation in &task.operations {
        match operation {
            RequestedOperation::Install(spec) => {
                install_specs.push((spec_name(spec)?, spec.clone()));
            }
            RequestedOperation::Update(spec) => {
                let name = spec_name(spec)?;
                update_names.insert(name.clone());
                install_specs.push((name, spec.clone()));
            }
            RequestedOperation::UpdateAll => update_all = true,
            RequestedOperation::Remove { spec, prune: p } => {
                removed_names.insert(spec_name(spec)?);
                remove_specs.push(spec.clone());
                prune |= p;
            }
        }
    }

    let pruned_names = if prune {
        pruned_dependencies(&task.installed, &removed_names, &install_specs)
    } else {
        FxHashSet::default()
    };

    let mut jobs = SolveJobs::default();

    // Explicit requests.
    for (name, spec) in &install_specs {
        let dep = pool.intern_dependency_spec(name, NamelessMatchSpec::from(spec.clone()));
        jobs.install(dep);
    }

    // Erase requests: exclude everything that matches, installed or
    // not.
    for spec in &remove_specs {
        let name = spec_name(spec)?;
        for &solvable in installed_by_name
            .get(&name)
            .into_iter()
            .chain(channel_solvables.get(&name).into_iter().flatten())
        {
            if spec.matches(&pool.resolve_solvable(solvable).record.package_record) {
                jobs.forbid(solvable);
            }
        }
    }

    // Keep-installed jobs: everything installed stays part of the
    // problem unless it is being removed or pruned.
    for record in &task.installed {
        let name = &record.package_record.name;
        if removed_names.contains(name) || pruned_names.contains(name) {
            continue;
        }

        let dep = pool.intern_dependency_spec(name, NamelessMatchSpec::default());
        jobs.install(dep);

        let solvable = installed_by_name[name];
        let updating = update_all || update_names.contains(name);
        if task.freeze_installed && !updating {
            jobs.lock(solvable);
        } else if !updating {
            jobs.favor(solvable);
        }
    }

    // Forbidden downgrades: a requested name may not fall below its
    // installed version.
    if !task.allow_downgrade {
        for (name, _) in &install_specs {
            let Some(&installed_solvable) = installed_by_name.get(name) else {
                continue;
            };
            let installed_version = pool
                .resolve_solvable(installed_solvable)
                .record
                .package_record
                .version
                .clone();
            for &candidate in channel_solvables.get(name).into_iter().flatten() {
                if pool
                    .resolve_solvable(candidate)
                    .record
                    .package_record
                    .version
                    < installed_version
                {
                    debug!(
                        "forbidding downgrade candidate {}",
                        pool.resolve_solvable(candidate).record.package_record
                    );
                    jobs.forbid(candidate);
                }
            }
        }
    }

    // Strict channel priority: when any higher-ranked repository
    // provides a name, candidates from lower-ranked repositories are
    // refused outright.
    if task.strict_channel_priority {
        for solvables in channel_solvables.values() {
            let best_priority = solvables
                .iter()
                .map(|&s| pool.repo_priority(pool.resolve_solvable(s).repo_id()).channel)
                .max()
                .expect("the name has at least one candidate");
            for &solvable in solvables {
                if pool.repo_priority(pool.resolve_solvable(solvable).repo_id()).channel
                    < best_priority
                {
                    jobs.forbid(solvable);
                }
            }
        }
    }

    pool.rebuild_whatprovides();

    let mut solver = Solver::new(pool);
    match solver.solve(jobs) {
        Ok(solution) => {
            let solution_records: Vec<RepoDataRecord> = solution
                .steps
                .iter()
                .map(|&(solvable, _)| solver.pool().resolve_solvable(solvable).record.clone())
                .collect();
            Ok(Transaction::from_solution(solution_records, &task.installed))
        }
        Err(problem) => {
            let message = problem.display_user_friendly(&solver).to_string();
            let graph = problem.graph(&solver);
            Err(SolveError::Unsolvable(ConflictGraph::from_problem_graph(
                &graph, &solver, message,
            )))
        }
    }
}

/// Best-effort CLEANDEPS: the names transitively required by the
/// removed packages that no kept installed package and no request
/// needs.
fn pruned_dependencies(
    installed: &[RepoDataRecord],
    removed_names: &FxHashSet<String>,
    install_specs: &[(String, MatchSpec)],
) -> FxHashSet<String> {
    let dependencies_of: FxHashMap<&str, Vec<String>> = installed
        .iter()
        .map(|record| {
            (
                record.package_record.name.as_str(),
                record
                    .package_record
                    .depends()
                    .iter()
                    .map(|spec| {
                        spec.split(|c: char| {
                            c.is_whitespace() || matches!(c, '=' | '<' | '>' | '!' | '~' | '[')
                        })
                        .next()
                        .unwrap_or(spec)
                        .to_owned()
                    })
                    .collect(),
            )
        })
        .collect();

    // Everything reachable from the removed packages.
    let mut candidates: FxHashSet<String> = FxHashSet::default();
    let mut stack: Vec<&str> = removed_names.iter().map(String::as_str).collect();
    while let Some(name) = stack.pop() {
        for dep in dependencies_of.get(name).into_iter().flatten() {
            if !removed_names.contains(dep) && candidates.insert(dep.clone()) {
                stack.push(dep);
            }
        }
    }

    // Iteratively un-prune anything a kept package or a request still
    // needs.
    loop {
        let needed: Vec<String> = candidates
            .iter()
            .filter(|candidate| {
                install_specs.iter().any(|(name, _)| name == *candidate)
                    || installed.iter().any(|record| {
                        let name = record.package_record.name.as_str();
                        let kept =
                            !removed_names.contains(name) && !candidates.contains(name);
                        kept && dependencies_of[name].iter().any(|dep| dep == *candidate)
                    })
            })
            .cloned()
            .collect();
        if needed.is_empty() {
            break;
        }
        for name in needed {
            candidates.remove(&name);
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use taipan_conda_types::{MatchSpec, PackageRecord, RepoDataRecord, Version};
    use taipan_solv::RepoPriority;

    use super::{solve, RepoSource, RequestedOperation, SolverTask};
    use crate::{SolveError, TransactionKind};

    fn record(name: &str, version: &str, build: &str, depends: &[&str]) -> RepoDataRecord {
        let mut package_record =
            PackageRecord::new(name, Version::from_str(version).unwrap(), build);
        package_record.depends = Some(depends.iter().map(|s| (*s).to_owned()).collect());
        package_record.subdir = "linux-64".to_owned();
        RepoDataRecord {
            url: format!("https://repo.example.com/pkgs/{name}-{version}-{build}.conda")
                .parse()
                .unwrap(),
            channel: "test".to_owned(),
            file_name: format!("{name}-{version}-{build}.conda"),
            package_record,
        }
    }

    fn repo(name: &str, channel_priority: i32, records: Vec<RepoDataRecord>) -> RepoSource {
        RepoSource {
            name: name.to_owned(),
            priority: RepoPriority {
                channel: channel_priority,
                subdir: 0,
            },
            records,
        }
    }

    fn install(spec: &str) -> RequestedOperation {
        RequestedOperation::Install(MatchSpec::from_str(spec).unwrap())
    }

    #[test]
    fn simple_install() {
        // E1: a depends on b; installing a installs b first.
        let mut task = SolverTask::new(
            vec![repo(
                "test",
                1,
                vec![record("a", "1.0", "0", &["b"]), record("b", "2.0", "0", &[])],
            )],
            vec![],
        );
        task.operations.push(install("a"));

        let transaction = solve(task).unwrap();
        let steps: Vec<(&str, TransactionKind)> = transaction
            .operations
            .iter()
            .map(|op| (op.record.package_record.name.as_str(), op.kind))
            .collect();
        assert_eq!(
            steps,
            [
                ("b", TransactionKind::Install),
                ("a", TransactionKind::Install)
            ]
        );
    }

    #[test]
    fn downgrade_forbidden() {
        // E2: installed a-2.0; requesting a=1.0 with downgrades
        // disallowed is unsolvable.
        let mut task = SolverTask::new(
            vec![repo(
                "test",
                1,
                vec![record("a", "1.0", "0", &[]), record("a", "2.0", "0", &[])],
            )],
            vec![record("a", "2.0", "0", &[])],
        );
        task.allow_downgrade = false;
        task.operations.push(install("a=1.0"));

        let error = solve(task).unwrap_err();
        assert!(matches!(error, SolveError::Unsolvable(_)), "{error}");
    }

    #[test]
    fn downgrade_allowed_when_requested() {
        let mut task = SolverTask::new(
            vec![repo(
                "test",
                1,
                vec![record("a", "1.0", "0", &[]), record("a", "2.0", "0", &[])],
            )],
            vec![record("a", "2.0", "0", &[])],
        );
        task.operations.push(install("a=1.0"));

        let transaction = solve(task).unwrap();
        assert_eq!(transaction.operations.len(), 1);
        assert_eq!(transaction.operations[0].kind, TransactionKind::Downgrade);
    }

    #[test]
    fn update_all() {
        // E3: everything moves to the newest available version.
        let mut task = SolverTask::new(
            vec![repo(
                "test",
                1,
                vec![
                    record("a", "1.1", "0", &[]),
                    record("b", "1.1", "0", &[]),
                    record("a", "1.0", "0", &[]),
                    record("b", "1.0", "0", &[]),
                ],
            )],
            vec![
                record("a", "1.0", "0", &[]),
                record("b", "1.0", "0", &[]),
            ],
        );
        task.operations.push(RequestedOperation::UpdateAll);

        let transaction = solve(task).unwrap();
        let mut upgraded: Vec<&str> = transaction
            .operations
            .iter()
            .filter(|op| op.kind == TransactionKind::Upgrade)
            .map(|op| op.record.package_record.name.as_str())
            .collect();
        upgraded.sort_unstable();
        assert_eq!(upgraded, ["a", "b"]);
    }

    #[test]
    fn installed_packages_are_kept_at_their_version() {
        // Without an update request the installed version is favored
        // even though a newer one exists.
        let mut task = SolverTask::new(
            vec![repo(
                "test",
                1,
                vec![record("a", "2.0", "0", &[]), record("a", "1.0", "0", &[])],
            )],
            vec![record("a", "1.0", "0", &[])],
        );
        task.operations.push(install("b"));
        task.repos[0].records.push(record("b", "1.0", "0", &[]));

        let transaction = solve(task).unwrap();
        let steps: Vec<(&str, TransactionKind)> = transaction
            .operations
            .iter()
            .map(|op| (op.record.package_record.name.as_str(), op.kind))
            .collect();
        assert_eq!(steps, [("b", TransactionKind::Install)]);
    }

    #[test]
    fn strict_channel_priority() {
        // E4: with strict priority the higher-ranked channel wins even
        // though the lower-ranked one has a newer version.
        let mut task = SolverTask::new(
            vec![
                repo("high", 2, vec![record("a", "1.0", "0", &[])]),
                repo("low", 1, vec![record("a", "2.0", "0", &[])]),
            ],
            vec![],
        );
        task.strict_channel_priority = true;
        task.operations.push(install("a"));

        let transaction = solve(task).unwrap();
        assert_eq!(transaction.operations.len(), 1);
        assert_eq!(
            transaction.operations[0].record.package_record.version,
            Version::from_str("1.0").unwrap()
        );
    }

    #[test]
    fn solution_satisfies_every_request() {
        // Property: every requested spec is satisfied by exactly one
        // package of the solution, and every dependency is satisfied
        // within the solution.
        let mut task = SolverTask::new(
            vec![repo(
                "test",
                1,
                vec![
                    record("app", "1.0", "0", &["lib >=1,<2", "runtime"]),
                    record("lib", "1.5", "0", &["runtime"]),
                    record("lib", "2.0", "0", &["runtime"]),
                    record("runtime", "3.0", "0", &[]),
                ],
            )],
            vec![],
        );
        task.operations.push(install("app"));
        task.operations.push(install("lib <2"));

        let transaction = solve(task).unwrap();
        let solution: Vec<_> = transaction
            .operations
            .iter()
            .map(|op| op.record.clone())
            .collect();

        for spec in ["app", "lib <2"] {
            let spec = MatchSpec::from_str(spec).unwrap();
            let matching = solution
                .iter()
                .filter(|record| spec.matches(&record.package_record))
                .count();
            assert_eq!(matching, 1, "{spec} matched {matching} packages");
        }

        for record in &solution {
            for dep in record.package_record.depends() {
                let dep = MatchSpec::from_str(dep).unwrap();
                assert!(
                    solution
                        .iter()
                        .any(|candidate| dep.matches(&candidate.package_record)),
                    "dependency {dep} is not satisfied"
                );
            }
        }
    }

    #[test]
    fn conflict_graph_shape() {
        // Property: the unsolvable explanation contains both
        // conflicting requirement chains and marks the contested
        // package as the conflict node.
        let mut task = SolverTask::new(
            vec![repo(
                "test",
                1,
                vec![
                    record("a", "1.0", "0", &["b ==1"]),
                    record("c", "1.0", "0", &["b ==2"]),
                    record("b", "1.0", "0", &[]),
                    record("b", "2.0", "0", &[]),
                ],
            )],
            vec![],
        );
        task.operations.push(install("a"));
        task.operations.push(install("c"));

        let SolveError::Unsolvable(graph) = solve(task).unwrap_err() else {
            panic!("expected an unsolvable error");
        };

        assert!(graph.has_requirement_edge(Some("a"), "b ==1"), "{graph:?}");
        assert!(graph.has_requirement_edge(Some("c"), "b ==2"), "{graph:?}");
        assert!(graph.conflicts.contains(&"b".to_owned()), "{graph:?}");
    }

    #[test]
    fn remove_and_prune() {
        let mut task = SolverTask::new(
            vec![repo("test", 1, vec![])],
            vec![
                record("app", "1.0", "0", &["helper"]),
                record("helper", "1.0", "0", &[]),
                record("other", "1.0", "0", &[]),
            ],
        );
        task.operations.push(RequestedOperation::Remove {
            spec: MatchSpec::from_str("app").unwrap(),
            prune: true,
        });

        let transaction = solve(task).unwrap();
        let mut removed: Vec<&str> = transaction
            .operations
            .iter()
            .filter(|op| op.kind == TransactionKind::Remove)
            .map(|op| op.record.package_record.name.as_str())
            .collect();
        removed.sort_unstable();
        assert_eq!(removed, ["app", "helper"]);
    }

    #[test]
    fn freeze_installed_pins_versions() {
        let mut task = SolverTask::new(
            vec![repo(
                "test",
                1,
                vec![
                    record("a", "2.0", "0", &[]),
                    record("a", "1.0", "0", &[]),
                    record("b", "1.0", "0", &["a >=2"]),
                ],
            )],
            vec![record("a", "1.0", "0", &[])],
        );
        task.freeze_installed = true;
        task.operations.push(install("b"));

        // b requires a >= 2, but a is frozen at 1.0.
        let error = solve(task).unwrap_err();
        assert!(matches!(error, SolveError::Unsolvable(_)), "{error}");
    }
}
