//! The pool: an arena that interns strings and dependencies and holds
//! the repositories of solvables over which resolution runs.

use std::{collections::hash_map::Entry, fmt::Display, str::FromStr};

use fxhash::FxHashMap;
use taipan_conda_types::{
    MatchSpec, NamelessMatchSpec, ParseMatchSpecError, RepoDataRecord, StringMatcher, Version,
    VersionSpec,
};

use crate::solvable::{PackageSolvable, Solvable, SolvableId, SolvableInner};

/// The id of a repository within a pool. Ids are dense and reused after
/// a repository is removed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct RepoId(pub(crate) u32);

impl RepoId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The id of an interned string.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The id of an interned dependency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyId(u32);

impl DependencyId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The relation of a simple `(name, relation, version)` dependency.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Relation {
    /// Any version will do; no version part.
    Any,
    Less,
    LessEquals,
    /// Starts-with on the dotted prefix (the `=` operator).
    StartsWith,
    Equals,
    NotEquals,
    GreaterEquals,
    Greater,
    /// Compatible release (the `~=` operator).
    Compatible,
}

impl Relation {
    fn to_version_spec(self, version: &Version) -> VersionSpec {
        use taipan_conda_types::{EqualityOperator, RangeOperator, StrictRangeOperator};
        match self {
            Relation::Any => VersionSpec::Any,
            Relation::Less => VersionSpec::Range(RangeOperator::Less, version.clone()),
            Relation::LessEquals => VersionSpec::Range(RangeOperator::LessEquals, version.clone()),
            Relation::Greater => VersionSpec::Range(RangeOperator::Greater, version.clone()),
            Relation::GreaterEquals => {
                VersionSpec::Range(RangeOperator::GreaterEquals, version.clone())
            }
            Relation::Equals => VersionSpec::Exact(EqualityOperator::Equals, version.clone()),
            Relation::NotEquals => VersionSpec::Exact(EqualityOperator::NotEquals, version.clone()),
            Relation::StartsWith => {
                VersionSpec::StrictRange(StrictRangeOperator::StartsWith, version.clone())
            }
            Relation::Compatible => {
                VersionSpec::StrictRange(StrictRangeOperator::Compatible, version.clone())
            }
        }
    }
}

/// An interned dependency: the name it applies to plus the constraints a
/// providing solvable must satisfy. Boolean compositions live inside the
/// version spec tree.
#[derive(Debug, Clone)]
pub struct Dependency {
    /// The interned name of the required package.
    pub name: StringId,

    /// The constraints beyond the name.
    pub spec: NamelessMatchSpec,

    /// The canonical text form; interning is keyed by this.
    pub canonical: String,
}

/// The priority of a repository: higher tuples are preferred. The first
/// element ranks the channel, the second the subdir within the channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct RepoPriority {
    /// The channel rank.
    pub channel: i32,
    /// The subdir rank within the channel.
    pub subdir: i32,
}

/// A repository of solvables inside the pool.
#[derive(Debug)]
pub(crate) struct Repo {
    pub(crate) name: String,
    pub(crate) priority: RepoPriority,
    /// True for the repository that mirrors the installed prefix.
    pub(crate) system: bool,
    pub(crate) solvables: Vec<SolvableId>,
}

/// An arena holding interned strings and dependencies and the solvables
/// of all loaded repositories.
///
/// The pool is not thread safe for mutation. After the last mutation and
/// a call to [`Pool::rebuild_whatprovides`] it may be shared by
/// reference with concurrent readers.
pub struct Pool {
    pub(crate) solvables: Vec<Solvable>,

    /// Repositories by dense id; `None` marks a removed repository whose
    /// id may be reused.
    pub(crate) repos: Vec<Option<Repo>>,

    /// Interned strings.
    strings_to_ids: FxHashMap<String, StringId>,
    strings: Vec<String>,

    /// Interned dependencies, keyed by their canonical text.
    dependencies_to_ids: FxHashMap<String, DependencyId>,
    pub(crate) dependencies: Vec<Dependency>,

    /// The what-provides index: for every interned name, the solvables
    /// carrying that name, ordered by repository priority and candidate
    /// order. Only valid while `whatprovides_ready` is true.
    pub(crate) packages_by_name: FxHashMap<StringId, Vec<SolvableId>>,
    whatprovides_ready: bool,
}

impl Default for Pool {
    fn default() -> Self {
        Self {
            solvables: vec![Solvable::new_root()],
            repos: Vec::new(),
            strings_to_ids: FxHashMap::default(),
            strings: Vec::new(),
            dependencies_to_ids: FxHashMap::default(),
            dependencies: Vec::new(),
            packages_by_name: FxHashMap::default(),
            whatprovides_ready: false,
        }
    }
}

impl Pool {
    /// Creates a new empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning the same id for equal strings.
    pub fn intern_str<T: Into<String>>(&mut self, str: T) -> StringId {
        let next_id = StringId::new(self.strings.len());
        match self.strings_to_ids.entry(str.into()) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                self.strings.push(e.key().clone());
                e.insert(next_id);
                next_id
            }
        }
    }

    /// Looks up an already-interned string.
    pub fn lookup_str(&self, str: &str) -> Option<StringId> {
        self.strings_to_ids.get(str).copied()
    }

    /// Resolves an interned string id.
    pub fn resolve_string(&self, string_id: StringId) -> &str {
        &self.strings[string_id.index()]
    }

    /// Interns a `(name, relation, version)` dependency. Idempotent: the
    /// same triple always yields the same id.
    pub fn intern_dependency(
        &mut self,
        name: &str,
        relation: Relation,
        version: Option<&Version>,
    ) -> DependencyId {
        let version_spec = match (relation, version) {
            (Relation::Any, _) | (_, None) => None,
            (relation, Some(version)) => Some(relation.to_version_spec(version)),
        };
        let spec = NamelessMatchSpec {
            version: version_spec,
            ..NamelessMatchSpec::default()
        };
        self.intern_dependency_spec(name, spec)
    }

    /// Interns a dependency given by a match spec string, e.g.
    /// `python >=3.8,<3.9`. Composite AND/OR constraints are carried in
    /// the version spec tree.
    pub fn intern_dependency_str(
        &mut self,
        spec_str: &str,
    ) -> Result<DependencyId, ParseMatchSpecError> {
        let spec = MatchSpec::from_str(spec_str)?;
        let name = match &spec.name {
            Some(StringMatcher::Exact(name)) => name.clone(),
            Some(matcher) => matcher.to_string(),
            None => return Err(ParseMatchSpecError::MissingPackageName),
        };
        Ok(self.intern_dependency_spec(&name, spec.into()))
    }

    /// Interns a dependency from its name and constraints.
    pub fn intern_dependency_spec(
        &mut self,
        name: &str,
        spec: NamelessMatchSpec,
    ) -> DependencyId {
        // A bare name reads better than `name *` in solver output.
        let canonical = if spec == NamelessMatchSpec::default() {
            name.to_owned()
        } else {
            format!("{name} {spec}")
        };
        if let Some(&id) = self.dependencies_to_ids.get(&canonical) {
            return id;
        }
        let name_id = self.intern_str(name);
        let id = DependencyId::new(self.dependencies.len());
        self.dependencies_to_ids.insert(canonical.clone(), id);
        self.dependencies.push(Dependency {
            name: name_id,
            spec,
            canonical,
        });
        id
    }

    /// Resolves an interned dependency id.
    pub fn resolve_dependency(&self, id: DependencyId) -> &Dependency {
        &self.dependencies[id.index()]
    }

    /// Adds a repository with the given name and priority. Reuses the id
    /// of a previously removed repository when one is free.
    pub fn add_repo(&mut self, name: impl Into<String>, priority: RepoPriority) -> RepoId {
        self.add_repo_inner(name.into(), priority, false)
    }

    /// Adds the repository that mirrors the installed prefix. Its
    /// solvables represent what is already on disk.
    pub fn add_system_repo(&mut self, name: impl Into<String>) -> RepoId {
        self.add_repo_inner(name.into(), RepoPriority::default(), true)
    }

    fn add_repo_inner(&mut self, name: String, priority: RepoPriority, system: bool) -> RepoId {
        let repo = Repo {
            name,
            priority,
            system,
            solvables: Vec::new(),
        };
        self.whatprovides_ready = false;
        match self.repos.iter_mut().enumerate().find(|(_, r)| r.is_none()) {
            Some((idx, slot)) => {
                *slot = Some(repo);
                RepoId(idx as u32)
            }
            None => {
                self.repos.push(Some(repo));
                RepoId((self.repos.len() - 1) as u32)
            }
        }
    }

    /// Removes a repository and all its solvables. Solvable ids of other
    /// repositories remain stable. When `reuse_ids` is true the
    /// repository id becomes available for a later [`Pool::add_repo`].
    pub fn remove_repo(&mut self, id: RepoId, reuse_ids: bool) {
        let Some(repo) = self.repos[id.index()].take() else {
            return;
        };
        for solvable_id in repo.solvables {
            self.solvables[solvable_id.index()].inner = SolvableInner::Removed;
        }
        if !reuse_ids {
            // Keep the slot occupied with a tombstone so the id is not
            // handed out again.
            self.repos[id.index()] = Some(Repo {
                name: String::new(),
                priority: RepoPriority::default(),
                system: false,
                solvables: Vec::new(),
            });
        }
        self.whatprovides_ready = false;
    }

    /// Returns the priority of a repository.
    pub fn repo_priority(&self, id: RepoId) -> RepoPriority {
        self.repos[id.index()]
            .as_ref()
            .map(|r| r.priority)
            .unwrap_or_default()
    }

    /// Returns true if the repository mirrors the installed prefix.
    pub fn is_system_repo(&self, id: RepoId) -> bool {
        self.repos[id.index()]
            .as_ref()
            .map(|r| r.system)
            .unwrap_or_default()
    }

    /// Adds a solvable for the given record to a repository. The
    /// record's `depends` and `constrains` specs are interned alongside.
    pub fn add_solvable(
        &mut self,
        repo_id: RepoId,
        record: RepoDataRecord,
    ) -> Result<SolvableId, ParseMatchSpecError> {
        assert!(self.solvables.len() <= u32::MAX as usize);
        assert!(
            self.repos[repo_id.index()].is_some(),
            "repository was removed"
        );

        let name = self.intern_str(record.package_record.name.clone());

        let mut dependencies = Vec::with_capacity(record.package_record.depends().len());
        for dep in record.package_record.depends() {
            dependencies.push(self.intern_dependency_str(dep)?);
        }
        let mut constrains = Vec::with_capacity(record.package_record.constrains().len());
        for spec in record.package_record.constrains() {
            constrains.push(self.intern_dependency_str(spec)?);
        }

        let solvable_id = SolvableId::new(self.solvables.len());
        self.solvables.push(Solvable::new_package(PackageSolvable {
            repo_id,
            name,
            record,
            dependencies,
            constrains,
        }));

        self.repos[repo_id.index()]
            .as_mut()
            .expect("checked above")
            .solvables
            .push(solvable_id);
        self.whatprovides_ready = false;

        Ok(solvable_id)
    }

    /// Rebuilds the what-provides index. Must be called after any
    /// repository mutation and before any query; queries panic
    /// otherwise.
    ///
    /// Within a name bucket, solvables from higher-priority repositories
    /// come first; within a repository the candidate order (see
    /// [`crate::candidate_order`]) decides.
    pub fn rebuild_whatprovides(&mut self) {
        self.packages_by_name.clear();
        for solvable_id in (0..self.solvables.len()).map(SolvableId::new) {
            let Some(package) = self.solvables[solvable_id.index()].get_package() else {
                continue;
            };
            self.packages_by_name
                .entry(package.name)
                .or_default()
                .push(solvable_id);
        }

        // Mark ready before sorting: the candidate order runs queries
        // against the index being built (dependency freshness scoring).
        self.whatprovides_ready = true;

        let names: Vec<StringId> = self.packages_by_name.keys().copied().collect();
        for name in names {
            let mut bucket = self.packages_by_name[&name].clone();
            bucket.sort_by(|&a, &b| {
                let repo_a = self.solvables[a.index()].package().repo_id;
                let repo_b = self.solvables[b.index()].package().repo_id;
                self.repo_priority(repo_b)
                    .cmp(&self.repo_priority(repo_a))
                    .then_with(|| crate::candidate_order::compare_candidates(self, a, b))
            });
            self.packages_by_name.insert(name, bucket);
        }
    }

    fn assert_whatprovides_ready(&self) {
        assert!(
            self.whatprovides_ready,
            "rebuild_whatprovides must be called after mutation and before queries"
        );
    }

    /// Calls `f` for every solvable that provides the dependency, in
    /// index order: repository priority first, then candidate order.
    pub fn for_each_whatprovides(&self, dep: DependencyId, mut f: impl FnMut(SolvableId)) {
        self.assert_whatprovides_ready();
        let dependency = &self.dependencies[dep.index()];
        if let Some(bucket) = self.packages_by_name.get(&dependency.name) {
            for &solvable_id in bucket {
                let package = self.solvables[solvable_id.index()].package();
                if dependency.spec.matches(&package.record.package_record) {
                    f(solvable_id);
                }
            }
        }
    }

    /// Collects the solvables that provide the dependency.
    pub fn whatprovides(&self, dep: DependencyId) -> Vec<SolvableId> {
        let mut result = Vec::new();
        self.for_each_whatprovides(dep, |id| result.push(id));
        result
    }

    /// Collects the solvables that carry the dependency's name but
    /// violate its constraints. This is the set a `constrains`
    /// relationship forbids.
    pub fn violators(&self, dep: DependencyId) -> Vec<SolvableId> {
        self.assert_whatprovides_ready();
        let dependency = &self.dependencies[dep.index()];
        let mut result = Vec::new();
        if let Some(bucket) = self.packages_by_name.get(&dependency.name) {
            for &solvable_id in bucket {
                let package = self.solvables[solvable_id.index()].package();
                if !dependency.spec.matches(&package.record.package_record) {
                    result.push(solvable_id);
                }
            }
        }
        result
    }

    /// Selects all solvables matching any of the queued dependencies,
    /// deduplicated, in index order.
    pub fn select_solvables(&self, jobs: &[DependencyId]) -> Vec<SolvableId> {
        self.assert_whatprovides_ready();
        let mut selected = Vec::new();
        for &dep in jobs {
            self.for_each_whatprovides(dep, |id| {
                if !selected.contains(&id) {
                    selected.push(id);
                }
            });
        }
        selected
    }

    /// The total number of solvables in the pool, including the root.
    pub(crate) fn nsolvables(&self) -> u32 {
        self.solvables.len() as u32
    }

    /// Resolves the id to a package solvable.
    ///
    /// Panics if the id refers to the root or a removed solvable.
    pub fn resolve_solvable(&self, id: SolvableId) -> &PackageSolvable {
        self.resolve_solvable_inner(id).package()
    }

    pub(crate) fn resolve_solvable_inner(&self, id: SolvableId) -> &Solvable {
        &self.solvables[id.index()]
    }

    pub(crate) fn root_solvable_mut(&mut self) -> &mut Vec<DependencyId> {
        self.solvables[0].root_mut()
    }

    /// Iterates over all live package solvables.
    pub fn iter_solvables(&self) -> impl Iterator<Item = (SolvableId, &PackageSolvable)> + '_ {
        self.solvables
            .iter()
            .enumerate()
            .filter_map(|(idx, solvable)| {
                solvable
                    .get_package()
                    .map(|package| (SolvableId::new(idx), package))
            })
    }
}

impl Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "pool with {} solvables in {} repos",
            self.solvables.len() - 1,
            self.repos.iter().flatten().count()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use taipan_conda_types::{PackageRecord, RepoDataRecord, Version};

    use super::{Pool, Relation, RepoPriority};

    fn record(name: &str, version: &str, depends: &[&str]) -> RepoDataRecord {
        let mut package_record =
            PackageRecord::new(name, Version::from_str(version).unwrap(), "0");
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
    fn string_interning_is_idempotent() {
        let mut pool = Pool::new();
        let a = pool.intern_str("python");
        let b = pool.intern_str("python");
        let c = pool.intern_str("zlib");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.resolve_string(a), "python");
    }

    #[test]
    fn dependency_interning_is_idempotent() {
        let mut pool = Pool::new();
        let version = Version::from_str("3.8").unwrap();
        let a = pool.intern_dependency("python", Relation::GreaterEquals, Some(&version));
        let b = pool.intern_dependency("python", Relation::GreaterEquals, Some(&version));
        let c = pool.intern_dependency("python", Relation::Less, Some(&version));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.resolve_dependency(a).canonical, "python >=3.8");
    }

    #[test]
    fn whatprovides_enumerates_matching_solvables() {
        let mut pool = Pool::new();
        let repo = pool.add_repo("test", RepoPriority::default());
        pool.add_solvable(repo, record("a", "1.0", &[])).unwrap();
        pool.add_solvable(repo, record("a", "2.0", &[])).unwrap();
        pool.add_solvable(repo, record("b", "1.0", &[])).unwrap();
        pool.rebuild_whatprovides();

        let dep = pool.intern_dependency_str("a >=1.5").unwrap();
        let provides = pool.whatprovides(dep);
        assert_eq!(provides.len(), 1);
        assert_eq!(
            pool.resolve_solvable(provides[0])
                .record
                .package_record
                .version,
            Version::from_str("2.0").unwrap()
        );

        // Within a repository, higher versions come first.
        let any = pool.intern_dependency("a", Relation::Any, None);
        let all = pool.whatprovides(any);
        assert_eq!(all.len(), 2);
        assert_eq!(
            pool.resolve_solvable(all[0])
                .record
                .package_record
                .version,
            Version::from_str("2.0").unwrap()
        );
    }

    #[test]
    fn repo_priority_orders_candidates() {
        let mut pool = Pool::new();
        let low = pool.add_repo("low", RepoPriority { channel: 1, subdir: 0 });
        let high = pool.add_repo("high", RepoPriority { channel: 2, subdir: 0 });
        // The low-priority repo has the higher version.
        pool.add_solvable(low, record("a", "2.0", &[])).unwrap();
        let preferred = pool.add_solvable(high, record("a", "1.0", &[])).unwrap();
        pool.rebuild_whatprovides();

        let any = pool.intern_dependency("a", Relation::Any, None);
        assert_eq!(pool.whatprovides(any)[0], preferred);
    }

    #[test]
    fn removed_repo_solvables_disappear() {
        let mut pool = Pool::new();
        let keep = pool.add_repo("keep", RepoPriority::default());
        let dropped = pool.add_repo("drop", RepoPriority::default());
        let kept = pool.add_solvable(keep, record("a", "1.0", &[])).unwrap();
        pool.add_solvable(dropped, record("a", "2.0", &[])).unwrap();
        pool.remove_repo(dropped, true);
        pool.rebuild_whatprovides();

        let any = pool.intern_dependency("a", Relation::Any, None);
        assert_eq!(pool.whatprovides(any), vec![kept]);

        // The freed id is reused.
        let reused = pool.add_repo("new", RepoPriority::default());
        assert_eq!(reused, dropped);
    }

    #[test]
    #[should_panic(expected = "rebuild_whatprovides")]
    fn queries_require_rebuild() {
        let mut pool = Pool::new();
        let repo = pool.add_repo("test", RepoPriority::default());
        pool.add_solvable(repo, record("a", "1.0", &[])).unwrap();
        let dep = pool.intern_dependency("a", Relation::Any, None);
        let _ = pool.whatprovides(dep);
    }
}
