//! Solvables: the package candidates in the pool.

use std::fmt::{Display, Formatter};

use taipan_conda_types::RepoDataRecord;

use crate::pool::{DependencyId, RepoId, StringId};

/// The id of a solvable in the pool. Stable until the repository that
/// owns the solvable is removed.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
pub struct SolvableId(u32);

impl SolvableId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn root() -> Self {
        Self(0)
    }

    pub(crate) fn is_root(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn null() -> Self {
        Self(u32::MAX)
    }

    pub(crate) fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A concrete package candidate.
pub struct PackageSolvable {
    /// The repository the candidate belongs to.
    pub(crate) repo_id: RepoId,
    /// The interned package name.
    pub(crate) name: StringId,
    /// The record this candidate was created from.
    pub record: RepoDataRecord,
    /// Interned run-time dependencies.
    pub(crate) dependencies: Vec<DependencyId>,
    /// Interned compatibility constraints.
    pub(crate) constrains: Vec<DependencyId>,
}

impl PackageSolvable {
    /// The repository this solvable belongs to.
    pub fn repo_id(&self) -> RepoId {
        self.repo_id
    }

    /// The interned name of the package.
    pub fn name_id(&self) -> StringId {
        self.name
    }

    /// The interned run-time dependencies.
    pub fn dependencies(&self) -> &[DependencyId] {
        &self.dependencies
    }

    /// The interned compatibility constraints.
    pub fn constrains(&self) -> &[DependencyId] {
        &self.constrains
    }
}

pub(crate) struct Solvable {
    pub(crate) inner: SolvableInner,
}

pub(crate) enum SolvableInner {
    /// The virtual root whose dependencies are the user's jobs.
    Root(Vec<DependencyId>),
    /// A package candidate.
    Package(PackageSolvable),
    /// A tombstone left behind when a repository is removed.
    Removed,
}

impl Solvable {
    pub(crate) fn new_root() -> Self {
        Self {
            inner: SolvableInner::Root(Vec::new()),
        }
    }

    pub(crate) fn new_package(package: PackageSolvable) -> Self {
        Self {
            inner: SolvableInner::Package(package),
        }
    }

    pub(crate) fn display(&self) -> SolvableDisplay<'_> {
        match &self.inner {
            SolvableInner::Root(_) => SolvableDisplay {
                name: "root",
                version: None,
                build: None,
            },
            SolvableInner::Removed => SolvableDisplay {
                name: "<removed>",
                version: None,
                build: None,
            },
            SolvableInner::Package(p) => SolvableDisplay {
                name: &p.record.package_record.name,
                version: Some(p.record.package_record.version.to_string()),
                build: Some(&p.record.package_record.build),
            },
        }
    }

    pub(crate) fn root_mut(&mut self) -> &mut Vec<DependencyId> {
        match &mut self.inner {
            SolvableInner::Root(deps) => deps,
            _ => panic!("unexpected package solvable"),
        }
    }

    pub(crate) fn get_package(&self) -> Option<&PackageSolvable> {
        match &self.inner {
            SolvableInner::Package(p) => Some(p),
            _ => None,
        }
    }

    pub(crate) fn package(&self) -> &PackageSolvable {
        self.get_package().expect("unexpected root solvable")
    }
}

pub(crate) struct SolvableDisplay<'a> {
    name: &'a str,
    version: Option<String>,
    build: Option<&'a str>,
}

impl Display for SolvableDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, " {version}")?;
        }
        if let Some(build) = self.build {
            if !build.is_empty() {
                write!(f, " {build}")?;
            }
        }
        Ok(())
    }
}
