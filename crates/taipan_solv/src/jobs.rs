//! The jobs handed to the solver.

use crate::{pool::DependencyId, solvable::SolvableId};

/// What the solver should accomplish.
#[derive(Default)]
pub struct SolveJobs {
    pub(crate) install: Vec<DependencyId>,
    pub(crate) favor: Vec<SolvableId>,
    pub(crate) lock: Vec<SolvableId>,
    pub(crate) forbid: Vec<SolvableId>,
}

impl SolveJobs {
    /// A candidate matching the dependency must be installed.
    pub fn install(&mut self, dep: DependencyId) {
        self.install.push(dep);
    }

    /// Favor this solvable over other candidates of the same name. A
    /// favored solvable is tried first but can still lose to the
    /// requirements; use [`SolveJobs::lock`] to pin it.
    pub fn favor(&mut self, id: SolvableId) {
        self.favor.push(id);
    }

    /// Lock the solvable: no other candidate of the same name will be
    /// considered.
    pub fn lock(&mut self, id: SolvableId) {
        self.lock.push(id);
    }

    /// Exclude the solvable from the solution entirely. Used for erase
    /// requests, forbidden downgrades and strict channel priority.
    pub fn forbid(&mut self, id: SolvableId) {
        self.forbid.push(id);
    }
}
