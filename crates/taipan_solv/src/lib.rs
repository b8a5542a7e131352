//! `taipan_solv` implements the dependency pool and the SAT solver that
//! the taipan resolver driver runs on.
//!
//! The [`Pool`] interns strings and dependencies and holds the
//! repositories of solvables; the [`Solver`] turns a [`SolveJobs`] into
//! a [`Transaction`] or, when the jobs cannot be satisfied, into a
//! [`Problem`] whose graph explains the conflict.

mod assignment;
mod candidate_order;
mod clause;
mod jobs;
mod pool;
mod problem;
mod solvable;
mod solver;
mod transaction;
mod watches;

pub use jobs::SolveJobs;
pub use pool::{Dependency, DependencyId, Pool, Relation, RepoId, RepoPriority, StringId};
pub use problem::{
    Conflict, DisplayUnsat, MergedProblemNode, Problem, ProblemEdge, ProblemGraph, ProblemNode,
};
pub use solvable::{PackageSolvable, SolvableId};
pub use solver::Solver;
pub use transaction::{Transaction, TransactionKind};
