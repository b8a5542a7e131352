#![deny(missing_docs)]

//! `taipan_solve` drives the dependency resolution: it translates user
//! match specs and the installed prefix into a solver job, runs the
//! solver, and lifts the solution into an ordered transaction plan.

mod conflict;
mod driver;
mod transaction;

pub use conflict::{ConflictEdge, ConflictGraph};
pub use driver::{solve, RepoSource, RequestedOperation, SolverTask};
pub use transaction::{Transaction, TransactionKind, TransactionOperation};

use taipan_conda_types::ParseMatchSpecError;
use thiserror::Error;

/// An error when solving the dependencies of an environment.
#[derive(Debug, Error)]
pub enum SolveError {
    /// There is no set of packages that satisfies the requirements. The
    /// conflict graph explains why.
    #[error("unsolvable: {}", .0.message)]
    Unsolvable(ConflictGraph),

    /// A record in the repodata carries a malformed dependency spec.
    #[error("error adding repodata record: {0}")]
    ErrorAddingRepodata(#[source] ParseMatchSpecError),

    /// One of the requested specs is malformed or unsupported.
    #[error("unsupported spec: {0}")]
    UnsupportedSpec(String),
}
