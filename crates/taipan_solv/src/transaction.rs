//! The raw solver solution.

use std::fmt::{Display, Formatter};

use crate::solvable::SolvableId;

/// The solvables the solver decided to install, in decision order.
/// Classifying the steps against the installed prefix (upgrade,
/// downgrade, reinstall) is the resolver driver's job.
pub struct Transaction {
    /// The steps of the solution.
    pub steps: Vec<(SolvableId, TransactionKind)>,
}

/// The kind of a raw solution step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum TransactionKind {
    /// The solvable must be present in the final environment.
    Install,
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
