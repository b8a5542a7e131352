//! The watch table: for every solvable, the clauses watching it.
//!
//! Each solvable owns the vector of clauses that currently watch it;
//! moving a watch means moving the clause id from one vector to
//! another. Propagation takes a solvable's whole list out of the table,
//! decides per clause whether it keeps watching, and puts the keepers
//! back.

use crate::{clause::Clause, solvable::SolvableId, solver::ClauseId};

pub(crate) struct WatchTable {
    watchers: Vec<Vec<ClauseId>>,
}

impl WatchTable {
    pub(crate) fn new() -> Self {
        Self {
            watchers: Vec::new(),
        }
    }

    pub(crate) fn initialize(&mut self, nsolvables: usize) {
        self.watchers = vec![Vec::new(); nsolvables];
    }

    /// Registers a clause with both solvables it watches.
    pub(crate) fn watch_clause(&mut self, clause: &Clause, clause_id: ClauseId) {
        for watched in clause.watched_literals {
            self.watchers[watched.index()].push(clause_id);
        }
    }

    /// Takes the watcher list of a solvable out of the table. The
    /// caller returns the entries that keep watching through
    /// [`WatchTable::put_back`].
    pub(crate) fn take(&mut self, solvable_id: SolvableId) -> Vec<ClauseId> {
        std::mem::take(&mut self.watchers[solvable_id.index()])
    }

    pub(crate) fn put_back(&mut self, solvable_id: SolvableId, watchers: Vec<ClauseId>) {
        debug_assert!(self.watchers[solvable_id.index()].is_empty());
        self.watchers[solvable_id.index()] = watchers;
    }

    /// Adds a single watcher; used when a watch relocates to a new
    /// solvable.
    pub(crate) fn add(&mut self, solvable_id: SolvableId, clause_id: ClauseId) {
        self.watchers[solvable_id.index()].push(clause_id);
    }
}
