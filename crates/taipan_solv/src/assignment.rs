//! The assignment trail: which solvables are decided, to what value, at
//! which level, and in which order.

use crate::{solvable::SolvableId, solver::Decision};

/// The state of one decided solvable.
#[derive(Debug, Copy, Clone)]
struct Assignment {
    value: bool,
    level: u32,
}

/// The solver's record of all decisions: a per-solvable assignment slot
/// plus the chronological trail the decisions were made in.
///
/// Propagation consumes the trail front to back; conflict analysis pops
/// it back to front.
pub(crate) struct AssignmentTrail {
    /// One slot per solvable; `None` while undecided.
    assignments: Vec<Option<Assignment>>,

    /// The decisions in the order they were made.
    trail: Vec<Decision>,

    /// How many trail entries have been propagated already.
    propagated: usize,
}

impl AssignmentTrail {
    pub(crate) fn new(nsolvables: u32) -> Self {
        Self {
            assignments: vec![None; nsolvables as usize],
            trail: Vec::new(),
            propagated: 0,
        }
    }

    /// Forgets every decision but keeps the capacity for the pool.
    pub(crate) fn clear(&mut self) {
        self.assignments.fill(None);
        self.trail.clear();
        self.propagated = 0;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.trail.is_empty()
    }

    /// The value the solvable was decided to, or `None` while it is
    /// undecided.
    pub(crate) fn value_of(&self, solvable_id: SolvableId) -> Option<bool> {
        self.assignments[solvable_id.index()].map(|assignment| assignment.value)
    }

    /// The level the solvable was decided at; `0` while undecided.
    pub(crate) fn level_of(&self, solvable_id: SolvableId) -> u32 {
        self.assignments[solvable_id.index()].map_or(0, |assignment| assignment.level)
    }

    /// The decisions made so far, oldest first.
    pub(crate) fn trail(&self) -> &[Decision] {
        &self.trail
    }

    /// Records a decision.
    ///
    /// Returns `Ok(true)` when the solvable was undecided until now,
    /// `Ok(false)` when it was already decided to the same value, and
    /// `Err(())` when it was decided to the opposite value, which is a
    /// conflict.
    #[allow(clippy::result_unit_err)]
    pub(crate) fn assign(&mut self, decision: Decision, level: u32) -> Result<bool, ()> {
        let slot = &mut self.assignments[decision.solvable_id.index()];
        match slot {
            None => {
                *slot = Some(Assignment {
                    value: decision.value,
                    level,
                });
                self.trail.push(decision);
                Ok(true)
            }
            Some(assignment) if assignment.value == decision.value => Ok(false),
            Some(_) => Err(()),
        }
    }

    /// Pops the newest decision and returns it together with the level
    /// of the decision that is now on top of the trail.
    pub(crate) fn retract_newest(&mut self) -> (Decision, u32) {
        let decision = self.trail.pop().expect("retract on an empty trail");
        self.assignments[decision.solvable_id.index()] = None;

        // Whatever was not propagated yet may be gone now.
        self.propagated = self.trail.len();

        let top = self.trail.last().expect("the root decision remains");
        (decision, self.level_of(top.solvable_id))
    }

    /// Pops every decision made above the given level.
    pub(crate) fn rewind_to(&mut self, level: u32) {
        while let Some(decision) = self.trail.last() {
            if self.level_of(decision.solvable_id) <= level {
                break;
            }
            self.retract_newest();
        }
    }

    /// The next decision that has not been handed to propagation yet.
    pub(crate) fn take_unpropagated(&mut self) -> Option<Decision> {
        let decision = self.trail.get(self.propagated).copied()?;
        self.propagated += 1;
        Some(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::AssignmentTrail;
    use crate::{
        solvable::SolvableId,
        solver::{ClauseId, Decision},
    };

    fn decision(index: usize, value: bool) -> Decision {
        Decision::new(SolvableId::new(index), value, ClauseId::install_root())
    }

    #[test]
    fn assign_and_query() {
        let mut trail = AssignmentTrail::new(4);
        assert_eq!(trail.value_of(SolvableId::new(1)), None);
        assert_eq!(trail.level_of(SolvableId::new(1)), 0);

        assert_eq!(trail.assign(decision(1, true), 2), Ok(true));
        assert_eq!(trail.value_of(SolvableId::new(1)), Some(true));
        assert_eq!(trail.level_of(SolvableId::new(1)), 2);

        // Re-deciding the same value is a no-op, the opposite value a
        // conflict.
        assert_eq!(trail.assign(decision(1, true), 3), Ok(false));
        assert_eq!(trail.assign(decision(1, false), 3), Err(()));
    }

    #[test]
    fn rewind_drops_newer_levels() {
        let mut trail = AssignmentTrail::new(4);
        trail.assign(decision(0, true), 1).unwrap();
        trail.assign(decision(1, true), 2).unwrap();
        trail.assign(decision(2, false), 3).unwrap();

        trail.rewind_to(1);
        assert_eq!(trail.trail().len(), 1);
        assert_eq!(trail.value_of(SolvableId::new(1)), None);
        assert_eq!(trail.value_of(SolvableId::new(2)), None);
        assert_eq!(trail.value_of(SolvableId::new(0)), Some(true));
    }

    #[test]
    fn propagation_cursor_follows_retracts() {
        let mut trail = AssignmentTrail::new(4);
        trail.assign(decision(0, true), 1).unwrap();
        trail.assign(decision(1, true), 1).unwrap();

        assert_eq!(trail.take_unpropagated().unwrap().solvable_id, SolvableId::new(0));
        assert_eq!(trail.take_unpropagated().unwrap().solvable_id, SolvableId::new(1));
        assert!(trail.take_unpropagated().is_none());

        // After a retract the cursor never points past the trail.
        trail.assign(decision(2, true), 2).unwrap();
        let (retracted, top_level) = trail.retract_newest();
        assert_eq!(retracted.solvable_id, SolvableId::new(2));
        assert_eq!(top_level, 1);
        assert!(trail.take_unpropagated().is_none());
    }
}
