//! The clauses of the SAT problem and their watched literals.

use fxhash::FxHashMap;

use crate::{
    assignment::AssignmentTrail,
    pool::{DependencyId, Pool},
    solvable::SolvableId,
};

/// The candidates computed for every dependency that occurs in the
/// problem. Built before the clauses that reference them.
#[derive(Default)]
pub(crate) struct CandidateCache {
    pub(crate) candidates: FxHashMap<DependencyId, Vec<SolvableId>>,
    /// For `constrains` dependencies: the solvables of the dependency's
    /// name that violate the constraint.
    pub(crate) forbidden: FxHashMap<DependencyId, Vec<SolvableId>>,
}

impl CandidateCache {
    pub(crate) fn candidates(&self, dep: DependencyId) -> &[SolvableId] {
        self.candidates
            .get(&dep)
            .map(Vec::as_slice)
            .expect("candidates were cached before clause creation")
    }
}

/// A single literal: a solvable and whether it is negated.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct Literal {
    pub(crate) solvable_id: SolvableId,
    pub(crate) negate: bool,
}

impl Literal {
    pub(crate) fn satisfying_value(self) -> bool {
        !self.negate
    }

    pub(crate) fn eval(self, trail: &AssignmentTrail) -> Option<bool> {
        trail
            .value_of(self.solvable_id)
            .map(|value| if self.negate { !value } else { value })
    }
}

/// What a clause expresses.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ClauseKind {
    /// The root must be installed.
    InstallRoot,
    /// The solvable requires one of the candidates of the dependency.
    ///
    /// In SAT terms: `¬A ∨ B1 ∨ ... ∨ Bn` for candidates `B1..Bn`.
    Requires(SolvableId, DependencyId),
    /// At most one of the two solvables may be installed; used to keep a
    /// single candidate per package name.
    ///
    /// In SAT terms: `¬A ∨ ¬B`.
    ForbidMultipleInstances(SolvableId, SolvableId),
    /// Like `ForbidMultipleInstances`, but created because the first
    /// solvable `constrains` the version range the second violates.
    Constrains(SolvableId, SolvableId),
    /// The solvable must not be installed: a policy exclusion (strict
    /// channel priority, forbidden downgrade, erase request, lock).
    ///
    /// In SAT terms: `¬A`.
    Forbid(SolvableId),
    /// A clause learnt during conflict analysis; the index points into
    /// the learnt clause store.
    Learnt(usize),
}

/// A clause with its two watched literals.
#[derive(Clone)]
pub(crate) struct Clause {
    pub(crate) watched_literals: [SolvableId; 2],
    pub(crate) kind: ClauseKind,
}

impl Clause {
    pub(crate) fn new(
        kind: ClauseKind,
        learnt_clauses: &[Vec<Literal>],
        cache: &CandidateCache,
    ) -> Self {
        let watched_literals = kind
            .initial_watches(learnt_clauses, cache)
            .unwrap_or([SolvableId::null(), SolvableId::null()]);

        let clause = Self {
            watched_literals,
            kind,
        };

        debug_assert!(!clause.has_watches() || watched_literals[0] != watched_literals[1]);
        clause
    }

    pub(crate) fn debug(&self, pool: &Pool) -> String {
        match self.kind {
            ClauseKind::InstallRoot => "install root".to_string(),
            ClauseKind::Learnt(index) => format!("learnt clause {index}"),
            ClauseKind::Requires(solvable_id, dep) => format!(
                "{} requires {}",
                pool.resolve_solvable_inner(solvable_id).display(),
                pool.resolve_dependency(dep).canonical
            ),
            ClauseKind::Constrains(s1, s2) => format!(
                "{} excludes {}",
                pool.resolve_solvable_inner(s1).display(),
                pool.resolve_solvable_inner(s2).display()
            ),
            ClauseKind::ForbidMultipleInstances(s1, _) => format!(
                "only one {} allowed",
                pool.resolve_solvable_inner(s1).display()
            ),
            ClauseKind::Forbid(s) => format!(
                "{} is excluded by policy",
                pool.resolve_solvable_inner(s).display()
            ),
        }
    }

    /// Returns the watched literals and the index of the watch that
    /// turned false, if any.
    pub(crate) fn watch_turned_false(
        &self,
        solvable_id: SolvableId,
        trail: &AssignmentTrail,
        learnt_clauses: &[Vec<Literal>],
    ) -> Option<([Literal; 2], usize)> {
        debug_assert!(self.watched_literals.contains(&solvable_id));

        let literals @ [w1, w2] = self.watched_literals(learnt_clauses);

        if solvable_id == w1.solvable_id && w1.eval(trail) == Some(false) {
            Some((literals, 0))
        } else if solvable_id == w2.solvable_id && w2.eval(trail) == Some(false) {
            Some((literals, 1))
        } else {
            None
        }
    }

    pub(crate) fn has_watches(&self) -> bool {
        // If the first watch is not null, the second won't be either.
        !self.watched_literals[0].is_null()
    }

    pub(crate) fn watched_literals(&self, learnt_clauses: &[Vec<Literal>]) -> [Literal; 2] {
        let literals = |positive1: bool, positive2: bool| {
            [
                Literal {
                    solvable_id: self.watched_literals[0],
                    negate: !positive1,
                },
                Literal {
                    solvable_id: self.watched_literals[1],
                    negate: !positive2,
                },
            ]
        };

        match self.kind {
            ClauseKind::InstallRoot | ClauseKind::Forbid(_) => unreachable!(),
            ClauseKind::Learnt(index) => {
                let &w1 = learnt_clauses[index]
                    .iter()
                    .find(|l| l.solvable_id == self.watched_literals[0])
                    .expect("watched literal is in the clause");
                let &w2 = learnt_clauses[index]
                    .iter()
                    .find(|l| l.solvable_id == self.watched_literals[1])
                    .expect("watched literal is in the clause");
                [w1, w2]
            }
            ClauseKind::ForbidMultipleInstances(..) | ClauseKind::Constrains(..) => {
                literals(false, false)
            }
            ClauseKind::Requires(solvable_id, _) => {
                if self.watched_literals[0] == solvable_id {
                    literals(false, true)
                } else if self.watched_literals[1] == solvable_id {
                    literals(true, false)
                } else {
                    literals(true, true)
                }
            }
        }
    }

    /// Finds a variable the clause can watch instead of the one that
    /// just turned false: not watched already, and undecided or decided
    /// such that its literal is true.
    pub(crate) fn next_unwatched_variable(
        &self,
        learnt_clauses: &[Vec<Literal>],
        cache: &CandidateCache,
        trail: &AssignmentTrail,
    ) -> Option<SolvableId> {
        let can_watch = |solvable_lit: Literal| {
            !self.watched_literals.contains(&solvable_lit.solvable_id)
                && solvable_lit.eval(trail).unwrap_or(true)
        };

        match self.kind {
            ClauseKind::InstallRoot | ClauseKind::Forbid(_) => unreachable!(),
            ClauseKind::Learnt(index) => learnt_clauses[index]
                .iter()
                .copied()
                .find(|&l| can_watch(l))
                .map(|l| l.solvable_id),
            ClauseKind::ForbidMultipleInstances(..) | ClauseKind::Constrains(..) => None,
            ClauseKind::Requires(solvable_id, dep) => {
                // The solvable that owns the requirement...
                let solvable_lit = Literal {
                    solvable_id,
                    negate: true,
                };
                if can_watch(solvable_lit) {
                    return Some(solvable_id);
                }

                // ... or any of the candidates.
                for &candidate in cache.candidates(dep) {
                    let lit = Literal {
                        solvable_id: candidate,
                        negate: false,
                    };
                    if can_watch(lit) {
                        return Some(candidate);
                    }
                }
                None
            }
        }
    }

    /// The literals that constitute this clause.
    pub(crate) fn literals(
        &self,
        learnt_clauses: &[Vec<Literal>],
        cache: &CandidateCache,
    ) -> Vec<Literal> {
        match self.kind {
            ClauseKind::InstallRoot => unreachable!(),
            ClauseKind::Learnt(index) => learnt_clauses[index].clone(),
            ClauseKind::Requires(solvable_id, dep) => std::iter::once(Literal {
                solvable_id,
                negate: true,
            })
            .chain(cache.candidates(dep).iter().map(|&solvable_id| Literal {
                solvable_id,
                negate: false,
            }))
            .collect(),
            ClauseKind::ForbidMultipleInstances(s1, s2) | ClauseKind::Constrains(s1, s2) => {
                vec![
                    Literal {
                        solvable_id: s1,
                        negate: true,
                    },
                    Literal {
                        solvable_id: s2,
                        negate: true,
                    },
                ]
            }
            ClauseKind::Forbid(s) => vec![Literal {
                solvable_id: s,
                negate: true,
            }],
        }
    }

    /// The literals that imply the given variable was assigned the
    /// conflicting value.
    pub(crate) fn conflict_causes(
        &self,
        variable: SolvableId,
        learnt_clauses: &[Vec<Literal>],
        cache: &CandidateCache,
    ) -> Vec<Literal> {
        match self.kind {
            ClauseKind::InstallRoot => unreachable!(),
            ClauseKind::Learnt(index) => learnt_clauses[index]
                .iter()
                .copied()
                .filter(|lit| lit.solvable_id != variable)
                .collect(),
            ClauseKind::Requires(solvable_id, dep) => std::iter::once(Literal {
                solvable_id,
                negate: true,
            })
            .chain(cache.candidates(dep).iter().map(|&solvable_id| Literal {
                solvable_id,
                negate: false,
            }))
            .filter(|&l| variable != l.solvable_id)
            .collect(),
            ClauseKind::ForbidMultipleInstances(s1, s2) | ClauseKind::Constrains(s1, s2) => {
                let cause = if variable == s1 { s2 } else { s1 };
                vec![Literal {
                    solvable_id: cause,
                    negate: true,
                }]
            }
            ClauseKind::Forbid(_) => Vec::new(),
        }
    }
}

impl ClauseKind {
    fn initial_watches(
        &self,
        learnt_clauses: &[Vec<Literal>],
        cache: &CandidateCache,
    ) -> Option<[SolvableId; 2]> {
        match self {
            ClauseKind::InstallRoot | ClauseKind::Forbid(_) => None,
            ClauseKind::ForbidMultipleInstances(s1, s2) | ClauseKind::Constrains(s1, s2) => {
                Some([*s1, *s2])
            }
            ClauseKind::Learnt(index) => {
                let literals = &learnt_clauses[*index];
                debug_assert!(!literals.is_empty());
                if literals.len() == 1 {
                    // Assertions don't need watches.
                    None
                } else {
                    Some([
                        literals.first().unwrap().solvable_id,
                        literals.last().unwrap().solvable_id,
                    ])
                }
            }
            ClauseKind::Requires(id, dep) => {
                let candidates = cache.candidates(*dep);
                if candidates.is_empty() {
                    None
                } else {
                    Some([*id, candidates[0]])
                }
            }
        }
    }
}
