//! The CDCL solver: watched literals, unit propagation, conflict
//! analysis with clause learning, and backjumping.

use fxhash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::{
    assignment::AssignmentTrail,
    clause::{CandidateCache, Clause, ClauseKind, Literal},
    jobs::SolveJobs,
    pool::{DependencyId, Pool, StringId},
    problem::Problem,
    solvable::SolvableId,
    transaction::{Transaction, TransactionKind},
    watches::WatchTable,
};

/// The id of a clause within the solver.
#[derive(Copy, Clone, PartialOrd, Ord, Eq, PartialEq, Debug, Hash)]
pub(crate) struct ClauseId(u32);

impl ClauseId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn install_root() -> Self {
        Self(0)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A decision about a single solvable, and the clause that forced it.
#[derive(Copy, Clone, Eq, PartialEq)]
pub(crate) struct Decision {
    pub(crate) solvable_id: SolvableId,
    pub(crate) value: bool,
    pub(crate) derived_from: ClauseId,
}

impl Decision {
    pub(crate) fn new(solvable: SolvableId, value: bool, derived_from: ClauseId) -> Self {
        Self {
            solvable_id: solvable,
            value,
            derived_from,
        }
    }
}

/// The solver. Owns the pool for the duration of the resolution.
pub struct Solver {
    pool: Pool,

    pub(crate) clauses: Vec<Clause>,
    pub(crate) candidates: CandidateCache,
    watches: WatchTable,

    learnt_clauses: Vec<Vec<Literal>>,
    learnt_clauses_start: ClauseId,
    learnt_why: Vec<Vec<ClauseId>>,

    favored_map: FxHashMap<StringId, SolvableId>,

    trail: AssignmentTrail,
}

impl Solver {
    /// Creates a solver using the provided pool. The pool's
    /// what-provides index must be up to date.
    pub fn new(pool: Pool) -> Self {
        Self {
            clauses: Vec::new(),
            candidates: CandidateCache::default(),
            watches: WatchTable::new(),
            learnt_clauses: Vec::new(),
            learnt_clauses_start: ClauseId(0),
            learnt_why: Vec::new(),
            favored_map: FxHashMap::default(),
            trail: AssignmentTrail::new(pool.nsolvables()),
            pool,
        }
    }

    /// The pool the solver operates on.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Consumes the solver and returns the pool.
    pub fn into_pool(self) -> Pool {
        self.pool
    }

    /// Solves the provided jobs and returns a transaction from the
    /// found solution, or a [`Problem`] describing why no solution
    /// exists.
    pub fn solve(&mut self, jobs: SolveJobs) -> Result<Transaction, Problem> {
        // Clear state from any previous run.
        self.pool.root_solvable_mut().clear();
        self.trail.clear();
        self.clauses = vec![Clause::new(
            ClauseKind::InstallRoot,
            &self.learnt_clauses,
            &self.candidates,
        )];
        self.candidates = CandidateCache::default();
        self.learnt_clauses.clear();
        self.learnt_why.clear();

        self.favored_map = jobs
            .favor
            .iter()
            .map(|&favored_id| (self.pool.resolve_solvable(favored_id).name_id(), favored_id))
            .collect();

        // Initialize the root solvable with the requested dependencies
        // and recursively create the clauses they reach.
        let mut visited = FxHashSet::default();
        for &dep in &jobs.install {
            self.pool.root_solvable_mut().push(dep);
            self.add_clauses_for_root_dep(&mut visited, dep);
        }

        // Only a single candidate per package name may be installed.
        let buckets: Vec<Vec<SolvableId>> =
            self.pool.packages_by_name.values().cloned().collect();
        for candidates in buckets {
            for (i, &candidate) in candidates.iter().enumerate() {
                for &other_candidate in &candidates[i + 1..] {
                    self.clauses.push(Clause::new(
                        ClauseKind::ForbidMultipleInstances(candidate, other_candidate),
                        &self.learnt_clauses,
                        &self.candidates,
                    ));
                }
            }
        }

        // A locked solvable forbids every other candidate of its name.
        for &locked_solvable_id in &jobs.lock {
            let name = self.pool.resolve_solvable(locked_solvable_id).name_id();
            if let Some(other_candidates) = self.pool.packages_by_name.get(&name) {
                for &other_candidate in other_candidates.clone().iter() {
                    if other_candidate != locked_solvable_id {
                        self.clauses.push(Clause::new(
                            ClauseKind::ForbidMultipleInstances(
                                SolvableId::root(),
                                other_candidate,
                            ),
                            &self.learnt_clauses,
                            &self.candidates,
                        ));
                    }
                }
            }
        }

        // Policy exclusions.
        for &forbidden in &jobs.forbid {
            self.clauses.push(Clause::new(
                ClauseKind::Forbid(forbidden),
                &self.learnt_clauses,
                &self.candidates,
            ));
        }

        // All clauses from this point on are learnt.
        self.learnt_clauses_start = ClauseId::new(self.clauses.len());

        self.make_watches();
        self.run_sat()?;

        let steps = self
            .trail
            .trail()
            .iter()
            .filter_map(|d| {
                (d.value && d.solvable_id != SolvableId::root())
                    .then_some((d.solvable_id, TransactionKind::Install))
            })
            .collect();
        Ok(Transaction { steps })
    }

    /// Caches the candidates for a dependency, with the favored
    /// candidate moved to the front.
    fn ensure_candidates(&mut self, dep: DependencyId) {
        if self.candidates.candidates.contains_key(&dep) {
            return;
        }
        let mut candidates = self.pool.whatprovides(dep);
        let dependency_name = self.pool.resolve_dependency(dep).name;
        if let Some(&favored_id) = self.favored_map.get(&dependency_name) {
            if let Some(pos) = candidates.iter().position(|&s| s == favored_id) {
                candidates.swap(0, pos);
            }
        }
        self.candidates.candidates.insert(dep, candidates);
    }

    /// Recursively adds the clauses reachable from one root dependency.
    fn add_clauses_for_root_dep(&mut self, visited: &mut FxHashSet<SolvableId>, dep: DependencyId) {
        let mut candidate_stack = Vec::new();

        self.ensure_candidates(dep);
        for &candidate in self.candidates.candidates(dep) {
            if visited.insert(candidate) {
                candidate_stack.push(candidate);
            }
        }

        while let Some(candidate) = candidate_stack.pop() {
            let (dependencies, constrains) = {
                let solvable = self.pool.resolve_solvable(candidate);
                (
                    solvable.dependencies().to_vec(),
                    solvable.constrains().to_vec(),
                )
            };

            for dep in dependencies {
                self.ensure_candidates(dep);
                for &dep_candidate in self.candidates.candidates(dep) {
                    if visited.insert(dep_candidate) {
                        candidate_stack.push(dep_candidate);
                    }
                }

                self.clauses.push(Clause::new(
                    ClauseKind::Requires(candidate, dep),
                    &self.learnt_clauses,
                    &self.candidates,
                ));
            }

            for dep in constrains {
                let violators = self.pool.violators(dep);
                self.candidates.forbidden.insert(dep, violators.clone());
                for violator in violators {
                    self.clauses.push(Clause::new(
                        ClauseKind::Constrains(candidate, violator),
                        &self.learnt_clauses,
                        &self.candidates,
                    ));
                }
            }
        }

        // The root itself requires this dependency.
        self.clauses.push(Clause::new(
            ClauseKind::Requires(SolvableId::root(), dep),
            &self.learnt_clauses,
            &self.candidates,
        ));
    }

    fn run_sat(&mut self) -> Result<(), Problem> {
        let level = self.install_root_solvable();

        self.decide_top_level_assertions(level)
            .map_err(|cause| self.analyze_unsolvable(cause))?;

        self.propagate(level)
            .map_err(|(_, _, cause)| self.analyze_unsolvable(cause))?;

        self.resolve_dependencies(level)?;

        Ok(())
    }

    fn install_root_solvable(&mut self) -> u32 {
        assert!(self.trail.is_empty());
        self.trail
            .assign(
                Decision::new(SolvableId::root(), true, ClauseId::install_root()),
                1,
            )
            .expect("bug: solvable was already decided");

        // The root is installed at level 1.
        1
    }

    /// Applies the assertions that need no search: requirements without
    /// candidates and policy exclusions.
    fn decide_top_level_assertions(&mut self, level: u32) -> Result<(), ClauseId> {
        trace!("deciding top-level assertions");

        for (i, clause) in self.clauses.iter().enumerate() {
            let clause_id = ClauseId::new(i);
            let (solvable_id, value) = match clause.kind {
                // A requires clause without watches has a single
                // literal: there are no candidates.
                ClauseKind::Requires(solvable_id, _) if !clause.has_watches() => {
                    (solvable_id, false)
                }
                ClauseKind::Forbid(solvable_id) => (solvable_id, false),
                _ => continue,
            };

            let decided = self
                .trail
                .assign(Decision::new(solvable_id, value, clause_id), level)
                .map_err(|()| clause_id)?;

            if decided {
                trace!(
                    "assertion: {} = {value}",
                    self.pool.resolve_solvable_inner(solvable_id).display()
                );
            }
        }

        Ok(())
    }

    /// The main search loop: pick the best undecided candidate of an
    /// unsatisfied requirement, install it, propagate, learn from
    /// conflicts.
    fn resolve_dependencies(&mut self, mut level: u32) -> Result<u32, Problem> {
        let mut i = 0;
        loop {
            if i >= self.clauses.len() {
                break;
            }

            let (required_by, candidate) = {
                let clause = &self.clauses[i];
                i += 1;

                // Only requires clauses drive the search.
                let ClauseKind::Requires(solvable_id, dep) = clause.kind else {
                    continue;
                };

                // Only for solvables we have decided to install.
                if self.trail.value_of(solvable_id) != Some(true) {
                    continue;
                }

                // Skip requirements that are already satisfied.
                let candidates = self.candidates.candidates(dep);
                if candidates
                    .iter()
                    .any(|&c| self.trail.value_of(c) == Some(true))
                {
                    continue;
                }

                // The first undecided candidate is the best one: the
                // candidate order put it there.
                let Some(candidate) = candidates
                    .iter()
                    .copied()
                    .find(|&c| self.trail.value_of(c).is_none())
                else {
                    continue;
                };

                (solvable_id, candidate)
            };

            level = self.set_propagate_learn(level, candidate, required_by, ClauseId::new(i - 1))?;

            // Progress was made; reconsider all clauses.
            i = 0;
        }

        // No choices left to make.
        Ok(level)
    }

    fn set_propagate_learn(
        &mut self,
        mut level: u32,
        solvable: SolvableId,
        required_by: SolvableId,
        clause_id: ClauseId,
    ) -> Result<u32, Problem> {
        level += 1;

        trace!(
            "installing {} at level {level} (required by {})",
            self.pool.resolve_solvable_inner(solvable).display(),
            self.pool.resolve_solvable_inner(required_by).display(),
        );

        self.trail
            .assign(Decision::new(solvable, true, clause_id), level)
            .expect("bug: solvable was already decided");

        loop {
            let r = self.propagate(level);
            let Err((conflicting_solvable, attempted_value, conflicting_clause)) = r else {
                break;
            };

            trace!(
                "propagation conflicted: could not set {} to {attempted_value} ({})",
                self.pool
                    .resolve_solvable_inner(conflicting_solvable)
                    .display(),
                self.clauses[conflicting_clause.index()].debug(&self.pool),
            );

            if level == 1 {
                return Err(self.analyze_unsolvable(conflicting_clause));
            }

            let (new_level, learnt_clause_id, literal) =
                self.analyze(level, conflicting_solvable, conflicting_clause);
            level = new_level;

            trace!("backtracked to level {level}");

            // The learnt clause is a unit clause here, so propagate it
            // directly.
            let decision = literal.satisfying_value();
            self.trail
                .assign(
                    Decision::new(literal.solvable_id, decision, learnt_clause_id),
                    level,
                )
                .expect("bug: solvable was already decided");
        }

        Ok(level)
    }

    fn propagate(&mut self, level: u32) -> Result<(), (SolvableId, bool, ClauseId)> {
        // Learnt assertions first.
        let learnt_clauses_start = self.learnt_clauses_start.index();
        for (i, clause) in self.clauses[learnt_clauses_start..].iter().enumerate() {
            let ClauseKind::Learnt(learnt_index) = clause.kind else {
                unreachable!();
            };

            let literals = &self.learnt_clauses[learnt_index];
            if literals.len() > 1 {
                continue;
            }

            debug_assert!(!literals.is_empty());

            let literal = literals[0];
            let decision = literal.satisfying_value();
            let clause_id = ClauseId::new(learnt_clauses_start + i);

            let decided = self
                .trail
                .assign(Decision::new(literal.solvable_id, decision, clause_id), level)
                .map_err(|()| (literal.solvable_id, decision, clause_id))?;

            if decided {
                trace!(
                    "propagate assertion {} = {decision}",
                    self.pool
                        .resolve_solvable_inner(literal.solvable_id)
                        .display()
                );
            }
        }

        // Then watched literals. For every freshly decided solvable,
        // its whole watcher list is taken out of the table; clauses
        // whose watch survives (or becomes a unit) go back in, clauses
        // whose watch relocates move to another solvable's list.
        while let Some(decision) = self.trail.take_unpropagated() {
            let pkg = decision.solvable_id;

            let watchers = self.watches.take(pkg);
            let mut kept = Vec::with_capacity(watchers.len());
            let mut conflict = None;

            let mut watchers = watchers.into_iter();
            for clause_id in watchers.by_ref() {
                let clause = &mut self.clauses[clause_id.index()];

                let Some((literals, watch_index)) =
                    clause.watch_turned_false(pkg, &self.trail, &self.learnt_clauses)
                else {
                    // The watch is still fine (the decision satisfied
                    // the literal).
                    kept.push(clause_id);
                    continue;
                };

                if let Some(new_watch) = clause.next_unwatched_variable(
                    &self.learnt_clauses,
                    &self.candidates,
                    &self.trail,
                ) {
                    // Relocate the watch: the clause stops watching
                    // `pkg` and starts watching the new variable.
                    debug_assert!(!clause.watched_literals.contains(&new_watch));
                    clause.watched_literals[watch_index] = new_watch;
                    self.watches.add(new_watch, clause_id);
                    continue;
                }

                // No replacement watch exists: the clause is a unit and
                // the remaining watched literal must be satisfied.
                kept.push(clause_id);
                let remaining = literals[1 - watch_index];
                match self.trail.assign(
                    Decision::new(
                        remaining.solvable_id,
                        remaining.satisfying_value(),
                        clause_id,
                    ),
                    level,
                ) {
                    Ok(true) => {
                        if !matches!(
                            self.clauses[clause_id.index()].kind,
                            // Skip logging for forbids, which are noisy.
                            ClauseKind::ForbidMultipleInstances(..)
                        ) {
                            trace!(
                                "propagate {} = {}. {}",
                                self.pool
                                    .resolve_solvable_inner(remaining.solvable_id)
                                    .display(),
                                remaining.satisfying_value(),
                                self.clauses[clause_id.index()].debug(&self.pool),
                            );
                        }
                    }
                    Ok(false) => {}
                    Err(()) => {
                        conflict = Some((
                            remaining.solvable_id,
                            remaining.satisfying_value(),
                            clause_id,
                        ));
                        break;
                    }
                }
            }

            // On conflict the untouched rest of the list keeps
            // watching.
            kept.extend(watchers);
            self.watches.put_back(pkg, kept);

            if let Some(conflict) = conflict {
                return Err(conflict);
            }
        }

        Ok(())
    }

    fn analyze_unsolvable_clause(
        clauses: &[Clause],
        learnt_why: &[Vec<ClauseId>],
        learnt_clauses_start: ClauseId,
        clause_id: ClauseId,
        problem: &mut Problem,
        seen: &mut FxHashSet<ClauseId>,
    ) {
        let clause = &clauses[clause_id.index()];
        match clause.kind {
            ClauseKind::Learnt(..) => {
                if !seen.insert(clause_id) {
                    return;
                }

                for &cause in &learnt_why[clause_id.index() - learnt_clauses_start.index()] {
                    Self::analyze_unsolvable_clause(
                        clauses,
                        learnt_why,
                        learnt_clauses_start,
                        cause,
                        problem,
                        seen,
                    );
                }
            }
            _ => problem.add_clause(clause_id),
        }
    }

    fn analyze_unsolvable(&mut self, clause_id: ClauseId) -> Problem {
        let last_decision = self
            .trail
            .trail()
            .last()
            .expect("conflicts only happen after the root decision");
        let highest_level = self.trail.level_of(last_decision.solvable_id);
        debug_assert_eq!(highest_level, 1);

        let mut problem = Problem::default();

        trace!("analyzing unsolvable");

        let mut involved: FxHashSet<SolvableId> = self.clauses[clause_id.index()]
            .literals(&self.learnt_clauses, &self.candidates)
            .iter()
            .map(|l| l.solvable_id)
            .collect();

        let mut seen = FxHashSet::default();
        Self::analyze_unsolvable_clause(
            &self.clauses,
            &self.learnt_why,
            self.learnt_clauses_start,
            clause_id,
            &mut problem,
            &mut seen,
        );

        for decision in self.trail.trail()[1..].iter().rev() {
            if decision.solvable_id == SolvableId::root() {
                panic!("unexpected root solvable");
            }

            let why = decision.derived_from;

            if !involved.contains(&decision.solvable_id) {
                continue;
            }

            assert_ne!(why, ClauseId::install_root());

            Self::analyze_unsolvable_clause(
                &self.clauses,
                &self.learnt_why,
                self.learnt_clauses_start,
                why,
                &mut problem,
                &mut seen,
            );

            for literal in self.clauses[why.index()].literals(&self.learnt_clauses, &self.candidates)
            {
                if literal.eval(&self.trail) == Some(true) {
                    assert_eq!(literal.solvable_id, decision.solvable_id);
                    continue;
                }

                involved.insert(literal.solvable_id);
            }
        }

        problem
    }

    /// First-UIP conflict analysis: learns a new clause and returns the
    /// level to backjump to, the learnt clause's id, and the literal
    /// that becomes a unit.
    fn analyze(
        &mut self,
        mut current_level: u32,
        mut conflicting_solvable: SolvableId,
        mut clause_id: ClauseId,
    ) -> (u32, ClauseId, Literal) {
        let mut seen = FxHashSet::default();
        let mut causes_at_current_level = 0u32;
        let mut learnt = Vec::new();
        let mut backtrack_level = 0;

        let mut first_iteration = true;
        let mut s_value;

        let mut learnt_why = Vec::new();
        loop {
            learnt_why.push(clause_id);

            let causes = if first_iteration {
                first_iteration = false;
                self.clauses[clause_id.index()].literals(&self.learnt_clauses, &self.candidates)
            } else {
                self.clauses[clause_id.index()].conflict_causes(
                    conflicting_solvable,
                    &self.learnt_clauses,
                    &self.candidates,
                )
            };

            debug_assert!(!causes.is_empty());

            // Collect the literals that imply the conflicting
            // assignment.
            for cause in causes {
                if seen.insert(cause.solvable_id) {
                    let decision_level = self.trail.level_of(cause.solvable_id);
                    if decision_level == current_level {
                        causes_at_current_level += 1;
                    } else if current_level > 1 {
                        let learnt_literal = Literal {
                            solvable_id: cause.solvable_id,
                            negate: self
                                .trail
                                .value_of(cause.solvable_id)
                                .expect("a cause has been decided"),
                        };
                        learnt.push(learnt_literal);
                        backtrack_level = backtrack_level.max(decision_level);
                    } else {
                        // A conflict with a decision at level 1 means
                        // the problem is unsolvable; level-1 decisions
                        // derive directly from the user's input.
                        panic!("unsolvable");
                    }
                }
            }

            // Select the next literal to look at.
            loop {
                let (last_decision, last_decision_level) = self.trail.retract_newest();

                conflicting_solvable = last_decision.solvable_id;
                s_value = last_decision.value;
                clause_id = last_decision.derived_from;

                current_level = last_decision_level;

                // We are interested in the first literal we come across
                // that caused the conflicting assignment.
                if seen.contains(&last_decision.solvable_id) {
                    break;
                }
            }

            causes_at_current_level = causes_at_current_level.saturating_sub(1);
            if causes_at_current_level == 0 {
                break;
            }
        }

        let last_literal = Literal {
            solvable_id: conflicting_solvable,
            negate: s_value,
        };
        learnt.push(last_literal);

        // Store the learnt clause.
        let clause_id = ClauseId::new(self.clauses.len());
        let learnt_index = self.learnt_clauses.len();
        self.learnt_clauses.push(learnt.clone());
        self.learnt_why.push(learnt_why);

        let clause = Clause::new(
            ClauseKind::Learnt(learnt_index),
            &self.learnt_clauses,
            &self.candidates,
        );

        if clause.has_watches() {
            self.watches.watch_clause(&clause, clause_id);
        }

        self.clauses.push(clause);

        if tracing::enabled!(tracing::Level::TRACE) {
            trace!("learnt disjunction:");
            for lit in learnt {
                trace!(
                    "- {}{}",
                    if lit.negate { "NOT " } else { "" },
                    self.pool.resolve_solvable_inner(lit.solvable_id).display()
                );
            }
        }

        // Revert at most to the root level.
        let target_level = backtrack_level.max(1);
        self.trail.rewind_to(target_level);

        (target_level, clause_id, last_literal)
    }

    fn make_watches(&mut self) {
        self.watches.initialize(self.pool.solvables.len());
        for (i, clause) in self.clauses.iter().enumerate() {
            if clause.has_watches() {
                self.watches.watch_clause(clause, ClauseId::new(i));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use taipan_conda_types::{PackageRecord, RepoDataRecord, Version};

    use super::Solver;
    use crate::{
        jobs::SolveJobs,
        pool::{Pool, RepoPriority},
        solvable::SolvableId,
        transaction::Transaction,
    };

    fn record(name: &str, version: &str, deps: &[&str]) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(name, Version::from_str(version).unwrap(), "");
        package_record.depends = Some(deps.iter().map(|s| (*s).to_owned()).collect());
        RepoDataRecord {
            url: format!("https://repo.example.com/pkgs/{name}-{version}-0.conda")
                .parse()
                .unwrap(),
            channel: "test".to_owned(),
            file_name: format!("{name}-{version}-0.conda"),
            package_record,
        }
    }

    fn pool(packages: &[(&str, &str, Vec<&str>)]) -> Pool {
        let mut pool = Pool::new();
        let repo_id = pool.add_repo("test", RepoPriority::default());

        for (name, version, deps) in packages {
            pool.add_solvable(repo_id, record(name, version, deps))
                .unwrap();
        }

        pool.rebuild_whatprovides();
        pool
    }

    fn install(pool: &mut Pool, specs: &[&str]) -> SolveJobs {
        let mut jobs = SolveJobs::default();
        for &spec in specs {
            let dep = pool.intern_dependency_str(spec).unwrap();
            jobs.install(dep);
        }
        jobs
    }

    fn transaction_to_string(pool: &Pool, transaction: &Transaction) -> String {
        use std::fmt::Write;
        let mut buf = String::new();
        for &(solvable_id, _) in &transaction.steps {
            writeln!(buf, "{}", pool.resolve_solvable_inner(solvable_id).display()).unwrap();
        }
        buf
    }

    fn solve_unsat(pool: Pool, jobs: SolveJobs) -> String {
        let mut solver = Solver::new(pool);
        match solver.solve(jobs) {
            Ok(_) => panic!("expected unsat, but a solution was found"),
            Err(problem) => problem.display_user_friendly(&solver).to_string(),
        }
    }

    fn assert_installed(solver: &Solver, transaction: &Transaction, expected: &[(&str, &str)]) {
        assert_eq!(transaction.steps.len(), expected.len());
        for (&(solvable_id, _), &(name, version)) in transaction.steps.iter().zip(expected) {
            let solvable = solver.pool().resolve_solvable(solvable_id);
            assert_eq!(solvable.record.package_record.name, name);
            assert_eq!(
                solvable.record.package_record.version,
                Version::from_str(version).unwrap()
            );
        }
    }

    #[test]
    fn unit_propagation() {
        let mut pool = pool(&[("asdf", "1.2.3", vec![])]);
        let jobs = install(&mut pool, &["asdf"]);
        pool.rebuild_whatprovides();
        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();
        assert_installed(&solver, &solved, &[("asdf", "1.2.3")]);
    }

    #[test]
    fn unit_propagation_nested() {
        let mut pool = pool(&[
            ("asdf", "1.2.3", vec!["efgh"]),
            ("efgh", "4.5.6", vec![]),
            ("dummy", "42.42.42", vec![]),
        ]);
        let jobs = install(&mut pool, &["asdf"]);
        pool.rebuild_whatprovides();
        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();
        assert_installed(&solver, &solved, &[("asdf", "1.2.3"), ("efgh", "4.5.6")]);
    }

    #[test]
    fn highest_version_is_preferred() {
        let mut pool = pool(&[
            ("asdf", "1.2.4", vec![]),
            ("asdf", "1.2.3", vec![]),
            ("efgh", "4.5.7", vec![]),
            ("efgh", "4.5.6", vec![]),
        ]);
        let jobs = install(&mut pool, &["asdf", "efgh"]);
        pool.rebuild_whatprovides();
        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();
        assert_installed(&solver, &solved, &[("asdf", "1.2.4"), ("efgh", "4.5.7")]);
    }

    #[test]
    fn resolve_with_conflict() {
        let mut pool = pool(&[
            ("asdf", "1.2.4", vec!["conflicting ==1.0.1"]),
            ("asdf", "1.2.3", vec!["conflicting ==1.0.0"]),
            ("efgh", "4.5.7", vec!["conflicting ==1.0.0"]),
            ("efgh", "4.5.6", vec!["conflicting ==1.0.0"]),
            ("conflicting", "1.0.1", vec![]),
            ("conflicting", "1.0.0", vec![]),
        ]);
        let jobs = install(&mut pool, &["asdf", "efgh"]);
        pool.rebuild_whatprovides();
        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();

        let result = transaction_to_string(solver.pool(), &solved);
        // Asdf 1.2.3 is selected because its dependency set is the only
        // one compatible with the efgh requirement.
        assert!(result.contains("asdf 1.2.3"), "{result}");
        assert!(result.contains("efgh 4.5.7"), "{result}");
        assert!(result.contains("conflicting 1.0.0"), "{result}");
        assert_eq!(solved.steps.len(), 3);
    }

    #[test]
    fn resolve_with_nonexisting_transitive_dep() {
        let mut pool = pool(&[
            ("asdf", "1.2.4", vec!["b"]),
            ("asdf", "1.2.3", vec![]),
            ("b", "1.2.3", vec!["idontexist"]),
        ]);
        let jobs = install(&mut pool, &["asdf"]);
        pool.rebuild_whatprovides();
        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();
        assert_installed(&solver, &solved, &[("asdf", "1.2.3")]);
    }

    #[test]
    fn locked_solvable_is_used() {
        let mut pool = pool(&[("asdf", "1.2.4", vec![]), ("asdf", "1.2.3", vec![])]);
        let locked = pool
            .iter_solvables()
            .find(|(_, s)| {
                s.record.package_record.version == Version::from_str("1.2.3").unwrap()
            })
            .map(|(id, _)| id)
            .unwrap();

        let mut jobs = install(&mut pool, &["asdf"]);
        jobs.lock(locked);
        pool.rebuild_whatprovides();

        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();

        assert_eq!(solved.steps.len(), 1);
        assert_eq!(solved.steps[0].0, locked);
    }

    #[test]
    fn irrelevant_lock_is_ignored() {
        let mut pool = pool(&[
            ("asdf", "1.2.4", vec![]),
            ("asdf", "1.2.3", vec!["fgh"]),
            ("fgh", "1.0.0", vec![]),
        ]);
        let locked = pool
            .iter_solvables()
            .find(|(_, s)| {
                s.record.package_record.version == Version::from_str("1.0.0").unwrap()
            })
            .map(|(id, _)| id)
            .unwrap();

        let mut jobs = install(&mut pool, &["asdf"]);
        jobs.lock(locked);
        pool.rebuild_whatprovides();

        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();
        assert_installed(&solver, &solved, &[("asdf", "1.2.4")]);
    }

    #[test]
    fn favored_solvable_wins_without_conflict() {
        let mut pool = pool(&[
            ("a", "1", vec![]),
            ("a", "2", vec![]),
            ("b", "1", vec![]),
            ("b", "2", vec![]),
        ]);

        let mut jobs = install(&mut pool, &["a", "b >=2"]);

        // Already installed: a=1, b=1.
        let already_installed: Vec<_> = pool
            .iter_solvables()
            .filter(|(_, s)| s.record.package_record.version == Version::from_str("1").unwrap())
            .map(|(id, _)| id)
            .collect();
        for solvable_id in already_installed {
            jobs.favor(solvable_id);
        }
        pool.rebuild_whatprovides();

        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();

        let result = transaction_to_string(solver.pool(), &solved);
        assert!(result.contains("a 1"), "{result}");
        assert!(result.contains("b 2"), "{result}");
    }

    #[test]
    fn favored_solvable_loses_on_conflict() {
        let mut pool = pool(&[
            ("a", "1", vec!["c ==1"]),
            ("a", "2", vec![]),
            ("b", "1", vec!["c ==1"]),
            ("b", "2", vec!["c ==2"]),
            ("c", "1", vec![]),
            ("c", "2", vec![]),
        ]);

        let mut jobs = install(&mut pool, &["a", "b >=2"]);

        // Already installed: a=1, b=1, c=1.
        let already_installed: Vec<_> = pool
            .iter_solvables()
            .filter(|(_, s)| s.record.package_record.version == Version::from_str("1").unwrap())
            .map(|(id, _)| id)
            .collect();
        for solvable_id in already_installed {
            jobs.favor(solvable_id);
        }
        pool.rebuild_whatprovides();

        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();

        let result = transaction_to_string(solver.pool(), &solved);
        assert!(result.contains("a 2"), "{result}");
        assert!(result.contains("b 2"), "{result}");
        assert!(result.contains("c 2"), "{result}");
    }

    #[test]
    fn cyclic_dependencies_resolve() {
        let mut pool = pool(&[("a", "2", vec!["b <=10"]), ("b", "5", vec!["a >=2,<=4"])]);
        let jobs = install(&mut pool, &["a <100"]);
        pool.rebuild_whatprovides();
        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();

        let result = transaction_to_string(solver.pool(), &solved);
        assert!(result.contains("a 2"), "{result}");
        assert!(result.contains("b 5"), "{result}");
    }

    #[test]
    fn forbidden_solvable_is_never_chosen() {
        let mut pool = pool(&[("a", "2.0", vec![]), ("a", "1.0", vec![])]);
        let newest = pool
            .iter_solvables()
            .find(|(_, s)| s.record.package_record.version == Version::from_str("2.0").unwrap())
            .map(|(id, _)| id)
            .unwrap();
        let mut jobs = install(&mut pool, &["a"]);
        jobs.forbid(newest);
        pool.rebuild_whatprovides();

        let mut solver = Solver::new(pool);
        let solved = solver.solve(jobs).unwrap();
        assert_installed(&solver, &solved, &[("a", "1.0")]);
    }

    #[test]
    fn unsat_no_candidates_for_dep() {
        let mut pool = pool(&[("asdf", "1.2.3", vec!["c >1"]), ("c", "1.0.0", vec![])]);
        let jobs = install(&mut pool, &["asdf"]);
        pool.rebuild_whatprovides();
        let error = solve_unsat(pool, jobs);
        assert!(error.contains("asdf"), "{error}");
        assert!(error.contains("c >1"), "{error}");
        assert!(error.contains("no candidates"), "{error}");
    }

    #[test]
    fn unsat_missing_top_level_dep() {
        let mut pool = pool(&[("asdf", "1.2.3", vec![])]);
        let jobs = install(&mut pool, &["fghj"]);
        pool.rebuild_whatprovides();
        let error = solve_unsat(pool, jobs);
        assert!(error.contains("fghj"), "{error}");
        assert!(error.contains("No candidates"), "{error}");
    }

    #[test]
    fn unsat_incompatible_root_requirements() {
        let mut pool = pool(&[("a", "2", vec![]), ("a", "5", vec![])]);
        let jobs = install(&mut pool, &["a <4", "a >=5,<10"]);
        pool.rebuild_whatprovides();
        let error = solve_unsat(pool, jobs);
        assert!(error.contains("a <4"), "{error}");
        assert!(error.contains("a >=5,<10"), "{error}");
    }

    #[test]
    fn unsat_after_backtracking() {
        let mut pool = pool(&[
            ("b", "4.5.7", vec!["d ==1"]),
            ("b", "4.5.6", vec!["d ==1"]),
            ("c", "1.0.1", vec!["d ==2"]),
            ("c", "1.0.0", vec!["d ==2"]),
            ("d", "2.0.0", vec![]),
            ("d", "1.0.0", vec![]),
            ("e", "1.0.0", vec![]),
            ("e", "1.0.1", vec![]),
        ]);
        let jobs = install(&mut pool, &["b", "c", "e"]);
        pool.rebuild_whatprovides();
        let error = solve_unsat(pool, jobs);
        assert!(error.contains("d ==1"), "{error}");
        assert!(error.contains("d ==2"), "{error}");
    }

    #[test]
    fn unsat_pubgrub_article() {
        // The example from the pubgrub blog post.
        let mut pool = pool(&[
            ("menu", "1.5.0", vec!["dropdown >=2.0.0,<=2.3.0"]),
            ("menu", "1.0.0", vec!["dropdown >=1.8.0,<2.0.0"]),
            ("dropdown", "2.3.0", vec!["icons ==2.0.0"]),
            ("dropdown", "1.8.0", vec!["intl ==3.0.0"]),
            ("icons", "2.0.0", vec![]),
            ("icons", "1.0.0", vec![]),
            ("intl", "5.0.0", vec![]),
            ("intl", "3.0.0", vec![]),
        ]);
        let jobs = install(&mut pool, &["menu", "icons ==1.0.0", "intl ==5.0.0"]);
        pool.rebuild_whatprovides();
        let error = solve_unsat(pool, jobs);
        assert!(error.contains("menu"), "{error}");
    }

    #[test]
    fn unsat_constrains() {
        let mut pool = Pool::new();
        let repo_id = pool.add_repo("test", RepoPriority::default());

        let mut a = record("a", "1.0", &["b"]);
        a.package_record.constrains = Some(vec!["c <2".to_owned()]);
        pool.add_solvable(repo_id, a).unwrap();
        pool.add_solvable(repo_id, record("b", "1.0", &["c >=2"]))
            .unwrap();
        pool.add_solvable(repo_id, record("c", "2.0", &[])).unwrap();
        pool.rebuild_whatprovides();

        let jobs = install(&mut pool, &["a"]);
        pool.rebuild_whatprovides();
        let error = solve_unsat(pool, jobs);
        assert!(error.contains("a"), "{error}");
    }
}
