//! A pool-independent description of an unsolvable problem.

use fxhash::FxHashSet;
use taipan_solv::{ProblemGraph, Solver};

/// One `requires` edge of the conflict graph, with the ids resolved to
/// names so the graph outlives the pool.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConflictEdge {
    /// The package the requirement originates from, or `None` for a
    /// user spec.
    pub source: Option<String>,

    /// The match spec that forced the constraint.
    pub requirement: String,

    /// The candidate the edge points at, or `None` when the requirement
    /// has no candidates at all.
    pub target: Option<String>,
}

/// The rooted conflict DAG of an unsolvable problem: user specs at the
/// top, conflicting transitive requirements below, terminal nodes
/// carrying the concrete conflicts.
#[derive(Debug, Clone)]
pub struct ConflictGraph {
    /// Every requirement edge involved in the conflict.
    pub edges: Vec<ConflictEdge>,

    /// The names of the packages that are conflict nodes.
    pub conflicts: Vec<String>,

    /// The user-facing rendering of the problem.
    pub message: String,
}

impl ConflictGraph {
    pub(crate) fn from_problem_graph(
        graph: &ProblemGraph,
        solver: &Solver,
        message: String,
    ) -> Self {
        let pool = solver.pool();
        let display = |id| {
            let record = &pool.resolve_solvable(id).record.package_record;
            format!("{}-{}-{}", record.name, record.version, record.build)
        };

        let edges = graph
            .requirement_edges()
            .into_iter()
            .map(|(source, dep, target)| ConflictEdge {
                source: source.map(display),
                requirement: pool.resolve_dependency(dep).canonical.clone(),
                target: target.map(display),
            })
            .collect();

        let conflicts: FxHashSet<String> = graph
            .conflicting_solvables()
            .into_iter()
            .map(|id| pool.resolve_solvable(id).record.package_record.name.clone())
            .collect();
        let mut conflicts: Vec<String> = conflicts.into_iter().collect();
        conflicts.sort();

        Self {
            edges,
            conflicts,
            message,
        }
    }

    /// Returns true if the graph contains a requirement edge from the
    /// named package (or a user spec when `source` is `None`) with the
    /// given spec text.
    pub fn has_requirement_edge(&self, source: Option<&str>, requirement: &str) -> bool {
        self.edges.iter().any(|edge| {
            edge.requirement == requirement
                && match (source, &edge.source) {
                    (None, None) => true,
                    (Some(name), Some(source)) => {
                        source.starts_with(&format!("{name}-")) || source == name
                    }
                    _ => false,
                }
        })
    }
}
