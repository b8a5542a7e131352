//! Describing unsolvable problems: the rooted conflict graph and its
//! user-friendly rendering.

use std::{
    fmt,
    fmt::Formatter,
    rc::Rc,
};

use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use petgraph::{
    graph::{DiGraph, EdgeIndex, NodeIndex},
    visit::EdgeRef,
    Direction,
};

use crate::{
    clause::ClauseKind,
    pool::{DependencyId, Pool},
    solvable::SolvableId,
    solver::{ClauseId, Solver},
};

/// A node of the problem graph.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum ProblemNode {
    /// A concrete package candidate (or the root).
    Solvable(SolvableId),
    /// The sink for requirements that have no candidates at all.
    UnresolvedDependency,
}

impl ProblemNode {
    fn solvable_id(self) -> SolvableId {
        match self {
            ProblemNode::Solvable(solvable_id) => solvable_id,
            ProblemNode::UnresolvedDependency => {
                panic!("expected solvable node, found unresolved dependency")
            }
        }
    }
}

/// An edge of the problem graph, labelled with the dependency that
/// forced the constraint.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ProblemEdge {
    /// The source requires one of the targets via this dependency.
    Requires(DependencyId),
    /// The source conflicts with the target.
    Conflict(Conflict),
}

impl ProblemEdge {
    fn try_requires(self) -> Option<DependencyId> {
        match self {
            ProblemEdge::Requires(dep) => Some(dep),
            ProblemEdge::Conflict(_) => None,
        }
    }

    fn requires(self) -> DependencyId {
        match self {
            ProblemEdge::Requires(dep) => dep,
            ProblemEdge::Conflict(_) => panic!("expected requires edge, found conflict"),
        }
    }
}

/// The reason two nodes conflict.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Conflict {
    /// The target is excluded because another candidate of its name is
    /// locked.
    Locked(SolvableId),
    /// The target violates a `constrains` bound of the source.
    Constrains(DependencyId),
    /// Only one candidate per package name may be installed.
    ForbidMultipleInstances,
    /// The target is excluded by a policy job (strict priority, a
    /// forbidden downgrade, or an erase request).
    ExcludedByPolicy,
}

/// Nodes that were merged during simplification because they are
/// interchangeable for the explanation.
pub struct MergedProblemNode {
    /// The solvables that were merged.
    pub ids: Vec<SolvableId>,
}

/// The clauses that participate in an unsolvable outcome.
#[derive(Debug)]
pub struct Problem {
    clauses: Vec<ClauseId>,
}

impl Problem {
    pub(crate) fn default() -> Self {
        Self {
            clauses: Vec::new(),
        }
    }

    pub(crate) fn add_clause(&mut self, clause_id: ClauseId) {
        if !self.clauses.contains(&clause_id) {
            self.clauses.push(clause_id);
        }
    }

    /// Builds the rooted problem graph: user requirements at the top,
    /// conflicting transitive requirements below, terminal nodes
    /// carrying the concrete conflicts.
    pub fn graph(&self, solver: &Solver) -> ProblemGraph {
        let mut graph = DiGraph::<ProblemNode, ProblemEdge>::default();
        let mut nodes: FxHashMap<SolvableId, NodeIndex> = FxHashMap::default();

        let root_node = Self::add_node(&mut graph, &mut nodes, SolvableId::root());
        let unresolved_node = graph.add_node(ProblemNode::UnresolvedDependency);

        for clause_id in &self.clauses {
            let clause = &solver.clauses[clause_id.index()];
            match clause.kind {
                ClauseKind::InstallRoot => (),
                ClauseKind::Learnt(..) => unreachable!(),
                ClauseKind::Requires(package_id, dep) => {
                    let package_node = Self::add_node(&mut graph, &mut nodes, package_id);

                    let candidates = solver.candidates.candidates(dep);
                    if candidates.is_empty() {
                        graph.add_edge(package_node, unresolved_node, ProblemEdge::Requires(dep));
                    } else {
                        for &candidate_id in candidates {
                            let candidate_node =
                                Self::add_node(&mut graph, &mut nodes, candidate_id);
                            graph.add_edge(package_node, candidate_node, ProblemEdge::Requires(dep));
                        }
                    }
                }
                ClauseKind::ForbidMultipleInstances(instance1_id, instance2_id) => {
                    let node1_id = Self::add_node(&mut graph, &mut nodes, instance1_id);
                    let node2_id = Self::add_node(&mut graph, &mut nodes, instance2_id);

                    let conflict = if instance1_id.is_root() {
                        Conflict::Locked(instance2_id)
                    } else {
                        Conflict::ForbidMultipleInstances
                    };
                    graph.add_edge(node1_id, node2_id, ProblemEdge::Conflict(conflict));
                }
                ClauseKind::Constrains(package_id, violator_id) => {
                    let package_node = Self::add_node(&mut graph, &mut nodes, package_id);
                    let violator_node = Self::add_node(&mut graph, &mut nodes, violator_id);

                    let violator_name = solver.pool().resolve_solvable(violator_id).name_id();
                    let dep = solver
                        .pool()
                        .resolve_solvable(package_id)
                        .constrains()
                        .iter()
                        .copied()
                        .find(|&dep| solver.pool().resolve_dependency(dep).name == violator_name)
                        .expect("the constrains clause has a matching dependency");

                    graph.add_edge(
                        package_node,
                        violator_node,
                        ProblemEdge::Conflict(Conflict::Constrains(dep)),
                    );
                }
                ClauseKind::Forbid(solvable_id) => {
                    let node = Self::add_node(&mut graph, &mut nodes, solvable_id);
                    graph.add_edge(
                        root_node,
                        node,
                        ProblemEdge::Conflict(Conflict::ExcludedByPolicy),
                    );
                }
            }
        }

        let unresolved_node = if graph
            .edges_directed(unresolved_node, Direction::Incoming)
            .next()
            .is_none()
        {
            graph.remove_node(unresolved_node);
            None
        } else {
            Some(unresolved_node)
        };

        ProblemGraph {
            graph,
            root_node,
            unresolved_dependency_node: unresolved_node,
        }
    }

    fn add_node(
        graph: &mut DiGraph<ProblemNode, ProblemEdge>,
        nodes: &mut FxHashMap<SolvableId, NodeIndex>,
        solvable_id: SolvableId,
    ) -> NodeIndex {
        *nodes
            .entry(solvable_id)
            .or_insert_with(|| graph.add_node(ProblemNode::Solvable(solvable_id)))
    }

    /// Renders the problem as a user-friendly indented tree.
    pub fn display_user_friendly<'a>(&self, solver: &'a Solver) -> DisplayUnsat<'a> {
        let graph = self.graph(solver);
        DisplayUnsat::new(graph, solver)
    }
}

/// The rooted DAG of an unsolvable problem. Cycles between packages are
/// possible; the renderer keeps a visited set so it cannot loop.
pub struct ProblemGraph {
    graph: DiGraph<ProblemNode, ProblemEdge>,
    root_node: NodeIndex,
    unresolved_dependency_node: Option<NodeIndex>,
}

impl ProblemGraph {
    /// The edges leaving the root: the user requirements involved in
    /// the conflict.
    pub fn root_requirements(&self) -> Vec<DependencyId> {
        self.graph
            .edges(self.root_node)
            .filter_map(|e| e.weight().try_requires())
            .sorted()
            .dedup()
            .collect()
    }

    /// All `requires` edges as `(source, dependency, target)` triples,
    /// with the target `None` for unresolved dependencies. Useful for
    /// asserting on the shape of the conflict.
    pub fn requirement_edges(&self) -> Vec<(Option<SolvableId>, DependencyId, Option<SolvableId>)> {
        self.graph
            .edge_references()
            .filter_map(|edge| {
                let dep = edge.weight().try_requires()?;
                let source = match self.graph[edge.source()] {
                    ProblemNode::Solvable(id) if id.is_root() => None,
                    ProblemNode::Solvable(id) => Some(id),
                    ProblemNode::UnresolvedDependency => None,
                };
                let target = match self.graph[edge.target()] {
                    ProblemNode::Solvable(id) => Some(id),
                    ProblemNode::UnresolvedDependency => None,
                };
                Some((source, dep, target))
            })
            .collect()
    }

    /// The solvables that are the target of a conflict edge: the
    /// conflict nodes of the graph.
    pub fn conflicting_solvables(&self) -> Vec<SolvableId> {
        self.graph
            .edge_references()
            .filter(|e| matches!(e.weight(), ProblemEdge::Conflict(..)))
            .flat_map(|e| {
                let mut ids = Vec::new();
                if let ProblemNode::Solvable(id) = self.graph[e.source()] {
                    if !id.is_root() {
                        ids.push(id);
                    }
                }
                if let ProblemNode::Solvable(id) = self.graph[e.target()] {
                    if !id.is_root() {
                        ids.push(id);
                    }
                }
                ids
            })
            .sorted()
            .dedup()
            .collect()
    }

    /// Merges nodes with the same name, predecessors and successors;
    /// they are interchangeable as far as the explanation goes.
    fn simplify(&self, pool: &Pool) -> FxHashMap<SolvableId, Rc<MergedProblemNode>> {
        let graph = &self.graph;

        let mut maybe_merge = FxHashMap::default();
        for node_id in graph.node_indices() {
            let candidate = match graph[node_id] {
                ProblemNode::UnresolvedDependency => continue,
                ProblemNode::Solvable(solvable_id) => {
                    if solvable_id.is_root() {
                        continue;
                    }
                    solvable_id
                }
            };

            if graph
                .edges_directed(node_id, Direction::Incoming)
                .any(|e| matches!(e.weight(), ProblemEdge::Conflict(..)))
            {
                // Nodes targeted by a conflict are never merged.
                continue;
            }

            let predecessors: Vec<_> = graph
                .edges_directed(node_id, Direction::Incoming)
                .map(|e| e.source())
                .sorted_unstable()
                .collect();
            let successors: Vec<_> = graph
                .edges(node_id)
                .map(|e| (e.target(), *e.weight()))
                .sorted_unstable()
                .collect();

            let name = pool.resolve_solvable(candidate).name_id();

            maybe_merge
                .entry((name, predecessors, successors))
                .or_insert_with(Vec::new)
                .push((node_id, candidate));
        }

        let mut merged_candidates = FxHashMap::default();
        for mut m in maybe_merge.into_values() {
            if m.len() > 1 {
                m.sort_unstable_by(|&(_, a), &(_, b)| {
                    pool.resolve_solvable(a)
                        .record
                        .package_record
                        .version
                        .cmp(&pool.resolve_solvable(b).record.package_record.version)
                });
                let m = Rc::new(MergedProblemNode {
                    ids: m.into_iter().map(|(_, snd)| snd).collect(),
                });
                for &id in &m.ids {
                    merged_candidates.insert(id, m.clone());
                }
            }
        }

        merged_candidates
    }

    /// A package is installable if all paths from it to the leaves pass
    /// only through non-conflicting edges.
    fn get_installable_set(&self) -> FxHashSet<NodeIndex> {
        let mut non_installable: FxHashSet<NodeIndex> = FxHashSet::default();

        // The starting set of conflicting edges: edges into the
        // unresolved node and explicit conflict edges.
        let mut conflicting_edges: Vec<_> = Vec::new();
        if let Some(unresolved) = self.unresolved_dependency_node {
            conflicting_edges.extend(
                self.graph
                    .edges_directed(unresolved, Direction::Incoming)
                    .map(|e| e.id()),
            );
        }
        conflicting_edges.extend(
            self.graph
                .edge_references()
                .filter(|e| matches!(e.weight(), ProblemEdge::Conflict(..)))
                .map(|e| e.id()),
        );

        // Propagate conflicts up the graph.
        while let Some(edge) = conflicting_edges.pop() {
            let (source, _) = self
                .graph
                .edge_endpoints(edge)
                .expect("edge is part of the graph");
            if non_installable.insert(source) {
                conflicting_edges.extend(
                    self.graph
                        .edges_directed(source, Direction::Incoming)
                        .map(|e| e.id()),
                );
            }
        }

        self.graph
            .node_indices()
            .filter(|nx| !non_installable.contains(nx))
            .collect()
    }
}

/// Renders an unsolvable problem as an indented tree of requirements
/// and conflicts.
pub struct DisplayUnsat<'a> {
    graph: ProblemGraph,
    merged_candidates: FxHashMap<SolvableId, Rc<MergedProblemNode>>,
    installable_set: FxHashSet<NodeIndex>,
    solver: &'a Solver,
}

impl<'a> DisplayUnsat<'a> {
    pub(crate) fn new(graph: ProblemGraph, solver: &'a Solver) -> Self {
        let merged_candidates = graph.simplify(solver.pool());
        let installable_set = graph.get_installable_set();

        Self {
            graph,
            merged_candidates,
            installable_set,
            solver,
        }
    }
}

impl fmt::Display for DisplayUnsat<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        enum DisplayOp {
            Requirement(DependencyId, Vec<EdgeIndex>),
            Candidate(NodeIndex),
        }

        let graph = &self.graph.graph;
        let pool = self.solver.pool();
        let installable_nodes = &self.installable_set;
        let mut reported: FxHashSet<SolvableId> = FxHashSet::default();

        writeln!(f, "The following packages are incompatible")?;

        // Grouped requires edges leaving the root, conflicting ones
        // last so they print closest to the summary line.
        let mut stack = graph
            .edges(self.graph.root_node)
            .filter(|e| e.weight().try_requires().is_some())
            .chunk_by(|e| e.weight().requires())
            .into_iter()
            .map(|(dep, group)| {
                let edges: Vec<_> = group.map(|e| e.id()).collect();
                (dep, edges)
            })
            .sorted_by_key(|(_, edges)| {
                edges
                    .iter()
                    .any(|&edge| installable_nodes.contains(&graph.edge_endpoints(edge).unwrap().1))
            })
            .map(|(dep, edges)| (DisplayOp::Requirement(dep, edges), 0))
            .collect::<Vec<_>>();

        while let Some((node, depth)) = stack.pop() {
            let indent = " ".repeat(depth * 4);

            match node {
                DisplayOp::Requirement(dep, edges) => {
                    debug_assert!(!edges.is_empty());

                    let installable = edges.iter().any(|&e| {
                        let (_, target) = graph.edge_endpoints(e).unwrap();
                        installable_nodes.contains(&target)
                    });

                    let req = &pool.resolve_dependency(dep).canonical;
                    let target_nx = graph.edge_endpoints(edges[0]).unwrap().1;
                    let missing =
                        edges.len() == 1 && graph[target_nx] == ProblemNode::UnresolvedDependency;
                    if missing {
                        // No candidates for the requirement at all.
                        if depth == 0 {
                            writeln!(f, "{indent}|-- No candidates where found for {req}.")?;
                        } else {
                            writeln!(f, "{indent}|-- {req}, for which no candidates where found.")?;
                        }
                    } else if installable {
                        // Installable: only mentioned for top-level
                        // requirements.
                        if depth == 0 {
                            writeln!(
                                f,
                                "|-- {req} can be installed with any of the following options:"
                            )?;
                        } else {
                            writeln!(f, "{indent}|-- {req}, which can be installed with any of the following options:")?;
                        }

                        stack.extend(
                            edges
                                .iter()
                                .filter(|&&e| {
                                    installable_nodes.contains(&graph.edge_endpoints(e).unwrap().1)
                                })
                                .map(|&e| {
                                    (
                                        DisplayOp::Candidate(graph.edge_endpoints(e).unwrap().1),
                                        depth + 1,
                                    )
                                }),
                        );
                    } else {
                        // The conflicting requirement is deeper down.
                        if depth == 0 {
                            writeln!(f, "|-- {req} cannot be installed because there are no viable options:")?;
                        } else {
                            writeln!(f, "{indent}|-- {req}, which cannot be installed because there are no viable options:")?;
                        }

                        stack.extend(edges.iter().map(|&e| {
                            (
                                DisplayOp::Candidate(graph.edge_endpoints(e).unwrap().1),
                                depth + 1,
                            )
                        }));
                    }
                }
                DisplayOp::Candidate(candidate) => {
                    let solvable_id = graph[candidate].solvable_id();

                    if reported.contains(&solvable_id) {
                        continue;
                    }

                    let solvable = pool.resolve_solvable(solvable_id);
                    let name = &solvable.record.package_record.name;
                    let version = if let Some(merged) = self.merged_candidates.get(&solvable_id) {
                        reported.extend(merged.ids.iter().copied());
                        merged
                            .ids
                            .iter()
                            .map(|&id| {
                                pool.resolve_solvable(id)
                                    .record
                                    .package_record
                                    .version
                                    .to_string()
                            })
                            .join(" | ")
                    } else {
                        solvable.record.package_record.version.to_string()
                    };

                    let is_conflict_source = graph
                        .edges(candidate)
                        .any(|e| e.weight().try_requires().is_none());
                    let is_leaf = graph.edges(candidate).next().is_none();

                    if is_conflict_source {
                        writeln!(f, "{indent}|-- {name} {version}, which conflicts with the versions reported above.")?;
                    } else if is_leaf {
                        writeln!(f, "{indent}|-- {name} {version}")?;
                    } else {
                        writeln!(f, "{indent}|-- {name} {version} would require")?;
                        let requirements = graph
                            .edges(candidate)
                            .chunk_by(|e| e.weight().requires())
                            .into_iter()
                            .map(|(dep, group)| {
                                let edges: Vec<_> = group.map(|e| e.id()).collect();
                                (dep, edges)
                            })
                            .sorted_by_key(|(_, edges)| {
                                edges.iter().any(|&edge| {
                                    installable_nodes
                                        .contains(&graph.edge_endpoints(edge).unwrap().1)
                                })
                            })
                            .map(|(dep, edges)| (DisplayOp::Requirement(dep, edges), depth + 1));

                        stack.extend(requirements);
                    }
                }
            }
        }

        // Conflicts caused by locked or excluded candidates hang off
        // the root.
        for e in graph.edges(self.graph.root_node) {
            let conflict = match e.weight() {
                ProblemEdge::Requires(_) => continue,
                ProblemEdge::Conflict(conflict) => conflict,
            };

            match conflict {
                Conflict::Constrains(_) | Conflict::ForbidMultipleInstances => unreachable!(),
                &Conflict::Locked(solvable_id) => {
                    let locked = pool.resolve_solvable(solvable_id);
                    writeln!(
                        f,
                        "|-- {} {} is locked, but another version is required as reported above",
                        locked.record.package_record.name, locked.record.package_record.version
                    )?;
                }
                Conflict::ExcludedByPolicy => {
                    let ProblemNode::Solvable(solvable_id) = graph[e.target()] else {
                        continue;
                    };
                    let excluded = pool.resolve_solvable(solvable_id);
                    writeln!(
                        f,
                        "|-- {} {} is excluded by the current policy (channel priority or downgrade restrictions)",
                        excluded.record.package_record.name,
                        excluded.record.package_record.version
                    )?;
                }
            }
        }

        Ok(())
    }
}
