//! Graph algorithms over flow graphs.
//!
//! Pure functions: level assignment, placement, transitive reduction, orphan
//! connection, linearisation and cycle detection. Uses petgraph for topological work.

use crate::ids::Id;
use crate::models::{Edge, EdgeHandle, Node, Position};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Reduction is skipped above this many edges.
pub const REDUCTION_EDGE_LIMIT: usize = 2000;

/// Distance between levels along the flow direction.
pub const LEVEL_SPACING: f64 = 300.0;
/// Distance between siblings on the secondary axis.
pub const SIBLING_SPACING: f64 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutDirection {
    #[default]
    Horizontal,
    Vertical,
}

/// Outgoing and incoming edges per node.
#[derive(Debug, Default)]
pub struct Adjacency {
    pub outgoing: HashMap<Id, Vec<(Id, EdgeHandle)>>,
    pub incoming: HashMap<Id, Vec<(Id, EdgeHandle)>>,
}

impl Adjacency {
    pub fn successors(&self, id: Id) -> &[(Id, EdgeHandle)] {
        self.outgoing.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, id: Id) -> &[(Id, EdgeHandle)] {
        self.incoming.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub fn adjacency(edges: &[Edge]) -> Adjacency {
    let mut adj = Adjacency::default();
    for e in edges {
        adj.outgoing
            .entry(e.source_id)
            .or_default()
            .push((e.target_id, e.handle));
        adj.incoming
            .entry(e.target_id)
            .or_default()
            .push((e.source_id, e.handle));
    }
    adj
}

fn build_graph(node_ids: impl IntoIterator<Item = Id>, edges: &[Edge]) -> (DiGraph<Id, ()>, HashMap<Id, NodeIndex>) {
    let mut graph = DiGraph::<Id, ()>::new();
    let mut index = HashMap::new();
    for id in node_ids {
        index.entry(id).or_insert_with(|| graph.add_node(id));
    }
    for e in edges {
        let s = *index
            .entry(e.source_id)
            .or_insert_with(|| graph.add_node(e.source_id));
        let t = *index
            .entry(e.target_id)
            .or_insert_with(|| graph.add_node(e.target_id));
        graph.add_edge(s, t, ());
    }
    (graph, index)
}

/// Whether the edge set contains a directed cycle.
pub fn detect_cycles(edges: &[Edge]) -> bool {
    let (graph, _) = build_graph(std::iter::empty(), edges);
    is_cyclic_directed(&graph)
}

/// Check if adding an edge would create a cycle
pub fn would_create_cycle(edges: &[Edge], candidate: &Edge) -> bool {
    let mut all = edges.to_vec();
    all.push(candidate.clone());
    detect_cycles(&all)
}

/// Nodes reachable from `sources` (sources included) over edges accepted by `follow`.
pub fn reachable_from(
    sources: impl IntoIterator<Item = Id>,
    edges: &[Edge],
    follow: impl Fn(&Edge) -> bool,
) -> HashSet<Id> {
    let adj: HashMap<Id, Vec<Id>> = edges.iter().filter(|e| follow(e)).fold(
        HashMap::new(),
        |mut acc, e| {
            acc.entry(e.source_id).or_default().push(e.target_id);
            acc
        },
    );
    let mut seen = HashSet::new();
    let mut stack: Vec<Id> = sources.into_iter().collect();
    while let Some(id) = stack.pop() {
        if seen.insert(id) {
            if let Some(next) = adj.get(&id) {
                stack.extend(next.iter().copied());
            }
        }
    }
    seen
}

/// Level of every node: start is 0, others `max(parent levels) + 1`; nodes not
/// reachable from start share the level after the deepest reachable one.
pub fn levels(start: Id, nodes: &[Node], edges: &[Edge]) -> HashMap<Id, usize> {
    let reachable = reachable_from([start], edges, |_| true);
    let inner: Vec<Edge> = edges
        .iter()
        .filter(|e| reachable.contains(&e.source_id) && reachable.contains(&e.target_id))
        .cloned()
        .collect();

    let mut level: HashMap<Id, usize> = HashMap::from([(start, 0)]);
    let (graph, _) = build_graph(reachable.iter().copied(), &inner);
    match toposort(&graph, None) {
        Ok(order) => {
            let adj = adjacency(&inner);
            for ix in order {
                let id = graph[ix];
                if id == start {
                    continue;
                }
                let depth = adj
                    .predecessors(id)
                    .iter()
                    .filter_map(|(p, _)| level.get(p))
                    .max()
                    .map_or(0, |d| d + 1);
                level.insert(id, depth);
            }
        }
        Err(_) => {
            // Cyclic input: fall back to BFS distance.
            let adj = adjacency(&inner);
            let mut queue = VecDeque::from([start]);
            while let Some(id) = queue.pop_front() {
                let d = level[&id];
                for (next, _) in adj.successors(id) {
                    if !level.contains_key(next) {
                        level.insert(*next, d + 1);
                        queue.push_back(*next);
                    }
                }
            }
        }
    }

    let orphan_level = level.values().max().map_or(0, |m| m + 1);
    for node in nodes {
        level.entry(node.id).or_insert(orphan_level);
    }
    level
}

/// Levels measured from the flow's own start node. A flow without one puts every node on
/// level 0.
pub fn node_depths(nodes: &[Node], edges: &[Edge]) -> HashMap<Id, usize> {
    match nodes.iter().find(|n| n.is_start()) {
        Some(start) => levels(start.id, nodes, edges),
        None => nodes.iter().map(|n| (n.id, 0)).collect(),
    }
}

/// Grid placement by level, siblings centred on the secondary axis.
pub fn positions(
    start: Id,
    nodes: &[Node],
    edges: &[Edge],
    direction: LayoutDirection,
) -> HashMap<Id, Position> {
    let levels = levels(start, nodes, edges);
    let mut by_level: BTreeMap<usize, Vec<Id>> = BTreeMap::new();
    for node in nodes {
        by_level.entry(levels[&node.id]).or_default().push(node.id);
    }

    let mut out = HashMap::new();
    for (level, mut ids) in by_level {
        ids.sort();
        let centre = (ids.len() as f64 - 1.0) / 2.0;
        for (i, id) in ids.into_iter().enumerate() {
            let primary = level as f64 * LEVEL_SPACING;
            let secondary = (i as f64 - centre) * SIBLING_SPACING;
            let pos = match direction {
                LayoutDirection::Horizontal => Position {
                    x: primary,
                    y: secondary,
                },
                LayoutDirection::Vertical => Position {
                    x: secondary,
                    y: primary,
                },
            };
            out.insert(id, pos);
        }
    }
    out
}

/// Drops default edges implied by a longer path of default edges.
///
/// Non-default handles carry routing meaning and are never removed. Inputs above
/// [`REDUCTION_EDGE_LIMIT`] are returned unchanged.
pub fn transitive_reduction(edges: &[Edge]) -> Vec<Edge> {
    if edges.len() > REDUCTION_EDGE_LIMIT {
        return edges.to_vec();
    }
    let defaults: Vec<&Edge> = edges
        .iter()
        .filter(|e| e.handle == EdgeHandle::Default)
        .collect();
    let mut adj: HashMap<Id, Vec<(Id, Id)>> = HashMap::new();
    for e in &defaults {
        adj.entry(e.source_id).or_default().push((e.target_id, e.id));
    }

    let redundant: HashSet<Id> = defaults
        .iter()
        .filter(|edge| {
            let mut seen = HashSet::new();
            let mut stack: Vec<Id> = adj
                .get(&edge.source_id)
                .into_iter()
                .flatten()
                .filter(|(_, eid)| *eid != edge.id)
                .map(|(t, _)| *t)
                .collect();
            while let Some(id) = stack.pop() {
                if id == edge.target_id {
                    return true;
                }
                if seen.insert(id) {
                    if let Some(next) = adj.get(&id) {
                        stack.extend(next.iter().map(|(t, _)| *t));
                    }
                }
            }
            false
        })
        .map(|e| e.id)
        .collect();

    edges
        .iter()
        .filter(|e| !redundant.contains(&e.id))
        .cloned()
        .collect()
}

/// Default edges from `start` to every other node that has no incoming edge.
pub fn connect_orphans(
    start: Id,
    nodes: &[Node],
    edges: &[Edge],
    mut next_id: impl FnMut() -> Id,
) -> Vec<Edge> {
    let targets: HashSet<Id> = edges.iter().map(|e| e.target_id).collect();
    nodes
        .iter()
        .filter(|n| n.id != start && !targets.contains(&n.id))
        .map(|n| Edge::new(next_id(), n.flow_id, start, n.id, EdgeHandle::Default))
        .collect()
}

/// Export order: BFS from start visiting siblings by name, then unreached nodes by name.
pub fn linearize(start: Id, nodes: &[Node], edges: &[Edge]) -> Vec<Id> {
    let names: HashMap<Id, &str> = nodes.iter().map(|n| (n.id, n.name.as_str())).collect();
    let adj = adjacency(edges);
    let mut order = Vec::with_capacity(nodes.len());
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    if names.contains_key(&start) {
        seen.insert(start);
        queue.push_back(start);
    }
    while let Some(id) = queue.pop_front() {
        order.push(id);
        let mut next: Vec<Id> = adj
            .successors(id)
            .iter()
            .map(|(t, _)| *t)
            .filter(|t| names.contains_key(t))
            .collect();
        next.sort_by(|a, b| names[a].cmp(names[b]).then(a.cmp(b)));
        for t in next {
            if seen.insert(t) {
                queue.push_back(t);
            }
        }
    }
    let mut rest: Vec<&Node> = nodes.iter().filter(|n| !seen.contains(&n.id)).collect();
    rest.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    order.extend(rest.into_iter().map(|n| n.id));
    order
}
