//! Unit tests for flow graph layout and graph algorithms

use std::collections::HashSet;

use workbench_api::graph::{
    LEVEL_SPACING, LayoutDirection, REDUCTION_EDGE_LIMIT, SIBLING_SPACING, connect_orphans,
    detect_cycles, levels, linearize, positions, reachable_from, transitive_reduction,
    would_create_cycle,
};
use workbench_api::ids::Id;
use workbench_api::models::{Edge, EdgeHandle, Node, NodeConfig};

struct Graph {
    flow: Id,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Graph {
    fn new() -> Self {
        let flow = Id::new();
        let start = Node::new(Id::new(), flow, "Start", NodeConfig::ManualStart);
        Self {
            flow,
            nodes: vec![start],
            edges: Vec::new(),
        }
    }

    fn start(&self) -> Id {
        self.nodes[0].id
    }

    fn add(&mut self, name: &str) -> Id {
        let node = Node::new(Id::new(), self.flow, name, NodeConfig::NoOp);
        let id = node.id;
        self.nodes.push(node);
        id
    }

    fn link(&mut self, from: Id, to: Id, handle: EdgeHandle) -> Id {
        let edge = Edge::new(Id::new(), self.flow, from, to, handle);
        let id = edge.id;
        self.edges.push(edge);
        id
    }
}

#[test]
fn test_chain_layout_horizontal() {
    let mut g = Graph::new();
    let s = g.start();
    let a = g.add("a");
    let b = g.add("b");
    g.link(s, a, EdgeHandle::Default);
    g.link(a, b, EdgeHandle::Default);

    let pos = positions(s, &g.nodes, &g.edges, LayoutDirection::Horizontal);
    assert_eq!(pos[&s].x, 0.0);
    assert_eq!(pos[&a].x, LEVEL_SPACING);
    assert_eq!(pos[&b].x, 2.0 * LEVEL_SPACING);
    assert!(pos.values().all(|p| p.y == 0.0));
}

#[test]
fn test_vertical_layout_swaps_axes() {
    let mut g = Graph::new();
    let s = g.start();
    let a = g.add("a");
    let b = g.add("b");
    g.link(s, a, EdgeHandle::Default);
    g.link(s, b, EdgeHandle::Default);

    let pos = positions(s, &g.nodes, &g.edges, LayoutDirection::Vertical);
    assert_eq!(pos[&a].y, LEVEL_SPACING);
    assert_eq!(pos[&b].y, LEVEL_SPACING);
    assert_eq!((pos[&a].x - pos[&b].x).abs(), SIBLING_SPACING);
    assert_eq!(pos[&a].x + pos[&b].x, 0.0);
}

#[test]
fn test_three_siblings_centre_on_middle() {
    let mut g = Graph::new();
    let s = g.start();
    let kids: Vec<Id> = ["x", "y", "z"].iter().map(|n| g.add(n)).collect();
    for k in &kids {
        g.link(s, *k, EdgeHandle::Default);
    }

    let pos = positions(s, &g.nodes, &g.edges, LayoutDirection::Horizontal);
    let mut ys: Vec<f64> = kids.iter().map(|k| pos[k].y).collect();
    ys.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(ys, vec![-SIBLING_SPACING, 0.0, SIBLING_SPACING]);
}

#[test]
fn test_unreachable_nodes_get_trailing_level() {
    let mut g = Graph::new();
    let s = g.start();
    let a = g.add("a");
    let orphan = g.add("orphan");
    let orphan_child = g.add("orphan-child");
    g.link(s, a, EdgeHandle::Default);
    g.link(orphan, orphan_child, EdgeHandle::Default);

    let lv = levels(s, &g.nodes, &g.edges);
    assert_eq!(lv[&a], 1);
    assert_eq!(lv[&orphan], 2);
    assert_eq!(lv[&orphan_child], 2);
}

#[test]
fn test_levels_survive_cycles() {
    let mut g = Graph::new();
    let s = g.start();
    let a = g.add("a");
    let b = g.add("b");
    g.link(s, a, EdgeHandle::Default);
    g.link(a, b, EdgeHandle::Default);
    g.link(b, a, EdgeHandle::Default);

    let lv = levels(s, &g.nodes, &g.edges);
    assert_eq!(lv[&s], 0);
    assert_eq!(lv[&a], 1);
    assert_eq!(lv[&b], 2);
}

#[test]
fn test_reduction_keeps_routing_edges() {
    let mut g = Graph::new();
    let s = g.start();
    let cond = g.add("cond");
    let target = g.add("target");
    g.link(s, cond, EdgeHandle::Default);
    g.link(cond, target, EdgeHandle::Default);
    let branch = g.link(s, target, EdgeHandle::True);

    let reduced = transitive_reduction(&g.edges);
    assert_eq!(reduced.len(), 3);
    assert!(reduced.iter().any(|e| e.id == branch));
}

#[test]
fn test_reduction_preserves_reachability_on_diamond() {
    let mut g = Graph::new();
    let s = g.start();
    let a = g.add("a");
    let b = g.add("b");
    let end = g.add("end");
    g.link(s, a, EdgeHandle::Default);
    g.link(s, b, EdgeHandle::Default);
    g.link(a, end, EdgeHandle::Default);
    g.link(b, end, EdgeHandle::Default);
    g.link(s, end, EdgeHandle::Default);

    let reduced = transitive_reduction(&g.edges);
    assert_eq!(reduced.len(), 4);
    assert_eq!(
        reachable_from([s], &g.edges, |_| true),
        reachable_from([s], &reduced, |_| true)
    );
}

#[test]
fn test_reduction_skipped_above_limit() {
    let mut g = Graph::new();
    let s = g.start();
    let a = g.add("a");
    let b = g.add("b");
    g.link(s, a, EdgeHandle::Default);
    g.link(a, b, EdgeHandle::Default);
    // Parallel shortcuts pad the edge list past the limit.
    for _ in 0..REDUCTION_EDGE_LIMIT {
        g.link(s, b, EdgeHandle::Default);
    }
    let reduced = transitive_reduction(&g.edges);
    assert_eq!(reduced.len(), g.edges.len());
}

#[test]
fn test_connect_orphans_only_targets_roots() {
    let mut g = Graph::new();
    let s = g.start();
    let a = g.add("a");
    let b = g.add("b");
    let c = g.add("c");
    g.link(a, b, EdgeHandle::Default);

    let added = connect_orphans(s, &g.nodes, &g.edges, Id::new);
    let targets: HashSet<Id> = added.iter().map(|e| e.target_id).collect();
    assert_eq!(targets, HashSet::from([a, c]));
    assert!(added.iter().all(|e| e.source_id == s && e.handle == EdgeHandle::Default));
}

#[test]
fn test_linearize_visits_breadth_first() {
    let mut g = Graph::new();
    let s = g.start();
    let b = g.add("b");
    let a = g.add("a");
    let deep = g.add("0-deep");
    g.link(s, b, EdgeHandle::Default);
    g.link(s, a, EdgeHandle::Default);
    g.link(a, deep, EdgeHandle::Default);

    assert_eq!(linearize(s, &g.nodes, &g.edges), vec![s, a, b, deep]);
}

#[test]
fn test_self_loop_is_a_cycle() {
    let mut g = Graph::new();
    let s = g.start();
    let a = g.add("a");
    g.link(s, a, EdgeHandle::Default);
    assert!(!detect_cycles(&g.edges));
    let back = Edge::new(Id::new(), g.flow, a, a, EdgeHandle::Default);
    assert!(would_create_cycle(&g.edges, &back));
}
