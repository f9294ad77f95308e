//! The canonical in-memory graph of pipeline stages.
//!
//! Nodes keep insertion order (rendering order). Edges only ever reference
//! live node ids; anything else is dropped on the way in. Ground truth
//! (status, metrics, `is_active`) is written through the mutators here by the
//! merge coordinator. The animation clock only gets the transient fields via
//! [`GraphModel::flows_mut`] and [`GraphModel::animations_mut`].

use std::collections::{HashMap, HashSet};

use crate::status::NodeStatus;
use crate::types::{Edge, EdgeKey, Node, NodeId, NodeMetrics, SnapshotPayload, wrap_flow};

/// Visual-only per-node state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAnimation {
    /// Simulated `processed` shown while no real progress arrives.
    pub simulated: Option<u64>,
    /// A real progress update arrived since the last animation tick.
    pub fresh: bool,
}

/// A node plus its transient animation state.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub node: Node,
    pub animation: NodeAnimation,
}

/// Partial update of a node's ground truth, applied in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub status: Option<NodeStatus>,
    pub metrics: Option<NodeMetrics>,
    /// The update carries real progress: mark fresh and drop the simulation.
    pub progress_reported: bool,
}

/// What `apply_edge_activity` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeChange {
    Created,
    Activated,
    Deactivated,
    Unchanged,
    UnknownEndpoint,
}

/// Summary of a `replace` call, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceReport {
    pub nodes: usize,
    pub edges: usize,
    pub dropped_edges: usize,
    pub duplicate_nodes: usize,
    pub clamped_metrics: usize,
    pub preserved_flows: usize,
}

/// Ordered nodes and referentially intact edges.
#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    nodes: Vec<NodeEntry>,
    node_index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    edge_index: HashMap<EdgeKey, usize>,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically swap in a snapshot's nodes and edges.
    ///
    /// Edges whose identity survives keep their `flow_progress` unless they
    /// go from inactive to active. Nodes keep their simulated progress only
    /// while it is still ahead of the new ground truth.
    pub fn replace(&mut self, snapshot: &SnapshotPayload) -> ReplaceReport {
        let mut report = ReplaceReport::default();

        let mut nodes = Vec::with_capacity(snapshot.nodes.len());
        let mut node_index = HashMap::with_capacity(snapshot.nodes.len());
        for incoming in &snapshot.nodes {
            if node_index.contains_key(&incoming.id) {
                tracing::warn!(node_id = %incoming.id, "Duplicate node id in snapshot, keeping first");
                report.duplicate_nodes += 1;
                continue;
            }
            let mut node = incoming.clone();
            if let Some(metrics) = node.metrics.as_mut() {
                if metrics.clamp() {
                    tracing::debug!(node_id = %node.id, "Clamped processed to total in snapshot");
                    report.clamped_metrics += 1;
                }
            }
            let animation = self
                .entry(&node.id)
                .map(|old| carry_animation(&old.animation, &node))
                .unwrap_or_default();
            node_index.insert(node.id.clone(), nodes.len());
            nodes.push(NodeEntry { node, animation });
        }

        let mut edges = Vec::with_capacity(snapshot.edges.len());
        let mut edge_index = HashMap::with_capacity(snapshot.edges.len());
        for incoming in &snapshot.edges {
            if !node_index.contains_key(&incoming.from) || !node_index.contains_key(&incoming.to) {
                tracing::warn!(
                    from = %incoming.from,
                    to = %incoming.to,
                    "Dropping edge with unknown endpoint"
                );
                report.dropped_edges += 1;
                continue;
            }
            let key = incoming.key();
            if edge_index.contains_key(&key) {
                report.dropped_edges += 1;
                continue;
            }
            let mut edge = incoming.clone();
            edge.flow_progress = match self.edge(&key) {
                Some(old) if !old.is_active && edge.is_active => 0.0,
                Some(old) => {
                    report.preserved_flows += 1;
                    old.flow_progress
                }
                None => wrap_flow(edge.flow_progress),
            };
            edge_index.insert(key, edges.len());
            edges.push(edge);
        }

        report.nodes = nodes.len();
        report.edges = edges.len();
        self.nodes = nodes;
        self.node_index = node_index;
        self.edges = edges;
        self.edge_index = edge_index;
        report
    }

    /// Apply a partial update to one node. Returns `false` if the id is unknown.
    pub fn apply_node_update(&mut self, node_id: &str, update: NodeUpdate) -> bool {
        let Some(&idx) = self.node_index.get(node_id) else {
            return false;
        };
        let entry = &mut self.nodes[idx];
        if let Some(status) = update.status {
            entry.node.status = status;
        }
        if let Some(mut metrics) = update.metrics {
            if metrics.clamp() {
                tracing::debug!(node_id = %node_id, "Clamped processed to total");
            }
            entry.node.metrics = Some(metrics);
        }
        if update.progress_reported {
            entry.animation.fresh = true;
            entry.animation.simulated = None;
        }
        if entry.node.status != NodeStatus::Running {
            entry.animation.simulated = None;
        }
        true
    }

    /// Create or update an edge's activity.
    pub fn apply_edge_activity(&mut self, from: &str, to: &str, is_active: bool) -> EdgeChange {
        if !self.contains(from) || !self.contains(to) {
            return EdgeChange::UnknownEndpoint;
        }
        let key = EdgeKey::new(from, to);
        match self.edge_index.get(&key) {
            Some(&idx) => {
                let edge = &mut self.edges[idx];
                match (edge.is_active, is_active) {
                    (false, true) => {
                        edge.is_active = true;
                        edge.flow_progress = 0.0;
                        EdgeChange::Activated
                    }
                    (true, false) => {
                        edge.is_active = false;
                        EdgeChange::Deactivated
                    }
                    _ => EdgeChange::Unchanged,
                }
            }
            None => {
                self.edge_index.insert(key, self.edges.len());
                self.edges.push(Edge::new(from, to, is_active));
                EdgeChange::Created
            }
        }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_index.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.entry(node_id).map(|e| &e.node)
    }

    pub fn entry(&self, node_id: &str) -> Option<&NodeEntry> {
        self.node_index.get(node_id).map(|&idx| &self.nodes[idx])
    }

    /// Nodes in rendering order.
    pub fn entries(&self) -> &[NodeEntry] {
        &self.nodes
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|e| &e.node)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&Edge> {
        self.edge_index.get(key).map(|&idx| &self.edges[idx])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> HashSet<&str> {
        self.node_index.keys().map(String::as_str).collect()
    }

    /// `(is_active, &mut flow_progress)` for every edge.
    pub fn flows_mut(&mut self) -> impl Iterator<Item = (bool, &mut f64)> {
        self.edges
            .iter_mut()
            .map(|edge| (edge.is_active, &mut edge.flow_progress))
    }

    /// Read-only node paired with its mutable animation state.
    pub fn animations_mut(&mut self) -> impl Iterator<Item = (&Node, &mut NodeAnimation)> {
        self.nodes
            .iter_mut()
            .map(|entry| (&entry.node, &mut entry.animation))
    }
}

fn carry_animation(old: &NodeAnimation, node: &Node) -> NodeAnimation {
    let simulated = match (node.status, node.metrics, old.simulated) {
        (NodeStatus::Running, Some(metrics), Some(sim))
            if sim > metrics.processed && sim < metrics.total =>
        {
            Some(sim)
        }
        _ => None,
    };
    NodeAnimation {
        simulated,
        fresh: old.fresh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeKind;
    use pretty_assertions::assert_eq;

    fn pipeline() -> SnapshotPayload {
        SnapshotPayload::new(
            vec![
                Node::new("ingest", NodeKind::Source).with_status(NodeStatus::Success),
                Node::new("extract", NodeKind::Process)
                    .with_status(NodeStatus::Running)
                    .with_metrics(18, 24),
                Node::new("generate", NodeKind::Output),
            ],
            vec![
                Edge::new("ingest", "extract", true),
                Edge::new("extract", "generate", false),
            ],
        )
    }

    #[test]
    fn test_replace_populates_in_order() {
        let mut graph = GraphModel::new();
        let report = graph.replace(&pipeline());
        assert_eq!(report.nodes, 3);
        assert_eq!(report.edges, 2);
        let ids: Vec<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["ingest", "extract", "generate"]);
    }

    #[test]
    fn test_replace_drops_dangling_edges() {
        let mut payload = pipeline();
        payload.edges.push(Edge::new("extract", "ghost", true));
        let mut graph = GraphModel::new();
        let report = graph.replace(&payload);
        assert_eq!(report.dropped_edges, 1);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.edge(&EdgeKey::new("extract", "ghost")).is_none());
    }

    #[test]
    fn test_replace_keeps_first_duplicate_node() {
        let mut payload = pipeline();
        payload
            .nodes
            .push(Node::new("ingest", NodeKind::Output).with_status(NodeStatus::Error));
        let mut graph = GraphModel::new();
        let report = graph.replace(&payload);
        assert_eq!(report.duplicate_nodes, 1);
        assert_eq!(graph.node("ingest").unwrap().kind, NodeKind::Source);
    }

    #[test]
    fn test_replace_clamps_metrics() {
        let mut payload = pipeline();
        payload.nodes[1].metrics = Some(NodeMetrics::new(40, 24));
        let mut graph = GraphModel::new();
        let report = graph.replace(&payload);
        assert_eq!(report.clamped_metrics, 1);
        assert_eq!(graph.node("extract").unwrap().metrics.unwrap().processed, 24);
    }

    #[test]
    fn test_replace_preserves_flow_progress_for_same_identity() {
        let mut graph = GraphModel::new();
        graph.replace(&pipeline());
        for (active, flow) in graph.flows_mut() {
            if active {
                *flow = 0.42;
            }
        }
        let report = graph.replace(&pipeline());
        assert_eq!(report.preserved_flows, 2);
        let edge = graph.edge(&EdgeKey::new("ingest", "extract")).unwrap();
        assert_eq!(edge.flow_progress, 0.42);
    }

    #[test]
    fn test_replace_resets_flow_on_activation() {
        let mut graph = GraphModel::new();
        graph.replace(&pipeline());
        for (_, flow) in graph.flows_mut() {
            *flow = 0.6;
        }
        let mut payload = pipeline();
        payload.edges[1].is_active = true;
        graph.replace(&payload);
        let edge = graph.edge(&EdgeKey::new("extract", "generate")).unwrap();
        assert_eq!(edge.flow_progress, 0.0);
    }

    #[test]
    fn test_replace_carries_simulation_only_while_ahead() {
        let mut graph = GraphModel::new();
        graph.replace(&pipeline());
        for (node, animation) in graph.animations_mut() {
            if node.id == "extract" {
                animation.simulated = Some(20);
            }
        }
        graph.replace(&pipeline());
        assert_eq!(graph.entry("extract").unwrap().animation.simulated, Some(20));

        let mut caught_up = pipeline();
        caught_up.nodes[1].metrics = Some(NodeMetrics::new(21, 24));
        graph.replace(&caught_up);
        assert_eq!(graph.entry("extract").unwrap().animation.simulated, None);
    }

    #[test]
    fn test_apply_node_update_unknown_is_noop() {
        let mut graph = GraphModel::new();
        graph.replace(&pipeline());
        let applied = graph.apply_node_update(
            "Z",
            NodeUpdate {
                status: Some(NodeStatus::Running),
                ..Default::default()
            },
        );
        assert!(!applied);
        assert!(!graph.contains("Z"));
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_apply_node_update_progress_marks_fresh() {
        let mut graph = GraphModel::new();
        graph.replace(&pipeline());
        for (_, animation) in graph.animations_mut() {
            animation.simulated = Some(22);
        }
        assert!(graph.apply_node_update(
            "extract",
            NodeUpdate {
                metrics: Some(NodeMetrics::new(19, 24)),
                progress_reported: true,
                ..Default::default()
            },
        ));
        let entry = graph.entry("extract").unwrap();
        assert!(entry.animation.fresh);
        assert_eq!(entry.animation.simulated, None);
        assert_eq!(entry.node.metrics.unwrap().processed, 19);
    }

    #[test]
    fn test_edge_activity_creates_and_toggles() {
        let mut graph = GraphModel::new();
        graph.replace(&pipeline());

        assert_eq!(
            graph.apply_edge_activity("ingest", "generate", true),
            EdgeChange::Created
        );
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(
            graph.apply_edge_activity("ingest", "generate", true),
            EdgeChange::Unchanged
        );
        assert_eq!(
            graph.apply_edge_activity("ingest", "generate", false),
            EdgeChange::Deactivated
        );
        assert_eq!(
            graph.apply_edge_activity("ingest", "ghost", true),
            EdgeChange::UnknownEndpoint
        );
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_edge_reactivation_resets_flow() {
        let mut graph = GraphModel::new();
        graph.replace(&pipeline());
        let key = EdgeKey::new("ingest", "extract");

        for (_, flow) in graph.flows_mut() {
            *flow = 0.73;
        }
        graph.apply_edge_activity("ingest", "extract", false);
        assert_eq!(graph.edge(&key).unwrap().flow_progress, 0.73);

        assert_eq!(
            graph.apply_edge_activity("ingest", "extract", true),
            EdgeChange::Activated
        );
        assert_eq!(graph.edge(&key).unwrap().flow_progress, 0.0);
    }
}
