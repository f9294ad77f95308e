//! The read-only dashboard view published to renderers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::{GraphModel, NodeEntry};
use crate::merge::MergeStats;
use crate::status::NodeStatus;
use crate::types::{ConnectionState, Edge, NodeId, NodeKind, SnapshotPayload, percent_of};

/// One node as a renderer should draw it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: NodeId,
    pub kind: NodeKind,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Displayed count: real `processed`, or the simulated value when ahead of it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// `processed` currently shows simulated progress.
    pub simulated: bool,
}

impl From<&NodeEntry> for NodeView {
    fn from(entry: &NodeEntry) -> Self {
        let node = &entry.node;
        let metrics = node.metrics;
        let simulated = match (metrics, entry.animation.simulated) {
            (Some(m), Some(sim)) if sim > m.processed => Some(sim),
            _ => None,
        };
        let processed = metrics.map(|m| simulated.unwrap_or(m.processed));
        Self {
            id: node.id.clone(),
            kind: node.kind,
            status: node.status,
            label: node.label.clone(),
            processed,
            total: metrics.map(|m| m.total),
            progress_percent: metrics.and_then(|m| percent_of(processed.unwrap_or(0), m.total)),
            duration_seconds: metrics.and_then(|m| m.duration_seconds),
            simulated: simulated.is_some(),
        }
    }
}

/// What a notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    FetchFailed,
    MalformedEvent,
    UpstreamError,
}

/// A user-visible, non-fatal problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineNotice {
    pub kind: NoticeKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl EngineNotice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Aggregate dashboard data carried verbatim from the last snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activities: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_data: Option<serde_json::Value>,
}

impl From<&SnapshotPayload> for Aggregates {
    fn from(payload: &SnapshotPayload) -> Self {
        Self {
            metrics: payload.metrics.clone(),
            activities: payload.activities.clone(),
            chart_data: payload.chart_data.clone(),
        }
    }
}

/// Everything a renderer needs, published after every engine turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<Edge>,
    pub connection: ConnectionState,
    pub playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<NodeId>,
    /// Latest fetch failure or stream problem, cleared by the next good snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<EngineNotice>,
    pub aggregates: Aggregates,
    pub stats: ViewStats,
    /// Sequence number of the snapshot the ground truth came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_seq: Option<u64>,
}

/// Counters shown alongside the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStats {
    pub snapshots_applied: u64,
    pub events_applied: u64,
    pub events_ignored: u64,
    pub refreshes_requested: u64,
    pub ticks: u64,
}

impl ViewStats {
    pub fn new(merge: MergeStats, ticks: u64) -> Self {
        Self {
            snapshots_applied: merge.snapshots_applied,
            events_applied: merge.events_applied,
            events_ignored: merge.events_ignored,
            refreshes_requested: merge.refreshes_requested,
            ticks,
        }
    }
}

impl DashboardView {
    /// Copy the graph into view form. Engine-level fields are filled by the caller.
    pub fn from_graph(graph: &GraphModel) -> Self {
        Self {
            nodes: graph.entries().iter().map(NodeView::from).collect(),
            edges: graph.edges().to_vec(),
            ..Default::default()
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn selected_node(&self) -> Option<&NodeView> {
        self.selected.as_deref().and_then(|id| self.node(id))
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.from == from && e.to == to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Node;

    fn graph_with_running_node() -> GraphModel {
        let mut graph = GraphModel::new();
        graph.replace(&SnapshotPayload::new(
            vec![
                Node::new("A", NodeKind::Process)
                    .with_status(NodeStatus::Running)
                    .with_metrics(18, 24),
                Node::new("B", NodeKind::Output),
            ],
            vec![Edge::new("A", "B", true)],
        ));
        graph
    }

    #[test]
    fn test_view_reports_real_progress() {
        let view = DashboardView::from_graph(&graph_with_running_node());
        let a = view.node("A").unwrap();
        assert_eq!(a.processed, Some(18));
        assert_eq!(a.total, Some(24));
        assert_eq!(a.progress_percent, Some(75.0));
        assert!(!a.simulated);

        let b = view.node("B").unwrap();
        assert_eq!(b.processed, None);
        assert_eq!(b.progress_percent, None);
        assert!(view.edge("A", "B").unwrap().is_active);
    }

    #[test]
    fn test_view_flags_simulated_progress() {
        let mut graph = graph_with_running_node();
        for (node, animation) in graph.animations_mut() {
            if node.id == "A" {
                animation.simulated = Some(21);
            }
        }
        let view = DashboardView::from_graph(&graph);
        let a = view.node("A").unwrap();
        assert_eq!(a.processed, Some(21));
        assert_eq!(a.progress_percent, Some(87.5));
        assert!(a.simulated);
        assert_eq!(graph.node("A").unwrap().metrics.unwrap().processed, 18);
    }

    #[test]
    fn test_view_serializes_camel_case() {
        let mut view = DashboardView::from_graph(&graph_with_running_node());
        view.selected = Some("A".into());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["nodes"][0]["progressPercent"], 75.0);
        assert_eq!(json["edges"][0]["flowProgress"], 0.0);
        assert_eq!(json["connection"], "disconnected");
        assert_eq!(json["selected"], "A");
        assert!(json.get("notice").is_none());
        assert_eq!(view.selected_node().unwrap().id, "A");
    }
}
