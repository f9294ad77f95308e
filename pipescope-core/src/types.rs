//! Fundamental data types: nodes, edges, snapshots and incremental events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::NodeStatus;

/// Stable identifier of a pipeline stage node.
pub type NodeId = String;

/// Role of a stage in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Where documents enter (uploads, Jira, Confluence, ...).
    #[serde(alias = "Source")]
    Source,
    /// Any intermediate processing stage.
    #[default]
    #[serde(alias = "Process")]
    Process,
    /// Terminal stage producing results.
    #[serde(alias = "Output")]
    Output,
}

/// Progress counters reported for a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub processed: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl NodeMetrics {
    pub fn new(processed: u64, total: u64) -> Self {
        Self {
            processed,
            total,
            duration_seconds: None,
        }
    }

    /// Clamp `processed` into `[0, total]`. Returns `true` if it had to.
    pub fn clamp(&mut self) -> bool {
        if self.processed > self.total {
            self.processed = self.total;
            true
        } else {
            false
        }
    }

    /// Percent complete, `None` when there is nothing to process.
    pub fn percent(&self) -> Option<f64> {
        percent_of(self.processed, self.total)
    }

    /// Whether every item has been processed.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.processed >= self.total
    }
}

pub(crate) fn percent_of(processed: u64, total: u64) -> Option<f64> {
    if total == 0 {
        None
    } else {
        Some(processed.min(total) as f64 / total as f64 * 100.0)
    }
}

/// A pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetrics>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            status: NodeStatus::Idle,
            label: None,
            metrics: None,
        }
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metrics(mut self, processed: u64, total: u64) -> Self {
        self.metrics = Some(NodeMetrics::new(processed, total));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Identity of an edge: the ordered `(from, to)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub from: NodeId,
    pub to: NodeId,
}

impl EdgeKey {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A directed link between two stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub is_active: bool,
    /// Cyclic `[0, 1)` animation coordinate. Visual only.
    #[serde(default)]
    pub flow_progress: f64,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, is_active: bool) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            is_active,
            flow_progress: 0.0,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.from.clone(), self.to.clone())
    }
}

/// Wrap any value into the `[0, 1)` flow coordinate.
pub(crate) fn wrap_flow(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let wrapped = value.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs
    if wrapped >= 1.0 { 0.0 } else { wrapped }
}

/// A full, authoritative replacement of the graph's ground truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Aggregate dashboard metrics, carried verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    /// Activity feed entries, carried verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activities: Option<serde_json::Value>,
    /// Chart series, carried verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_data: Option<serde_json::Value>,
}

impl SnapshotPayload {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            nodes,
            edges,
            ..Default::default()
        }
    }
}

/// How a progress event changes `processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressChange {
    /// Add (or subtract) from the current count.
    Delta(i64),
    /// Replace the current count.
    Absolute(u64),
}

impl ProgressChange {
    /// Apply to a current count; never goes below zero.
    pub fn apply(self, current: u64) -> u64 {
        match self {
            ProgressChange::Absolute(value) => value,
            ProgressChange::Delta(delta) if delta >= 0 => current.saturating_add(delta as u64),
            ProgressChange::Delta(delta) => current.saturating_sub(delta.unsigned_abs()),
        }
    }
}

/// An incremental update delivered by the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    Progress {
        node_id: NodeId,
        change: ProgressChange,
        /// Optional total; creates metrics on nodes that have none.
        total: Option<u64>,
        timestamp: Option<DateTime<Utc>>,
    },
    Status {
        node_id: NodeId,
        status: NodeStatus,
        timestamp: Option<DateTime<Utc>>,
    },
    EdgeActivity {
        from: NodeId,
        to: NodeId,
        is_active: bool,
        timestamp: Option<DateTime<Utc>>,
    },
    /// The coordinator should trigger a snapshot fetch.
    RefreshNeeded,
}

impl UpdateEvent {
    /// Short tag used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateEvent::Progress { .. } => "progress",
            UpdateEvent::Status { .. } => "status",
            UpdateEvent::EdgeActivity { .. } => "edgeActivity",
            UpdateEvent::RefreshNeeded => "refreshNeeded",
        }
    }

    pub fn progress_absolute(node_id: impl Into<NodeId>, processed: u64) -> Self {
        UpdateEvent::Progress {
            node_id: node_id.into(),
            change: ProgressChange::Absolute(processed),
            total: None,
            timestamp: None,
        }
    }

    pub fn progress_delta(node_id: impl Into<NodeId>, delta: i64) -> Self {
        UpdateEvent::Progress {
            node_id: node_id.into(),
            change: ProgressChange::Delta(delta),
            total: None,
            timestamp: None,
        }
    }

    pub fn status(node_id: impl Into<NodeId>, status: NodeStatus) -> Self {
        UpdateEvent::Status {
            node_id: node_id.into(),
            status,
            timestamp: None,
        }
    }

    pub fn edge_activity(from: impl Into<NodeId>, to: impl Into<NodeId>, is_active: bool) -> Self {
        UpdateEvent::EdgeActivity {
            from: from.into(),
            to: to.into(),
            is_active,
            timestamp: None,
        }
    }
}

/// State of the streaming connection, exposed for UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}
