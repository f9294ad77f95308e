//! The merge coordinator: the only writer of graph ground truth.
//!
//! Snapshots are authoritative and replace everything (last snapshot wins).
//! Events apply incrementally between snapshots and are never rejected for
//! being "stale": upstream delivery is at-least-once and timestamps are
//! advisory, so an out-of-order event at worst causes a brief visual
//! correction when the next snapshot lands.

use serde::Serialize;

use crate::error::EventError;
use crate::graph::{EdgeChange, GraphModel, NodeUpdate, ReplaceReport};
use crate::snapshot::LoadedSnapshot;
use crate::status::{self, NodeStatus, StatusTrigger, Transition};
use crate::types::{NodeId, NodeMetrics, ProgressChange, SnapshotPayload, UpdateEvent};

/// What the coordinator did with an input.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Ground truth changed.
    Applied,
    /// Valid input that changed nothing.
    Unchanged,
    /// A snapshot with an already-applied sequence number.
    Stale,
    /// The event was dropped; processing continues.
    Ignored(EventError),
    /// A status event tried to leave a terminal status.
    Rejected { from: NodeStatus, to: NodeStatus },
    /// The caller should fetch a fresh snapshot.
    RefreshRequested,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, MergeOutcome::Applied)
    }
}

/// Running counters, exposed on the dashboard view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub snapshots_applied: u64,
    pub events_applied: u64,
    pub events_ignored: u64,
    pub refreshes_requested: u64,
}

#[derive(Debug, Default)]
pub struct MergeCoordinator {
    graph: GraphModel,
    last_snapshot_seq: Option<u64>,
    stats: MergeStats,
}

impl MergeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    /// Mutable graph access for the animation clock, which only touches
    /// transient fields through `flows_mut` / `animations_mut`.
    pub fn graph_mut(&mut self) -> &mut GraphModel {
        &mut self.graph
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    pub fn last_snapshot_seq(&self) -> Option<u64> {
        self.last_snapshot_seq
    }

    /// Apply a fetched snapshot unless this fetch was already applied.
    ///
    /// A coalesced fetch is delivered once per caller that awaited it, so the
    /// same `seq` can arrive more than once.
    pub fn on_loaded(&mut self, snapshot: &LoadedSnapshot) -> MergeOutcome {
        if self
            .last_snapshot_seq
            .is_some_and(|last| snapshot.seq <= last)
        {
            tracing::trace!(seq = snapshot.seq, "Skipping already-applied snapshot");
            return MergeOutcome::Stale;
        }
        self.last_snapshot_seq = Some(snapshot.seq);
        self.on_snapshot(&snapshot.payload);
        MergeOutcome::Applied
    }

    /// Replace all ground truth with an authoritative snapshot.
    pub fn on_snapshot(&mut self, payload: &SnapshotPayload) -> ReplaceReport {
        let report = self.graph.replace(payload);
        self.stats.snapshots_applied += 1;
        tracing::debug!(
            nodes = report.nodes,
            edges = report.edges,
            dropped_edges = report.dropped_edges,
            "Applied snapshot"
        );
        report
    }

    /// Apply one incremental event.
    pub fn on_event(&mut self, event: UpdateEvent) -> MergeOutcome {
        let kind = event.kind();
        let outcome = match event {
            UpdateEvent::Progress {
                node_id,
                change,
                total,
                ..
            } => self.apply_progress(node_id, change, total),
            UpdateEvent::Status {
                node_id, status, ..
            } => self.apply_status(node_id, status),
            UpdateEvent::EdgeActivity {
                from,
                to,
                is_active,
                ..
            } => match self.graph.apply_edge_activity(&from, &to, is_active) {
                EdgeChange::UnknownEndpoint => {
                    MergeOutcome::Ignored(EventError::UnknownEdgeEndpoint { from, to })
                }
                EdgeChange::Unchanged => MergeOutcome::Unchanged,
                EdgeChange::Created | EdgeChange::Activated | EdgeChange::Deactivated => {
                    MergeOutcome::Applied
                }
            },
            UpdateEvent::RefreshNeeded => MergeOutcome::RefreshRequested,
        };

        match &outcome {
            MergeOutcome::Applied | MergeOutcome::Unchanged => self.stats.events_applied += 1,
            MergeOutcome::Ignored(err) => {
                tracing::warn!(event = kind, error = %err, "Dropping event");
                self.stats.events_ignored += 1;
            }
            MergeOutcome::Rejected { from, to } => {
                tracing::warn!(event = kind, from = %from, to = %to, "Ignoring transition out of terminal status");
                self.stats.events_ignored += 1;
            }
            MergeOutcome::RefreshRequested => self.stats.refreshes_requested += 1,
            MergeOutcome::Stale => {}
        }
        outcome
    }

    fn apply_progress(
        &mut self,
        node_id: NodeId,
        change: ProgressChange,
        total: Option<u64>,
    ) -> MergeOutcome {
        let Some(node) = self.graph.node(&node_id) else {
            return MergeOutcome::Ignored(EventError::UnknownNode { node_id });
        };

        let mut metrics = match (node.metrics, total) {
            (Some(mut metrics), total) => {
                if let Some(total) = total {
                    metrics.total = total;
                }
                metrics
            }
            (None, Some(total)) => NodeMetrics::new(0, total),
            (None, None) => return MergeOutcome::Ignored(EventError::MissingMetrics { node_id }),
        };
        metrics.processed = change.apply(metrics.processed);
        if metrics.clamp() {
            tracing::debug!(node_id = %node_id, total = metrics.total, "Clamped progress to total");
        }

        let mut triggers = Vec::with_capacity(2);
        if metrics.processed > 0 {
            triggers.push(StatusTrigger::ProgressStarted);
        }
        if metrics.is_complete() {
            triggers.push(StatusTrigger::ProgressCompleted);
        }
        let (next_status, _) = status::resolve(node.status, &triggers);

        let changed = node.metrics != Some(metrics) || node.status != next_status;
        self.graph.apply_node_update(
            &node_id,
            NodeUpdate {
                status: Some(next_status),
                metrics: Some(metrics),
                progress_reported: true,
            },
        );
        if changed {
            MergeOutcome::Applied
        } else {
            MergeOutcome::Unchanged
        }
    }

    fn apply_status(&mut self, node_id: NodeId, requested: NodeStatus) -> MergeOutcome {
        let Some(node) = self.graph.node(&node_id) else {
            return MergeOutcome::Ignored(EventError::UnknownNode { node_id });
        };
        let current = node.status;
        match status::transition(current, StatusTrigger::Explicit(requested)) {
            Transition::To(next) => {
                self.graph.apply_node_update(
                    &node_id,
                    NodeUpdate {
                        status: Some(next),
                        ..Default::default()
                    },
                );
                MergeOutcome::Applied
            }
            Transition::Unchanged => MergeOutcome::Unchanged,
            Transition::Rejected => MergeOutcome::Rejected {
                from: current,
                to: requested,
            },
        }
    }
}
