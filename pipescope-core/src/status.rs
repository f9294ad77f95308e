//! Node status and its transition table.
//!
//! ```text
//! Idle --(status:Running | progress>0)--> Running --(processed>=total)--> Success
//! Idle | Running --(status:Error)--> Error
//! Idle | Running --(status:Success)--> Success
//! Running --(status:Idle)--> Idle
//! ```
//!
//! `Success` and `Error` are terminal; only a full snapshot replaces them.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    #[serde(alias = "Idle")]
    Idle,
    #[serde(alias = "Running")]
    Running,
    #[serde(alias = "Success")]
    Success,
    #[serde(alias = "Error")]
    Error,
}

impl NodeStatus {
    /// Whether only a snapshot may move the node out of this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Error)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Idle => write!(f, "idle"),
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Success => write!(f, "success"),
            NodeStatus::Error => write!(f, "error"),
        }
    }
}

/// What happened to a node that may move its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTrigger {
    /// An explicit `status` event.
    Explicit(NodeStatus),
    /// A progress update left `processed > 0`.
    ProgressStarted,
    /// A progress update left `processed >= total` with `total > 0`.
    ProgressCompleted,
}

/// Outcome of looking a trigger up in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status changes to the contained value.
    To(NodeStatus),
    /// Trigger is valid but leaves the status as is.
    Unchanged,
    /// Trigger would leave a terminal status or skip a step.
    Rejected,
}

/// The transition table. Exhaustive over `(status, trigger)`.
pub fn transition(current: NodeStatus, trigger: StatusTrigger) -> Transition {
    use NodeStatus::*;
    use StatusTrigger::*;

    match (current, trigger) {
        (Idle, Explicit(Idle)) => Transition::Unchanged,
        (Idle, Explicit(next @ (Running | Success | Error))) => Transition::To(next),
        (Idle, ProgressStarted) => Transition::To(Running),
        // Completion is only observed from Running; Idle goes via ProgressStarted first.
        (Idle, ProgressCompleted) => Transition::Unchanged,

        (Running, Explicit(Running)) => Transition::Unchanged,
        (Running, Explicit(next @ (Idle | Success | Error))) => Transition::To(next),
        (Running, ProgressStarted) => Transition::Unchanged,
        (Running, ProgressCompleted) => Transition::To(Success),

        (Success, Explicit(Success)) | (Error, Explicit(Error)) => Transition::Unchanged,
        (Success | Error, Explicit(_)) => Transition::Rejected,
        (Success | Error, ProgressStarted | ProgressCompleted) => Transition::Unchanged,
    }
}

/// Apply a sequence of triggers, stopping at the first rejection.
///
/// Returns the resulting status and whether any trigger was rejected.
pub fn resolve(current: NodeStatus, triggers: &[StatusTrigger]) -> (NodeStatus, bool) {
    let mut status = current;
    for trigger in triggers {
        match transition(status, *trigger) {
            Transition::To(next) => status = next,
            Transition::Unchanged => {}
            Transition::Rejected => return (status, true),
        }
    }
    (status, false)
}
