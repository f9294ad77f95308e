//! Which single node is expanded (tooltip open) in the UI.

use crate::graph::GraphModel;
use crate::types::NodeId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    selected: Option<NodeId>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a node, or clear with `None`. Selecting the current node again clears it.
    pub fn select(&mut self, node_id: Option<NodeId>) {
        self.selected = match node_id {
            Some(id) if self.selected.as_deref() == Some(id.as_str()) => None,
            other => other,
        };
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Drop the selection if its node did not survive a snapshot.
    pub fn retain_existing(&mut self, graph: &GraphModel) -> bool {
        match &self.selected {
            Some(id) if !graph.contains(id) => {
                tracing::debug!(node_id = %id, "Selected node gone after snapshot, clearing");
                self.selected = None;
                false
            }
            _ => true,
        }
    }
}
