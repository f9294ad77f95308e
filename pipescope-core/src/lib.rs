//! # Pipescope Core
//!
//! State synchronization and animation engine for the Pipescope pipeline
//! dashboard. Loads authoritative graph snapshots, reconciles them with
//! streamed incremental updates, animates active edges and running stages,
//! and publishes a consistent read-only view for renderers.

pub mod animation;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod merge;
pub mod selection;
pub mod snapshot;
pub mod status;
pub mod stream;
pub mod transport;
pub mod types;
pub mod view;

// Re-export commonly used types at the crate root.
pub use animation::{AnimationClock, ProgressSimulation, TickReport};
pub use config::{PipescopeConfig, load_config};
pub use engine::{Engine, EngineHandle};
pub use error::{ConfigError, EventError, FetchError, PipescopeError, Result, StreamError};
pub use graph::GraphModel;
pub use merge::{MergeCoordinator, MergeOutcome, MergeStats};
pub use selection::SelectionState;
pub use snapshot::{LoadedSnapshot, SnapshotLoader, SnapshotSource};
pub use status::NodeStatus;
pub use stream::{StreamConnection, StreamReconciler, StreamTransport};
pub use transport::{HttpSnapshotSource, WsTransport};
pub use types::{
    ConnectionState, Edge, EdgeKey, Node, NodeId, NodeKind, NodeMetrics, ProgressChange,
    SnapshotPayload, UpdateEvent,
};
pub use view::{DashboardView, EngineNotice, NodeView, NoticeKind};
