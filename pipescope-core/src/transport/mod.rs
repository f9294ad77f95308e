//! Network implementations of the snapshot and stream seams.

pub mod http;
pub mod ws;

pub use http::HttpSnapshotSource;
pub use ws::{WsConnection, WsTransport};
