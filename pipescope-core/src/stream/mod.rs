//! Streaming push channel: transport seam, wire protocol, reconnect loop.

pub mod backoff;
pub mod protocol;
pub mod reconciler;

pub use backoff::Backoff;
pub use protocol::{ClientMessage, DecodedFrame, decode_frame};
pub use reconciler::StreamReconciler;

use async_trait::async_trait;

use crate::error::StreamError;

/// Opens streaming connections. One call per (re)connect attempt.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError>;

    /// Where this transport connects, for log fields.
    fn endpoint(&self) -> String;
}

/// One open connection carrying text frames.
#[async_trait]
pub trait StreamConnection: Send {
    async fn send(&mut self, text: String) -> Result<(), StreamError>;

    /// Next text frame. `None` once the connection has ended.
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>>;

    /// Close politely. Errors are ignored.
    async fn close(&mut self) {}
}
