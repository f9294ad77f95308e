//! Keeps the streaming connection alive and feeds its events to the engine.
//!
//! Every successful connect is followed by a full snapshot fetch whose result
//! is forwarded before any frame from the new connection is read. Events
//! missed while disconnected are therefore covered by that snapshot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::protocol::{ClientMessage, decode_frame};
use super::{StreamConnection, StreamTransport};
use crate::engine::EngineInput;
use crate::error::StreamError;
use crate::snapshot::SnapshotLoader;
use crate::types::ConnectionState;
use crate::view::{EngineNotice, NoticeKind};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why a connected session ended.
#[derive(Debug)]
enum SessionEnd {
    /// Cancelled, or the engine stopped listening.
    Stopped,
    /// The connection dropped; reconnect.
    Lost(StreamError),
}

pub struct StreamReconciler {
    transport: Arc<dyn StreamTransport>,
    loader: Arc<SnapshotLoader>,
    inputs: mpsc::Sender<EngineInput>,
    topic: String,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl StreamReconciler {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        loader: Arc<SnapshotLoader>,
        inputs: mpsc::Sender<EngineInput>,
        topic: impl Into<String>,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            loader,
            inputs,
            topic: topic.into(),
            backoff,
            cancel,
        }
    }

    /// Connect, stream, reconnect. Returns only once cancelled or once the
    /// engine has dropped its input channel.
    pub async fn run(mut self) {
        let endpoint = self.transport.endpoint();
        tracing::info!(endpoint = %endpoint, topic = %self.topic, "Stream reconciler started");

        loop {
            if self.cancel.is_cancelled()
                || !self
                    .forward(EngineInput::Connection(ConnectionState::Connecting))
                    .await
            {
                break;
            }

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect() => result,
            };

            match connected {
                Ok(mut connection) => {
                    self.backoff.reset();
                    tracing::info!(endpoint = %endpoint, "Stream connected");
                    let end = self.serve(connection.as_mut()).await;
                    let _ = tokio::time::timeout(CLOSE_GRACE, connection.close()).await;
                    match end {
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(e) => {
                            tracing::warn!(endpoint = %endpoint, error = %e, "Stream connection lost");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %endpoint,
                        attempt = self.backoff.attempt(),
                        error = %e,
                        "Stream connect failed"
                    );
                }
            }

            if !self
                .forward(EngineInput::Connection(ConnectionState::Disconnected))
                .await
            {
                break;
            }

            let delay = self.backoff.next_delay();
            tracing::debug!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.backoff.attempt(),
                "Reconnecting after backoff"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let _ = self
            .inputs
            .try_send(EngineInput::Connection(ConnectionState::Disconnected));
        tracing::info!(endpoint = %endpoint, "Stream reconciler stopped");
    }

    async fn serve(&mut self, connection: &mut dyn StreamConnection) -> SessionEnd {
        if !self
            .forward(EngineInput::Connection(ConnectionState::Connected))
            .await
        {
            return SessionEnd::Stopped;
        }

        let subscribe = match ClientMessage::subscribe(self.topic.as_str()).encode() {
            Ok(text) => text,
            Err(e) => {
                return SessionEnd::Lost(StreamError::Send {
                    message: e.to_string(),
                });
            }
        };
        if let Err(e) = connection.send(subscribe).await {
            return SessionEnd::Lost(e);
        }

        // Resync before reading anything from the new connection.
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Stopped,
            result = self.loader.fetch() => result,
        };
        let resync = match fetched {
            Ok(snapshot) => EngineInput::Snapshot(snapshot),
            Err(e) => EngineInput::FetchFailed(e),
        };
        if !self.forward(resync).await {
            return SessionEnd::Stopped;
        }

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Stopped,
                frame = connection.next_frame() => frame,
            };
            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e)) => return SessionEnd::Lost(e),
                None => return SessionEnd::Lost(StreamError::Closed { reason: None }),
            };

            let decoded = match decode_frame(&text) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed stream frame");
                    let notice = EngineNotice::new(NoticeKind::MalformedEvent, e.to_string());
                    if !self.forward(EngineInput::Notice(notice)).await {
                        return SessionEnd::Stopped;
                    }
                    continue;
                }
            };

            if let Some(message) = decoded.upstream_error {
                tracing::warn!(message = %message, "Upstream reported an error");
                let notice = EngineNotice::new(NoticeKind::UpstreamError, message);
                if !self.forward(EngineInput::Notice(notice)).await {
                    return SessionEnd::Stopped;
                }
            }
            for event in decoded.events {
                if !self.forward(EngineInput::Event(event)).await {
                    return SessionEnd::Stopped;
                }
            }
        }
    }

    /// Send to the engine. `false` once the engine is gone.
    async fn forward(&self, input: EngineInput) -> bool {
        self.inputs.send(input).await.is_ok()
    }
}
