//! Streaming wire format.
//!
//! Two families of server messages share one socket: the core update events
//! (`progress`, `status`, `edgeActivity`, `refreshNeeded`) and the generation
//! envelopes (`{ type, session_id?, payload }`) emitted by the backend's job
//! runner. Both decode into [`UpdateEvent`]s.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventError;
use crate::status::NodeStatus;
use crate::types::{NodeId, ProgressChange, UpdateEvent};

/// Messages sent from the engine to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Subscribe { topic: String },
}

impl ClientMessage {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        ClientMessage::Subscribe {
            topic: topic.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Result of decoding one text frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    /// Events in the order they must be applied.
    pub events: Vec<UpdateEvent>,
    /// Message carried by an upstream `error` envelope.
    pub upstream_error: Option<String>,
}

impl DecodedFrame {
    fn events(events: Vec<UpdateEvent>) -> Self {
        Self {
            events,
            upstream_error: None,
        }
    }

    /// Acknowledgements and keep-alives decode to nothing.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.upstream_error.is_none()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressWire {
    #[serde(alias = "node_id", alias = "stage")]
    node_id: NodeId,
    #[serde(alias = "processedAbsolute")]
    processed: Option<u64>,
    #[serde(alias = "processedDelta", alias = "processed_delta")]
    delta: Option<i64>,
    total: Option<u64>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusWire {
    #[serde(alias = "node_id")]
    node_id: NodeId,
    status: NodeStatus,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgeActivityWire {
    from: NodeId,
    to: NodeId,
    #[serde(alias = "is_active")]
    is_active: bool,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerationProgressWire {
    #[serde(alias = "node_id")]
    node_id: Option<NodeId>,
    stage: Option<NodeId>,
    processed: Option<u64>,
    #[serde(alias = "processed_delta")]
    processed_delta: Option<i64>,
    total: Option<u64>,
    status: Option<NodeStatus>,
    timestamp: Option<DateTime<Utc>>,
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T, EventError> {
    serde_json::from_value(value).map_err(|e| EventError::Json {
        message: e.to_string(),
    })
}

fn progress_change(processed: Option<u64>, delta: Option<i64>) -> Option<ProgressChange> {
    match (processed, delta) {
        (Some(absolute), _) => Some(ProgressChange::Absolute(absolute)),
        (None, Some(delta)) => Some(ProgressChange::Delta(delta)),
        (None, None) => None,
    }
}

/// Decode one text frame from the stream.
pub fn decode_frame(text: &str) -> Result<DecodedFrame, EventError> {
    let mut value: Value = serde_json::from_str(text).map_err(|e| EventError::Json {
        message: e.to_string(),
    })?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| EventError::MissingField {
            field: "type".to_string(),
        })?
        .to_string();

    match kind.as_str() {
        "progress" => {
            let stage_marker = value.get("stage").is_some();
            let wire: ProgressWire = parse(value)?;
            let Some(change) = progress_change(wire.processed, wire.delta) else {
                // `{type: progress, stage}` without counts only says the stage is working.
                if stage_marker {
                    return Ok(DecodedFrame::events(vec![UpdateEvent::Status {
                        node_id: wire.node_id,
                        status: NodeStatus::Running,
                        timestamp: wire.timestamp,
                    }]));
                }
                return Err(EventError::MissingField {
                    field: "processed".to_string(),
                });
            };
            Ok(DecodedFrame::events(vec![UpdateEvent::Progress {
                node_id: wire.node_id,
                change,
                total: wire.total,
                timestamp: wire.timestamp,
            }]))
        }
        "status" => {
            let wire: StatusWire = parse(value)?;
            Ok(DecodedFrame::events(vec![UpdateEvent::Status {
                node_id: wire.node_id,
                status: wire.status,
                timestamp: wire.timestamp,
            }]))
        }
        "edgeActivity" => {
            let wire: EdgeActivityWire = parse(value)?;
            Ok(DecodedFrame::events(vec![UpdateEvent::EdgeActivity {
                from: wire.from,
                to: wire.to,
                is_active: wire.is_active,
                timestamp: wire.timestamp,
            }]))
        }
        "refreshNeeded" | "generation_complete" | "new_activity" => {
            Ok(DecodedFrame::events(vec![UpdateEvent::RefreshNeeded]))
        }
        "generation_progress" => {
            let payload = value.get_mut("payload").map(Value::take).ok_or(
                EventError::MissingField {
                    field: "payload".to_string(),
                },
            )?;
            decode_generation_progress(parse(payload)?)
        }
        "error" => {
            let message = value
                .pointer("/payload/message")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("upstream reported an error")
                .to_string();
            Ok(DecodedFrame {
                events: vec![UpdateEvent::RefreshNeeded],
                upstream_error: Some(message),
            })
        }
        "pong" | "subscribed" => Ok(DecodedFrame::default()),
        _ => Err(EventError::UnknownType { kind }),
    }
}

fn decode_generation_progress(wire: GenerationProgressWire) -> Result<DecodedFrame, EventError> {
    let node_id = wire
        .node_id
        .or(wire.stage)
        .ok_or_else(|| EventError::MissingField {
            field: "payload.nodeId".to_string(),
        })?;

    let mut events = Vec::with_capacity(2);
    if let Some(change) = progress_change(wire.processed, wire.processed_delta) {
        events.push(UpdateEvent::Progress {
            node_id: node_id.clone(),
            change,
            total: wire.total,
            timestamp: wire.timestamp,
        });
    }
    if let Some(status) = wire.status {
        events.push(UpdateEvent::Status {
            node_id,
            status,
            timestamp: wire.timestamp,
        });
    }
    if events.is_empty() {
        return Err(EventError::MissingField {
            field: "payload.processed".to_string(),
        });
    }
    Ok(DecodedFrame::events(events))
}
