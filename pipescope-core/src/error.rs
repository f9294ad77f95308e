//! Error types for the Pipescope engine.
//!
//! Uses `thiserror` for public API error types, split by the layer that
//! produces them: snapshot fetches, the event stream, individual events and
//! configuration. None of these is fatal to a running engine; they are logged
//! and surfaced as notices while the last good state stays on screen.

/// Top-level error type for the Pipescope core library.
#[derive(Debug, thiserror::Error)]
pub enum PipescopeError {
    #[error("Snapshot fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Malformed event: {0}")]
    Event(#[from] EventError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from fetching a full graph snapshot.
///
/// `Clone` because one in-flight fetch is shared by every caller that asked
/// for a snapshot while it was running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {message}")]
    Request { message: String },

    #[error("server returned HTTP {status}")]
    Status { status: u16 },

    #[error("response parse error: {message}")]
    Parse { message: String },

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Errors from the streaming push channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("connection closed by server{}", close_suffix(.reason))]
    Closed { reason: Option<String> },

    #[error("failed to send frame: {message}")]
    Send { message: String },
}

fn close_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

/// A stream message or event that cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("invalid JSON frame: {message}")]
    Json { message: String },

    #[error("unknown message type: {kind}")]
    UnknownType { kind: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("unknown node: {node_id}")]
    UnknownNode { node_id: String },

    #[error("unknown edge endpoint: {from} -> {to}")]
    UnknownEdgeEndpoint { from: String, to: String },

    #[error("node {node_id} has no metrics and the event carries no total")]
    MissingMetrics { node_id: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// A type alias for results using the top-level `PipescopeError`.
pub type Result<T> = std::result::Result<T, PipescopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_fetch() {
        let err = PipescopeError::Fetch(FetchError::Status { status: 503 });
        assert_eq!(
            err.to_string(),
            "Snapshot fetch failed: server returned HTTP 503"
        );
    }

    #[test]
    fn test_error_display_stream_closed() {
        let err = StreamError::Closed { reason: None };
        assert_eq!(err.to_string(), "connection closed by server");

        let err = StreamError::Closed {
            reason: Some("going away".into()),
        };
        assert_eq!(err.to_string(), "connection closed by server: going away");
    }

    #[test]
    fn test_error_display_event() {
        let err = PipescopeError::Event(EventError::UnknownNode {
            node_id: "Z".into(),
        });
        assert_eq!(err.to_string(), "Malformed event: unknown node: Z");

        let err = EventError::UnknownEdgeEndpoint {
            from: "a".into(),
            to: "b".into(),
        };
        assert_eq!(err.to_string(), "unknown edge endpoint: a -> b");
    }

    #[test]
    fn test_error_display_config() {
        let err = PipescopeError::Config(ConfigError::Invalid {
            message: "animation.tick_ms must be positive".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration: animation.tick_ms must be positive"
        );
    }

    #[test]
    fn test_fetch_error_is_cloneable() {
        let err = FetchError::Timeout { timeout_secs: 10 };
        let shared = err.clone();
        assert_eq!(err, shared);
        assert_eq!(shared.to_string(), "request timed out after 10s");
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PipescopeError = serde_err.into();
        assert!(matches!(err, PipescopeError::Serialization(_)));
    }
}
