use crate::lifecycle::ConnectionState;
use thiserror::Error;

/// Errors returned by the connector's own API.
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to decode '{kind}' payload: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by an event channel. These are surfaced verbatim through
/// `error` notifications; the channel decides whether it recovers.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("unexpected content type '{0}', expected text/event-stream")]
    ContentType(String),

    #[error("event stream line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("event stream disconnected")]
    Disconnected,

    #[error("{0}")]
    Other(String),
}
