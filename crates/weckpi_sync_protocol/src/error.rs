//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A path in a message could not be parsed.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] weckpi_state::StateError),

    /// A snapshot was not a JSON object.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// The envelope named an event this protocol does not know.
    #[error("unknown event: {0}")]
    UnknownEvent(String),
}
