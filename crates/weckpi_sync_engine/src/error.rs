//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(#[from] weckpi_sync_protocol::ProtocolError),

    /// The local store rejected a mutation.
    #[error("state error: {0}")]
    State(#[from] weckpi_state::StateError),

    /// The snapshot request did not complete in time.
    #[error("snapshot request timed out")]
    SnapshotTimeout,

    /// The snapshot could not be obtained or applied.
    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),

    /// A snapshot response arrived for a connection that no longer exists.
    #[error("stale snapshot response for connection {epoch} (current {current})")]
    StaleResponse {
        /// Connection epoch the response belongs to.
        epoch: u64,
        /// Connection epoch of the session.
        current: u64,
    },

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The session was closed.
    #[error("session closed")]
    Closed,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::SnapshotTimeout => true,
            SyncError::SnapshotFailed(_) => true,
            SyncError::State(_) => true,
            SyncError::Protocol(_) => true,
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}
