//! Error types for the WeckPi application layer.

use thiserror::Error;
use weckpi_state::StateError;
use weckpi_sync_engine::SyncError;

/// Result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised by the application views and the client facade.
#[derive(Debug, Error)]
pub enum AppError {
    /// Store error.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A field held a value of the right kind but the wrong shape.
    #[error("cannot decode {path}: {source}")]
    Decode {
        /// The field that was read.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A time string could not be parsed.
    #[error("invalid time {value:?}: expected HH:MM[:SS[.fff]]")]
    InvalidTime {
        /// The rejected string.
        value: String,
    },

    /// A number that cannot be represented in the tree.
    #[error("invalid number: {0}")]
    InvalidNumber(f64),
}

impl AppError {
    pub(crate) fn decode(path: &str, source: serde_json::Error) -> Self {
        Self::Decode {
            path: path.to_string(),
            source,
        }
    }
}
