//! Error types for the state store.

use crate::schema::FieldKind;
use thiserror::Error;

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur when reading or mutating the state tree.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StateError {
    /// The path is not part of the declared schema.
    #[error("unknown field: {path}")]
    UnknownField {
        /// The path that was addressed.
        path: String,
    },

    /// The value does not match the declared kind of the field.
    #[error("type mismatch for field {path}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The field that was addressed.
        path: String,
        /// The declared kind.
        expected: FieldKind,
        /// Short description of the rejected value.
        actual: String,
    },

    /// The value has the right kind but violates the field's constraint.
    #[error("invalid value for field {path} ({constraint}): {reason}")]
    InvalidValue {
        /// The field that was addressed.
        path: String,
        /// Name of the violated constraint.
        constraint: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The path string could not be parsed.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The raw path string.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },

    /// A snapshot was not shaped like the tree.
    #[error("invalid snapshot: {message}")]
    InvalidSnapshot {
        /// Description of the problem.
        message: String,
    },

    /// The schema declaration is inconsistent.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },
}

impl StateError {
    /// Creates an unknown field error.
    pub fn unknown_field(path: impl ToString) -> Self {
        Self::UnknownField {
            path: path.to_string(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid snapshot error.
    pub fn invalid_snapshot(message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Returns true if this error stems from schema drift between client
    /// and server rather than from a local programming mistake.
    pub fn is_schema_drift(&self) -> bool {
        matches!(
            self,
            StateError::UnknownField { .. }
                | StateError::TypeMismatch { .. }
                | StateError::InvalidValue { .. }
        )
    }
}
