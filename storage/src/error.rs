//! Error types for the storage layer.

use thiserror::Error;

use pulse_embeddings::EmbeddingError;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// An operation was attempted before `connect()`.
    #[error("backend not connected; call connect() first")]
    NotConnected,

    /// The backend requires model registration and it was skipped.
    #[error("model '{entity}' is not registered")]
    ModelNotRegistered { entity: String },

    /// A native driver call failed.
    #[error("{operation} failed for '{entity}': {message}")]
    Backend {
        operation: &'static str,
        entity: String,
        message: String,
    },

    /// Embedding subsystem error (e.g. a dimension mismatch during search).
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl StorageError {
    /// Wrap a native driver failure with the operation and entity it hit.
    pub fn backend(
        operation: &'static str,
        entity: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Backend {
            operation,
            entity: entity.into(),
            message: err.to_string(),
        }
    }
}
