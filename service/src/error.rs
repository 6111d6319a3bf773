//! Error types for the storage service façade.

use thiserror::Error;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors that can occur at the service façade.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A repository or model operation was attempted before `connect()`.
    #[error("storage service not initialized; call connect() first")]
    NotInitialized,

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] pulse_storage::StorageError),

    /// A remote collaborator returned a non-success response or malformed
    /// payload.
    #[error("remote service error: {0}")]
    Remote(String),
}
