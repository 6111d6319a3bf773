//! Error types for the embedding subsystem.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embedding subsystem.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The remote embedding service returned a non-success response.
    #[error("remote embedding service error: {0}")]
    RemoteService(String),

    /// The remote embedding service returned a malformed payload.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Vector length mismatch in a similarity comparison.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// HTTP transport error (includes timeouts).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
