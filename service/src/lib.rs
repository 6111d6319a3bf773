//! # Storage Service
//!
//! This crate provides the consumer-facing façade over the Pulse persistence
//! stack:
//!
//! - **Backend selection**: a closed set of backend kinds resolved once at
//!   construction into a concrete provider
//! - **Lifecycle**: connect/disconnect with an initialization gate on every
//!   repository and model operation
//! - **Boundary contracts**: the classification collaborator consumed by
//!   callers and stored verbatim
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pulse_service::{BackendKind, StorageConfig, StorageService};
//!
//! let service = StorageService::new(StorageConfig::new(
//!     BackendKind::Document,
//!     "mongodb://localhost:27017",
//!     "pulse",
//! ));
//! service.connect().await?;
//! service.register_model("posts", Default::default()).await?;
//!
//! let posts = service.repository("posts").await?;
//! let stored = posts.create(record).await?;
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod service;

pub use classify::{Classification, Classifier};
pub use config::{BackendKind, StorageConfig};
pub use error::{Result, ServiceError};
pub use service::StorageService;

// Re-export from dependencies for convenience
pub use pulse_embeddings::{EmbeddingCache, EmbeddingGenerator, EmbeddingSettings};
pub use pulse_storage::{
    ConnectionParams, Filter, FindOptions, ModelSchema, Provider, Record, Repository, SortOrder,
    VectorSearch, VectorSearchOptions, VectorSearchResult,
};
