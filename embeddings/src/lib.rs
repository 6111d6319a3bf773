//! # Embeddings
//!
//! This crate provides embedding generation, caching, and similarity math
//! for the Pulse storage core.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors via a remote
//!   embedding service, with a deterministic local fallback
//! - **Caching**: Hash-keyed cache of computed embeddings with TTL expiry
//! - **Similarity Math**: Cosine similarity and vector normalization
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Embedding Subsystem                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingGenerator ──► EmbeddingCache ──► remote endpoint      │
//! │          │                                        │             │
//! │          ▼                                        ▼             │
//! │   local fallback                     (any failure falls back)   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Generation is never a hard failure path: every remote failure (bad status,
//! malformed payload, timeout, network error) degrades to the local fallback,
//! so callers always receive a well-formed vector of the configured dimension.

pub mod cache;
pub mod error;
pub mod generator;
pub mod similarity;

pub use cache::{CacheStats, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use generator::{EmbeddingGenerator, EmbeddingSettings};
pub use similarity::{cosine_similarity, normalize};

/// A dense vector embedding.
pub type EmbeddingVector = Vec<f32>;

/// Default embedding dimension when `EMBEDDING_DIMENSION` is not set.
pub const DEFAULT_DIMENSION: usize = 384;
