//! # Storage
//!
//! This crate provides the persistence layer: one `Repository`/`Provider`
//! contract implemented over three structurally different backends, so
//! callers get the same CRUD, query, and similarity-search surface whether
//! records live in MongoDB, Neo4j, or Redis.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Storage Layer                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   Provider ──► Repository (one per entity, memoized)            │
//! │      │              │                                           │
//! │      ▼              ▼                                           │
//! │  document        find / create / update / delete                │
//! │  graph           + optional VectorSearch capability             │
//! │  key-value            │                                         │
//! │                       ▼                                         │
//! │            native index, or brute-force cosine scan             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each backend translates the generic filter/sort/paginate vocabulary in
//! [`query`] into its native query form: the document store builds match
//! expressions, the graph store builds Cypher `WHERE` clauses, and the
//! key-value store scans client-side. Vector search detects native
//! capability once per repository and silently degrades to the shared
//! [`scan`] path when it is unavailable or fails.

pub mod document;
pub mod error;
pub mod graph;
pub mod kv;
pub mod provider;
pub mod query;
pub mod record;
pub mod repository;
pub mod scan;

pub use document::DocumentProvider;
pub use error::{Result, StorageError};
pub use graph::GraphProvider;
pub use kv::KvProvider;
pub use provider::{ConnectionParams, ModelSchema, Provider};
pub use query::{Condition, Filter, FilterClause, FindOptions, SortOrder, DEFAULT_LIMIT};
pub use record::Record;
pub use repository::{Repository, VectorSearch, VectorSearchOptions, VectorSearchResult};
pub use scan::scan_by_similarity;
