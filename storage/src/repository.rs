//! Repository and vector search contracts.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::query::{Filter, FindOptions};
use crate::record::Record;

/// A similarity search hit.
#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    /// The matched record.
    pub record: Record,

    /// Similarity score in `[0, 1]`.
    pub score: f32,
}

/// Options for a vector similarity search.
#[derive(Debug, Clone)]
pub struct VectorSearchOptions {
    /// Maximum number of results to return.
    pub limit: usize,

    /// Minimum similarity score for a result to be included.
    pub min_score: f32,
}

impl Default for VectorSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: 0.0,
        }
    }
}

/// Per-entity CRUD and query surface, identical across all backends.
///
/// Every method maps to one outbound backend call (or one call per item in a
/// batch); repositories hold no mutable per-call state, so concurrent calls
/// against the same repository are safe.
#[async_trait]
pub trait Repository: Send + Sync {
    /// The entity name this repository serves.
    fn entity(&self) -> &str;

    /// Find records matching the filter, honoring skip/limit/sort.
    ///
    /// Returns an empty list when nothing matches, never an error for an
    /// empty result.
    async fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Record>>;

    /// Find a single record by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<Record>>;

    /// Equivalent to `find` with limit 1: first match or `None`.
    async fn find_one(&self, filter: &Filter) -> Result<Option<Record>>;

    /// Count records matching the filter.
    async fn count(&self, filter: &Filter) -> Result<u64>;

    /// Persist a record, assigning an id when absent, and return the stored
    /// form including any backend-injected defaults.
    async fn create(&self, record: Record) -> Result<Record>;

    /// Persist a batch of records.
    ///
    /// Document and graph backends perform a true batch insert; the key-value
    /// backend pipelines independent writes. No atomicity is guaranteed
    /// across the batch on any backend.
    async fn create_many(&self, records: Vec<Record>) -> Result<Vec<Record>>;

    /// Shallow-merge a patch into the record with the given id.
    ///
    /// Returns `None` without writing when the id does not exist; never
    /// creates.
    async fn update_by_id(&self, id: &str, patch: &Map<String, Value>) -> Result<Option<Record>>;

    /// Apply a patch to every record matching the filter; returns the number
    /// of records modified.
    async fn update_many(&self, filter: &Filter, patch: &Map<String, Value>) -> Result<u64>;

    /// Delete the record with the given id, returning it if it existed.
    async fn delete_by_id(&self, id: &str) -> Result<Option<Record>>;

    /// Delete every record matching the filter; returns the number deleted.
    async fn delete_many(&self, filter: &Filter) -> Result<u64>;

    /// The vector similarity search capability, when the backend provides or
    /// can emulate one. Callers probe once and keep the handle rather than
    /// calling a method that may reject per call.
    fn vector_search(&self) -> Option<&dyn VectorSearch> {
        None
    }
}

/// Optional similarity search surface of a repository.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// K-nearest search over the vectors stored at `field`.
    ///
    /// Results are sorted by descending score; ties keep encounter order.
    async fn search(
        &self,
        field: &str,
        query: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>>;
}
