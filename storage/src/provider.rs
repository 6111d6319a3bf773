//! Provider contract: connection lifecycle, model registration, and
//! repository construction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::repository::Repository;

/// Connection parameters shared by all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Backend URI (e.g. `mongodb://…`, `neo4j://…`, `redis://…`).
    pub uri: String,

    /// Database name (database selector for the key-value backend).
    pub database: String,

    /// Optional username.
    pub username: Option<String>,

    /// Optional password.
    pub password: Option<String>,
}

impl ConnectionParams {
    /// Create parameters without credentials.
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            username: None,
            password: None,
        }
    }

    /// Attach credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Schema hints recorded for a registered model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Backend collection/label name; defaults to the entity name.
    pub collection: Option<String>,

    /// Field holding the embedding vector, when the entity has one.
    pub vector_field: Option<String>,

    /// Dimension of the embedding vectors.
    pub vector_dimension: Option<usize>,
}

/// Owns a backend connection and constructs repositories.
///
/// The connection handle is exclusively owned by the provider; repositories
/// hold cheap clones of it and never close or reopen it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend name (e.g. "document", "graph", "key-value").
    fn name(&self) -> &str;

    /// Establish the backend connection. A no-op when already connected.
    async fn connect(&self) -> Result<()>;

    /// Tear down the backend connection. A no-op when not connected.
    async fn disconnect(&self) -> Result<()>;

    /// Whether `connect` has completed.
    async fn is_connected(&self) -> bool;

    /// Record a model schema for an entity.
    ///
    /// Required before `repository` on backends with a schema concept
    /// (document); a recorded no-op on schema-less backends (graph,
    /// key-value) that must not fail.
    async fn register_model(&self, entity: &str, schema: ModelSchema) -> Result<()>;

    /// Get the repository for an entity, lazily constructing and memoizing
    /// exactly one instance per entity name for the provider's lifetime.
    ///
    /// Fails with `NotConnected` before `connect`, and with
    /// `ModelNotRegistered` when the backend requires registration and it was
    /// skipped.
    async fn repository(&self, entity: &str) -> Result<Arc<dyn Repository>>;
}
