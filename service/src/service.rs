//! Storage service façade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use pulse_storage::{
    DocumentProvider, GraphProvider, KvProvider, ModelSchema, Provider, Repository,
};

use crate::config::{BackendKind, StorageConfig};
use crate::error::{Result, ServiceError};

/// The single façade consumers use for persistence.
///
/// Owns exactly one active provider, selected at construction, and enforces
/// one invariant: no repository or model operation may run before
/// `connect()` has completed.
pub struct StorageService {
    provider: Arc<dyn Provider>,
    initialized: AtomicBool,
}

impl StorageService {
    /// Build a service over the backend named in the configuration.
    ///
    /// The backend kind resolves to a concrete provider exactly once, here;
    /// call sites never match on backend names.
    pub fn new(config: StorageConfig) -> Self {
        let provider: Arc<dyn Provider> = match config.backend {
            BackendKind::Document => Arc::new(DocumentProvider::new(config.connection)),
            BackendKind::Graph => Arc::new(GraphProvider::new(config.connection)),
            BackendKind::KeyValue => Arc::new(KvProvider::new(config.connection)),
        };
        Self {
            provider,
            initialized: AtomicBool::new(false),
        }
    }

    /// Connect the active provider. Idempotent.
    pub async fn connect(&self) -> Result<()> {
        self.provider.connect().await?;
        self.initialized.store(true, Ordering::SeqCst);
        info!(backend = self.provider.name(), "storage service connected");
        Ok(())
    }

    /// Disconnect the active provider. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.provider.disconnect().await?;
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the active provider is connected.
    pub async fn is_connected(&self) -> bool {
        self.provider.is_connected().await
    }

    /// Name of the active backend.
    pub fn backend(&self) -> &str {
        self.provider.name()
    }

    /// Register a model schema for an entity.
    pub async fn register_model(&self, entity: &str, schema: ModelSchema) -> Result<()> {
        self.ensure_initialized()?;
        self.provider.register_model(entity, schema).await?;
        Ok(())
    }

    /// Get the repository for an entity.
    pub async fn repository(&self, entity: &str) -> Result<Arc<dyn Repository>> {
        self.ensure_initialized()?;
        Ok(self.provider.repository(entity).await?)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ServiceError::NotInitialized);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_storage::ModelSchema;

    fn service(backend: BackendKind) -> StorageService {
        let config = match backend {
            BackendKind::Document => {
                StorageConfig::new(backend, "mongodb://localhost:27017", "pulse_test")
            }
            BackendKind::Graph => StorageConfig::new(backend, "neo4j://localhost:7687", "neo4j"),
            BackendKind::KeyValue => StorageConfig::new(backend, "redis://localhost:6379", "0"),
        };
        StorageService::new(config)
    }

    #[tokio::test]
    async fn test_repository_before_connect_is_rejected() {
        for backend in [BackendKind::Document, BackendKind::Graph, BackendKind::KeyValue] {
            let service = service(backend);
            let err = service
                .repository("posts")
                .await
                .err()
                .expect("repository access must fail before connect");
            assert!(matches!(err, ServiceError::NotInitialized), "{backend}");
        }
    }

    #[tokio::test]
    async fn test_register_model_before_connect_is_rejected() {
        let service = service(BackendKind::KeyValue);
        let err = service
            .register_model("posts", ModelSchema::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotInitialized));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let service = service(BackendKind::KeyValue);

        service.disconnect().await.unwrap();
        assert!(!service.is_connected().await);

        service.disconnect().await.unwrap();
        assert!(!service.is_connected().await);
    }

    #[tokio::test]
    async fn test_backend_names_match_providers() {
        assert_eq!(service(BackendKind::Document).backend(), "document");
        assert_eq!(service(BackendKind::Graph).backend(), "graph");
        assert_eq!(service(BackendKind::KeyValue).backend(), "key-value");
    }
}
