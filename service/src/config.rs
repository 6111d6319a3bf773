//! Storage service configuration.

use serde::{Deserialize, Serialize};

use pulse_storage::ConnectionParams;

/// The closed set of backend kinds a service can be built over.
///
/// Resolved to a concrete provider exactly once, at service construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Document store (MongoDB).
    Document,
    /// Graph store (Neo4j).
    Graph,
    /// Key-value store (Redis).
    KeyValue,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Document => write!(f, "document"),
            Self::Graph => write!(f, "graph"),
            Self::KeyValue => write!(f, "key-value"),
        }
    }
}

/// Configuration for a storage service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend to run over.
    pub backend: BackendKind,

    /// Backend connection parameters.
    pub connection: ConnectionParams,
}

impl StorageConfig {
    /// Create a configuration without credentials.
    pub fn new(
        backend: BackendKind,
        uri: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            connection: ConnectionParams::new(uri, database),
        }
    }

    /// Attach credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.connection = self.connection.with_credentials(username, password);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Document.to_string(), "document");
        assert_eq!(BackendKind::Graph.to_string(), "graph");
        assert_eq!(BackendKind::KeyValue.to_string(), "key-value");
    }

    #[test]
    fn test_backend_kind_serialization() {
        let json = serde_json::to_string(&BackendKind::KeyValue).unwrap();
        assert_eq!(json, "\"key_value\"");

        let back: BackendKind = serde_json::from_str("\"document\"").unwrap();
        assert_eq!(back, BackendKind::Document);
    }

    #[test]
    fn test_config_builder() {
        let config = StorageConfig::new(BackendKind::Graph, "neo4j://localhost:7687", "neo4j")
            .with_credentials("neo4j", "secret");

        assert_eq!(config.connection.username.as_deref(), Some("neo4j"));
        assert_eq!(config.connection.password.as_deref(), Some("secret"));
    }
}
