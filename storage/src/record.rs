//! Backend-agnostic record type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An opaque, backend-agnostic entity: an `id` plus arbitrary fields.
///
/// The `id` is stable once returned from a create operation and uniquely
/// identifies the record within its entity collection. One field may hold a
/// fixed-length numeric vector (conventionally `embedding`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier. Empty until assigned by `create`.
    #[serde(default)]
    pub id: String,

    /// All remaining fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record with no id; `create` will assign one.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record with a caller-assigned id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Set a field, consuming and returning the record.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a field by dot-separated path (e.g. `"author.name"`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Shallow-merge a patch into the record: top-level fields are replaced
    /// wholesale, nested values are not merged recursively.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Extract the numeric vector stored at `field`, if any.
    ///
    /// Returns `None` when the field is absent, not an array, or contains a
    /// non-numeric element.
    pub fn vector(&self, field: &str) -> Option<Vec<f32>> {
        self.get(field)?
            .as_array()?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    }
}
