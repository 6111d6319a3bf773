//! Classification boundary.
//!
//! The storage core consumes classification as an opaque collaborator: its
//! result is stored verbatim alongside a record and never interpreted here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Labels produced by the classification collaborator for a piece of text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Content categories.
    pub categories: Vec<String>,

    /// Sentiment score in `[-1, 1]`.
    pub sentiment: f32,

    /// Toxicity score in `[0, 1]`.
    pub toxicity: f32,

    /// Subjectivity score in `[0, 1]`.
    pub subjectivity: f32,

    /// Detected language code.
    pub language: String,

    /// Extracted topics.
    pub topics: Vec<String>,

    /// Extracted named entities.
    pub entities: Vec<String>,
}

/// Contract of the classification collaborator.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Produce labels for a text.
    async fn classify(&self, text: &str) -> Result<Classification>;
}
