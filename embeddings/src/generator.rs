//! Embedding generation.
//!
//! The generator resolves embeddings in three stages: cache, remote service,
//! local fallback. Every remote failure degrades to the fallback, so callers
//! never see an error from generation.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::error::{EmbeddingError, Result};
use crate::similarity::normalize;
use crate::{EmbeddingVector, DEFAULT_DIMENSION};

/// Default deadline attached to every remote embedding call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Recommended chunk size for callers batching large backlogs. The generator
/// itself applies no backpressure.
pub const DEFAULT_BATCH_CHUNK: usize = 50;

/// Maximum number of tokens the local fallback reads from the input.
const MAX_FALLBACK_TOKENS: usize = 100;

/// Settings for the embedding generator.
///
/// When both `endpoint` and `api_key` are present the generator runs in
/// remote-with-fallback mode; otherwise it is local-only.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// URL of the remote embedding endpoint.
    pub endpoint: Option<String>,

    /// Bearer token for the remote endpoint.
    pub api_key: Option<String>,

    /// Dimension every produced vector must have.
    pub dimension: usize,

    /// Deadline for remote calls; a timeout is treated like any other
    /// remote failure.
    pub timeout: Duration,
}

impl EmbeddingSettings {
    /// Read settings from `EMBEDDING_SERVICE_ENDPOINT`,
    /// `EMBEDDING_SERVICE_API_KEY`, and `EMBEDDING_DIMENSION`.
    pub fn from_env() -> Self {
        let dimension = std::env::var("EMBEDDING_DIMENSION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_DIMENSION);

        Self {
            endpoint: std::env::var("EMBEDDING_SERVICE_ENDPOINT").ok(),
            api_key: std::env::var("EMBEDDING_SERVICE_API_KEY").ok(),
            dimension,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Settings for a generator that never calls out.
    pub fn local_only(dimension: usize) -> Self {
        Self {
            endpoint: None,
            api_key: None,
            dimension,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn remote_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }
}

/// Produces a fixed-dimension vector for a text string.
pub struct EmbeddingGenerator {
    settings: EmbeddingSettings,
    client: reqwest::Client,
    cache: EmbeddingCache,
}

impl EmbeddingGenerator {
    /// Create a generator with the given settings and a default cache.
    pub fn new(settings: EmbeddingSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            settings,
            client,
            cache: EmbeddingCache::default(),
        }
    }

    /// Create a generator configured from the environment.
    pub fn from_env() -> Self {
        Self::new(EmbeddingSettings::from_env())
    }

    /// Replace the cache.
    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = cache;
        self
    }

    /// The dimension of every vector this generator produces.
    pub fn dimension(&self) -> usize {
        self.settings.dimension
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Generate an embedding for the given text.
    ///
    /// Checks the cache first; on a miss, attempts the remote service when
    /// configured and falls back to the local computation on any failure.
    pub async fn generate(&self, text: &str) -> EmbeddingVector {
        if let Some(hit) = self.cache.get(text).await {
            debug!("embedding cache hit");
            return hit;
        }

        let vector = if self.settings.remote_configured() {
            match self.remote_embed(text).await {
                Ok(vector) => vector,
                Err(err) => {
                    warn!("remote embedding failed, using local fallback: {err}");
                    local_embedding(text, self.settings.dimension)
                }
            }
        } else {
            local_embedding(text, self.settings.dimension)
        };

        self.cache.insert(text, vector.clone()).await;
        vector
    }

    /// Generate embeddings for multiple texts.
    ///
    /// Prefers a single remote call for all uncached texts; if that fails,
    /// each text is generated individually under the usual cache/fallback
    /// rules.
    pub async fn generate_batch(&self, texts: &[String]) -> Vec<EmbeddingVector> {
        let mut results: Vec<Option<EmbeddingVector>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(text).await {
                Some(hit) => results.push(Some(hit)),
                None => {
                    results.push(None);
                    misses.push(i);
                }
            }
        }

        if !misses.is_empty() && self.settings.remote_configured() {
            let miss_texts: Vec<&str> = misses.iter().map(|&i| texts[i].as_str()).collect();
            match self.remote_embed_batch(&miss_texts).await {
                Ok(vectors) => {
                    for (&i, vector) in misses.iter().zip(vectors) {
                        self.cache.insert(&texts[i], vector.clone()).await;
                        results[i] = Some(vector);
                    }
                    misses.clear();
                }
                Err(err) => {
                    warn!("remote batch embedding failed, generating items individually: {err}");
                }
            }
        }

        for &i in &misses {
            results[i] = Some(self.generate(&texts[i]).await);
        }

        results.into_iter().flatten().collect()
    }

    async fn remote_embed(&self, text: &str) -> Result<EmbeddingVector> {
        let (endpoint, api_key) = self.remote_credentials()?;

        let response = self
            .client
            .post(endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::RemoteService(format!(
                "status {}",
                response.status()
            )));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        self.check_dimension(payload.embedding)
    }

    async fn remote_embed_batch(&self, texts: &[&str]) -> Result<Vec<EmbeddingVector>> {
        let (endpoint, api_key) = self.remote_credentials()?;

        let response = self
            .client
            .post(endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&serde_json::json!({ "texts": texts }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::RemoteService(format!(
                "status {}",
                response.status()
            )));
        }

        let payload: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if payload.embeddings.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                payload.embeddings.len()
            )));
        }

        payload
            .embeddings
            .into_iter()
            .map(|v| self.check_dimension(v))
            .collect()
    }

    fn remote_credentials(&self) -> Result<(&str, &str)> {
        self.settings
            .endpoint
            .as_deref()
            .zip(self.settings.api_key.as_deref())
            .ok_or_else(|| EmbeddingError::RemoteService("endpoint not configured".to_string()))
    }

    fn check_dimension(&self, vector: EmbeddingVector) -> Result<EmbeddingVector> {
        if vector.len() != self.settings.dimension {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.settings.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

/// Remote response for a single text.
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Remote response for a batch of texts.
#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Deterministic local fallback embedding.
///
/// Lowercases the text, takes the first 100 whitespace tokens, accumulates
/// each character's code value (scaled into `[0,1]`) at position
/// `(token_index * token_len + char_index) % dimension`, then L2-normalizes.
/// Not semantically meaningful; it exists to guarantee a well-formed,
/// dimension-correct vector under all conditions, including empty input.
pub fn local_embedding(text: &str, dimension: usize) -> EmbeddingVector {
    if dimension == 0 {
        return Vec::new();
    }

    let mut vector = vec![0.0f32; dimension];
    let lowered = text.to_lowercase();

    for (token_index, token) in lowered
        .split_whitespace()
        .take(MAX_FALLBACK_TOKENS)
        .enumerate()
    {
        let token_len = token.chars().count();
        for (char_index, ch) in token.chars().enumerate() {
            let slot = (token_index * token_len + char_index) % dimension;
            vector[slot] += (ch as u32 % 256) as f32 / 255.0;
        }
    }

    normalize(&mut vector);
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote_settings(server: &MockServer, dimension: usize) -> EmbeddingSettings {
        EmbeddingSettings {
            endpoint: Some(format!("{}/embeddings", server.uri())),
            api_key: Some("test-key".to_string()),
            dimension,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_generate_empty_input_has_configured_dimension() {
        let generator = EmbeddingGenerator::new(EmbeddingSettings::local_only(384));
        let vector = generator.generate("").await;

        assert_eq!(vector.len(), 384);
        assert!(vector.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_local_embedding_deterministic() {
        let a = local_embedding("the quick brown fox", 16);
        let b = local_embedding("the quick brown fox", 16);
        assert_eq!(a, b);

        let c = local_embedding("a different text", 16);
        assert_ne!(a, c);
    }

    #[test]
    fn test_local_embedding_case_insensitive() {
        assert_eq!(
            local_embedding("Hello World", 16),
            local_embedding("hello world", 16)
        );
    }

    #[test]
    fn test_local_embedding_is_normalized() {
        let vector = local_embedding("some text", 16);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_remote_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "embedding": [0.0, 1.0, 0.0] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let generator = EmbeddingGenerator::new(remote_settings(&server, 3));
        let vector = generator.generate("hello").await;

        assert_eq!(vector, vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_cache_hit_makes_at_most_one_remote_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0, 0.0, 0.0] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let generator = EmbeddingGenerator::new(remote_settings(&server, 3));
        let first = generator.generate("same text").await;
        let second = generator.generate("same text").await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_remote_error_falls_back_to_local() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let generator = EmbeddingGenerator::new(remote_settings(&server, 8));
        let vector = generator.generate("hello world").await;

        assert_eq!(vector, local_embedding("hello world", 8));
    }

    #[tokio::test]
    async fn test_malformed_response_falls_back_to_local() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
            .mount(&server)
            .await;

        let generator = EmbeddingGenerator::new(remote_settings(&server, 8));
        let vector = generator.generate("hello world").await;

        assert_eq!(vector, local_embedding("hello world", 8));
    }

    #[tokio::test]
    async fn test_wrong_dimension_falls_back_to_local() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0, 2.0] })),
            )
            .mount(&server)
            .await;

        let generator = EmbeddingGenerator::new(remote_settings(&server, 8));
        let vector = generator.generate("hello world").await;

        assert_eq!(vector, local_embedding("hello world", 8));
    }

    #[tokio::test]
    async fn test_batch_prefers_single_remote_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_json(json!({ "texts": ["one", "two"] })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "embeddings": [[1.0, 0.0], [0.0, 1.0]] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let generator = EmbeddingGenerator::new(remote_settings(&server, 2));
        let vectors = generator
            .generate_batch(&["one".to_string(), "two".to_string()])
            .await;

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_batch_skips_cached_texts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_json(json!({ "text": "one" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0, 0.0] })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_json(json!({ "texts": ["two"] })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.0, 1.0]] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let generator = EmbeddingGenerator::new(remote_settings(&server, 2));
        generator.generate("one").await;

        let vectors = generator
            .generate_batch(&["one".to_string(), "two".to_string()])
            .await;

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_batch_failure_falls_back_per_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let generator = EmbeddingGenerator::new(remote_settings(&server, 8));
        let vectors = generator
            .generate_batch(&["one".to_string(), "two".to_string()])
            .await;

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], local_embedding("one", 8));
        assert_eq!(vectors[1], local_embedding("two", 8));
    }
}
