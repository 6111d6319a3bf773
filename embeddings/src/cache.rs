//! In-memory cache of computed embeddings.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::EmbeddingVector;

/// How many leading characters of the source text participate in the cache
/// key. Bounding the prefix keeps key computation cheap for arbitrarily long
/// inputs.
const HASH_PREFIX_CHARS: usize = 512;

/// Default entry time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default maximum number of cached entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// A cached embedding with its creation time.
#[derive(Debug, Clone)]
struct CacheEntry {
    vector: EmbeddingVector,
    created_at: Instant,
}

/// Cache for embeddings to avoid redundant remote calls.
///
/// Entries expire after a fixed TTL, checked lazily at read time; there is no
/// background sweep. When the cache is full, the oldest entry is evicted.
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl EmbeddingCache {
    /// Create a cache with the given TTL and size bound.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Compute the hash key for a text, over a bounded prefix.
    fn hash_key(text: &str) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for ch in text.chars().take(HASH_PREFIX_CHARS) {
            ch.hash(&mut hasher);
        }
        format!("{:x}", hasher.finish())
    }

    /// Get a cached embedding, if present and within its TTL.
    ///
    /// A stale entry is removed on the spot and reported as a miss.
    pub async fn get(&self, text: &str) -> Option<EmbeddingVector> {
        let key = Self::hash_key(text);

        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.created_at.elapsed() <= self.ttl => {
                    return Some(entry.vector.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Entry exists but is stale: lazy eviction.
        self.entries.write().await.remove(&key);
        debug!("evicted stale embedding cache entry");
        None
    }

    /// Insert an embedding, evicting the oldest entry when at capacity.
    pub async fn insert(&self, text: &str, vector: EmbeddingVector) {
        let key = Self::hash_key(text);
        let mut entries = self.entries.write().await;

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, v)| v.created_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                vector,
                created_at: Instant::now(),
            },
        );
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        info!("cleared embedding cache");
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.len(),
            max_entries: self.max_entries,
            ttl: self.ttl,
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of entries in the cache.
    pub entries: usize,

    /// Maximum cache size.
    pub max_entries: usize,

    /// Entry time-to-live.
    pub ttl: Duration,
}
