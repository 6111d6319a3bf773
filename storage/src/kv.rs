//! Key-value backend over Redis.
//!
//! Records are stored as JSON strings under `{entity}:{id}`, with a per-entity
//! id set (`{entity}:ids`) for enumeration. Redis has no native query model
//! for this layout, so `find` is a client-side predicate scan and batch
//! writes are pipelined independent commands. Vector search probes for the
//! RediSearch module; a native KNN attempt that fails for any reason (module
//! or index absent, unexpected reply) falls back to the in-process scan.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo};
use serde_json::{Map, Value};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::provider::{ConnectionParams, ModelSchema, Provider};
use crate::query::{apply_in_process, Filter, FindOptions};
use crate::record::Record;
use crate::repository::{Repository, VectorSearch, VectorSearchOptions, VectorSearchResult};
use crate::scan::scan_by_similarity;

/// Key-value provider owning the Redis connection manager.
pub struct KvProvider {
    params: ConnectionParams,
    manager: RwLock<Option<ConnectionManager>>,
    models: RwLock<HashMap<String, ModelSchema>>,
    repos: RwLock<HashMap<String, Arc<KvRepository>>>,
}

impl KvProvider {
    /// Create a provider; no connection is made until `connect`.
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            manager: RwLock::new(None),
            models: RwLock::new(HashMap::new()),
            repos: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Provider for KvProvider {
    fn name(&self) -> &str {
        "key-value"
    }

    async fn connect(&self) -> Result<()> {
        let mut manager = self.manager.write().await;
        if manager.is_some() {
            return Ok(());
        }

        let mut info = self
            .params
            .uri
            .as_str()
            .into_connection_info()
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;
        if let Some(username) = &self.params.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &self.params.password {
            info.redis.password = Some(password.clone());
        }
        // The "database" of a Redis deployment is its numeric db selector.
        if let Ok(db) = self.params.database.parse::<i64>() {
            info.redis.db = db;
        }

        let client = redis::Client::open(info)
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;
        let connected = client
            .get_connection_manager()
            .await
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;

        let mut probe = connected.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut probe)
            .await
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;

        *manager = Some(connected);
        info!(database = %self.params.database, "connected to key-value store");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut manager = self.manager.write().await;
        if manager.take().is_some() {
            self.repos.write().await.clear();
            info!(database = %self.params.database, "disconnected from key-value store");
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.manager.read().await.is_some()
    }

    async fn register_model(&self, entity: &str, schema: ModelSchema) -> Result<()> {
        // Schema-less backend: recorded for introspection, never required.
        self.models
            .write()
            .await
            .insert(entity.to_string(), schema);
        debug!(entity, "recorded model registration");
        Ok(())
    }

    async fn repository(&self, entity: &str) -> Result<Arc<dyn Repository>> {
        {
            let repos = self.repos.read().await;
            if let Some(repo) = repos.get(entity) {
                return Ok(repo.clone());
            }
        }

        let manager = self.manager.read().await;
        let Some(manager) = manager.as_ref() else {
            return Err(StorageError::NotConnected);
        };

        let repo = Arc::new(KvRepository::new(manager.clone(), entity));

        let mut repos = self.repos.write().await;
        let repo = repos.entry(entity.to_string()).or_insert(repo).clone();
        Ok(repo)
    }
}

/// Per-entity repository over a key namespace.
pub struct KvRepository {
    manager: ConnectionManager,
    entity: String,
    native_vector_search: OnceCell<bool>,
}

impl KvRepository {
    fn new(manager: ConnectionManager, entity: &str) -> Self {
        Self {
            manager,
            entity: entity.to_string(),
            native_vector_search: OnceCell::new(),
        }
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}:{}", self.entity, id)
    }

    fn ids_key(&self) -> String {
        format!("{}:ids", self.entity)
    }

    fn search_index(&self) -> String {
        format!("idx:{}", self.entity)
    }

    /// Load every record of the entity, in sorted-id order so scans are
    /// deterministic.
    async fn load_all(&self, operation: &'static str) -> Result<Vec<Record>> {
        let mut conn = self.manager.clone();

        let mut ids: Vec<String> = conn
            .smembers(self.ids_key())
            .await
            .map_err(|e| StorageError::backend(operation, &self.entity, e))?;
        ids.sort();

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
        let raw: Vec<Option<String>> = conn
            .mget(&keys)
            .await
            .map_err(|e| StorageError::backend(operation, &self.entity, e))?;

        let mut records = Vec::new();
        for (id, payload) in ids.iter().zip(raw) {
            let Some(payload) = payload else {
                continue;
            };
            match serde_json::from_str::<Record>(&payload) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(entity = %self.entity, id = %id, "skipping undecodable record: {err}");
                }
            }
        }
        Ok(records)
    }

    async fn store(&self, operation: &'static str, record: &Record) -> Result<()> {
        let payload = serde_json::to_string(record)
            .map_err(|e| StorageError::backend(operation, &self.entity, e))?;
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(self.record_key(&record.id), payload)
            .await
            .map_err(|e| StorageError::backend(operation, &self.entity, e))?;
        Ok(())
    }

    /// Probe once for the RediSearch module.
    async fn has_native_vector_search(&self) -> bool {
        *self
            .native_vector_search
            .get_or_init(|| async {
                match self.probe_search_module().await {
                    Ok(found) => found,
                    Err(err) => {
                        debug!(
                            entity = %self.entity,
                            "search module probe failed, treating as unavailable: {err}"
                        );
                        false
                    }
                }
            })
            .await
    }

    async fn probe_search_module(&self) -> redis::RedisResult<bool> {
        let mut conn = self.manager.clone();
        let modules: redis::Value = redis::cmd("MODULE")
            .arg("LIST")
            .query_async(&mut conn)
            .await?;
        Ok(value_mentions_module(&modules, "search"))
    }

    async fn native_search(
        &self,
        field: &str,
        query: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        let mut conn = self.manager.clone();

        let blob: Vec<u8> = query.iter().flat_map(|x| x.to_le_bytes()).collect();
        let knn = format!("*=>[KNN {} @{} $vec AS __score]", options.limit, field);

        let reply: redis::Value = redis::cmd("FT.SEARCH")
            .arg(self.search_index())
            .arg(&knn)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(&blob)
            .arg("SORTBY")
            .arg("__score")
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::backend("vector_search", &self.entity, e))?;

        let hits = parse_knn_reply(&reply).ok_or_else(|| {
            StorageError::backend(
                "vector_search",
                &self.entity,
                "unexpected FT.SEARCH reply shape",
            )
        })?;

        let prefix = format!("{}:", self.entity);
        let mut results = Vec::new();
        for (key, distance) in hits {
            let id = key.strip_prefix(&prefix).unwrap_or(&key);
            let Some(record) = self.find_by_id(id).await? else {
                continue;
            };
            // RediSearch KNN reports a distance; convert to similarity.
            let score = 1.0 - distance;
            if score >= options.min_score {
                results.push(VectorSearchResult { record, score });
            }
        }
        results.truncate(options.limit);
        Ok(results)
    }

    async fn scan_search(
        &self,
        field: &str,
        query: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        let candidates = match self.load_all("vector_search").await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(entity = %self.entity, "vector scan enumeration failed: {err}");
                return Ok(Vec::new());
            }
        };
        Ok(scan_by_similarity(candidates, field, query, options))
    }
}

#[async_trait]
impl Repository for KvRepository {
    fn entity(&self) -> &str {
        &self.entity
    }

    async fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Record>> {
        let records = self.load_all("find").await?;
        let matching: Vec<Record> = records
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();
        Ok(apply_in_process(matching, options))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Record>> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = conn
            .get(self.record_key(id))
            .await
            .map_err(|e| StorageError::backend("find_by_id", &self.entity, e))?;

        match payload {
            None => Ok(None),
            Some(payload) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|e| StorageError::backend("find_by_id", &self.entity, e)),
        }
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Record>> {
        let records = self.find(filter, &FindOptions::new().limit(1)).await?;
        Ok(records.into_iter().next())
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let records = self.load_all("count").await?;
        Ok(records.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn create(&self, mut record: Record) -> Result<Record> {
        if record.id.is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }

        let payload = serde_json::to_string(&record)
            .map_err(|e| StorageError::backend("create", &self.entity, e))?;

        let mut conn = self.manager.clone();
        redis::pipe()
            .set(self.record_key(&record.id), payload)
            .ignore()
            .sadd(self.ids_key(), record.id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StorageError::backend("create", &self.entity, e))?;

        Ok(record)
    }

    async fn create_many(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        // Independent writes in one pipeline; no atomicity across the batch.
        let mut pipe = redis::pipe();
        let mut prepared = Vec::with_capacity(records.len());
        for mut record in records {
            if record.id.is_empty() {
                record.id = uuid::Uuid::new_v4().to_string();
            }
            let payload = serde_json::to_string(&record)
                .map_err(|e| StorageError::backend("create_many", &self.entity, e))?;
            pipe.set(self.record_key(&record.id), payload).ignore();
            pipe.sadd(self.ids_key(), record.id.as_str()).ignore();
            prepared.push(record);
        }

        let mut conn = self.manager.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StorageError::backend("create_many", &self.entity, e))?;

        Ok(prepared)
    }

    async fn update_by_id(&self, id: &str, patch: &Map<String, Value>) -> Result<Option<Record>> {
        let Some(mut record) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        record.merge(patch);
        self.store("update_by_id", &record).await?;
        Ok(Some(record))
    }

    async fn update_many(&self, filter: &Filter, patch: &Map<String, Value>) -> Result<u64> {
        let records = self.load_all("update_many").await?;

        let mut pipe = redis::pipe();
        let mut modified = 0u64;
        for mut record in records {
            if !filter.matches(&record) {
                continue;
            }
            record.merge(patch);
            let payload = serde_json::to_string(&record)
                .map_err(|e| StorageError::backend("update_many", &self.entity, e))?;
            pipe.set(self.record_key(&record.id), payload).ignore();
            modified += 1;
        }

        if modified > 0 {
            let mut conn = self.manager.clone();
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(|e| StorageError::backend("update_many", &self.entity, e))?;
        }
        Ok(modified)
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<Record>> {
        let Some(record) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let mut conn = self.manager.clone();
        redis::pipe()
            .del(self.record_key(id))
            .ignore()
            .srem(self.ids_key(), id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StorageError::backend("delete_by_id", &self.entity, e))?;

        Ok(Some(record))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64> {
        let records = self.load_all("delete_many").await?;

        let mut pipe = redis::pipe();
        let mut deleted = 0u64;
        for record in &records {
            if !filter.matches(record) {
                continue;
            }
            pipe.del(self.record_key(&record.id)).ignore();
            pipe.srem(self.ids_key(), record.id.as_str()).ignore();
            deleted += 1;
        }

        if deleted > 0 {
            let mut conn = self.manager.clone();
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(|e| StorageError::backend("delete_many", &self.entity, e))?;
        }
        Ok(deleted)
    }

    fn vector_search(&self) -> Option<&dyn VectorSearch> {
        Some(self)
    }
}

#[async_trait]
impl VectorSearch for KvRepository {
    async fn search(
        &self,
        field: &str,
        query: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        if self.has_native_vector_search().await {
            match self.native_search(field, query, options).await {
                Ok(results) => return Ok(results),
                Err(err) => {
                    warn!(
                        entity = %self.entity,
                        "native vector search failed, falling back to scan: {err}"
                    );
                }
            }
        }
        self.scan_search(field, query, options).await
    }
}

/// Whether a `MODULE LIST` reply mentions the given module name.
fn value_mentions_module(value: &redis::Value, name: &str) -> bool {
    match value {
        redis::Value::Array(items) | redis::Value::Set(items) => {
            items.iter().any(|v| value_mentions_module(v, name))
        }
        redis::Value::Map(pairs) => pairs
            .iter()
            .any(|(k, v)| value_mentions_module(k, name) || value_mentions_module(v, name)),
        redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).eq_ignore_ascii_case(name),
        redis::Value::SimpleString(s) => s.eq_ignore_ascii_case(name),
        _ => false,
    }
}

/// Parse an `FT.SEARCH` KNN reply into `(key, distance)` pairs.
///
/// Returns `None` on any unexpected shape so the caller can fall back.
fn parse_knn_reply(reply: &redis::Value) -> Option<Vec<(String, f32)>> {
    let redis::Value::Array(items) = reply else {
        return None;
    };

    let mut iter = items.iter();
    iter.next()?; // total-hits count

    let mut hits = Vec::new();
    while let Some(key) = iter.next() {
        let key = value_as_string(key)?;
        let redis::Value::Array(pairs) = iter.next()? else {
            return None;
        };

        let mut distance = None;
        let mut i = 0;
        while i + 1 < pairs.len() {
            if value_as_string(&pairs[i]).as_deref() == Some("__score") {
                distance = value_as_string(&pairs[i + 1]).and_then(|s| s.parse::<f32>().ok());
            }
            i += 2;
        }

        hits.push((key, distance?));
    }
    Some(hits)
}

fn value_as_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bulk(s: &str) -> redis::Value {
        redis::Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_module_list_detection() {
        let reply = redis::Value::Array(vec![redis::Value::Array(vec![
            bulk("name"),
            bulk("search"),
            bulk("ver"),
            redis::Value::Int(20810),
        ])]);
        assert!(value_mentions_module(&reply, "search"));
        assert!(!value_mentions_module(&reply, "timeseries"));
        assert!(!value_mentions_module(&redis::Value::Array(vec![]), "search"));
    }

    #[test]
    fn test_parse_knn_reply() {
        let reply = redis::Value::Array(vec![
            redis::Value::Int(2),
            bulk("posts:a"),
            redis::Value::Array(vec![bulk("__score"), bulk("0.25")]),
            bulk("posts:b"),
            redis::Value::Array(vec![bulk("__score"), bulk("0.5")]),
        ]);

        let hits = parse_knn_reply(&reply).unwrap();
        assert_eq!(
            hits,
            vec![("posts:a".to_string(), 0.25), ("posts:b".to_string(), 0.5)]
        );
    }

    #[test]
    fn test_parse_knn_reply_rejects_unexpected_shapes() {
        assert!(parse_knn_reply(&redis::Value::Int(0)).is_none());

        // A hit without a __score pair is malformed.
        let reply = redis::Value::Array(vec![
            redis::Value::Int(1),
            bulk("posts:a"),
            redis::Value::Array(vec![bulk("other"), bulk("1")]),
        ]);
        assert!(parse_knn_reply(&reply).is_none());
    }
}
