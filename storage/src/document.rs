//! Document-store backend over MongoDB.
//!
//! Filters translate into native match expressions; skip/limit/sort run
//! server-side. Vector search uses an Atlas `$vectorSearch` index when the
//! collection has one, and the in-process scan otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, to_bson, to_document, Bson, Document};
use mongodb::options::{ClientOptions, Credential, ReturnDocument};
use mongodb::{Client, Collection};
use serde_json::{Map, Value};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::provider::{ConnectionParams, ModelSchema, Provider};
use crate::query::{Condition, Filter, FindOptions, SortOrder};
use crate::record::Record;
use crate::repository::{Repository, VectorSearch, VectorSearchOptions, VectorSearchResult};
use crate::scan::scan_by_similarity;

/// Conventional name of the Atlas vector search index.
const VECTOR_INDEX_NAME: &str = "vector_index";

/// Document-store provider owning the MongoDB client.
pub struct DocumentProvider {
    params: ConnectionParams,
    client: RwLock<Option<Client>>,
    models: RwLock<HashMap<String, ModelSchema>>,
    repos: RwLock<HashMap<String, Arc<DocumentRepository>>>,
}

impl DocumentProvider {
    /// Create a provider; no connection is made until `connect`.
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            client: RwLock::new(None),
            models: RwLock::new(HashMap::new()),
            repos: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Provider for DocumentProvider {
    fn name(&self) -> &str {
        "document"
    }

    async fn connect(&self) -> Result<()> {
        let mut client = self.client.write().await;
        if client.is_some() {
            return Ok(());
        }

        let mut options = ClientOptions::parse(&self.params.uri)
            .await
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;
        if let (Some(username), Some(password)) = (&self.params.username, &self.params.password) {
            options.credential = Some(
                Credential::builder()
                    .username(username.clone())
                    .password(password.clone())
                    .build(),
            );
        }

        let connected = Client::with_options(options)
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;

        // Client construction is lazy; ping to surface connection failures
        // here rather than on the first repository call.
        connected
            .database(&self.params.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;

        *client = Some(connected);
        info!(database = %self.params.database, "connected to document store");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut client = self.client.write().await;
        if let Some(client) = client.take() {
            client.shutdown().await;
            self.repos.write().await.clear();
            info!(database = %self.params.database, "disconnected from document store");
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    async fn register_model(&self, entity: &str, schema: ModelSchema) -> Result<()> {
        self.models
            .write()
            .await
            .insert(entity.to_string(), schema);
        debug!(entity, "registered model");
        Ok(())
    }

    async fn repository(&self, entity: &str) -> Result<Arc<dyn Repository>> {
        {
            let repos = self.repos.read().await;
            if let Some(repo) = repos.get(entity) {
                return Ok(repo.clone());
            }
        }

        let client = self.client.read().await;
        let Some(client) = client.as_ref() else {
            return Err(StorageError::NotConnected);
        };

        // The document store has a schema concept: registration is required.
        let schema = self
            .models
            .read()
            .await
            .get(entity)
            .cloned()
            .ok_or_else(|| StorageError::ModelNotRegistered {
                entity: entity.to_string(),
            })?;

        let database = client.database(&self.params.database);
        let repo = Arc::new(DocumentRepository::new(&database, entity, schema));

        let mut repos = self.repos.write().await;
        let repo = repos.entry(entity.to_string()).or_insert(repo).clone();
        Ok(repo)
    }
}

/// Per-entity repository over a MongoDB collection.
pub struct DocumentRepository {
    collection: Collection<Document>,
    entity: String,
    native_index: OnceCell<Option<String>>,
}

impl DocumentRepository {
    fn new(database: &mongodb::Database, entity: &str, schema: ModelSchema) -> Self {
        let name = schema.collection.unwrap_or_else(|| entity.to_string());
        Self {
            collection: database.collection::<Document>(&name),
            entity: entity.to_string(),
            native_index: OnceCell::new(),
        }
    }

    /// Probe once for an Atlas vector search index on this collection.
    ///
    /// Probe failures (e.g. a deployment without Atlas search) are treated as
    /// "unavailable", never raised.
    async fn native_index_name(&self) -> Option<String> {
        self.native_index
            .get_or_init(|| async {
                match self.probe_vector_index().await {
                    Ok(found) => found,
                    Err(err) => {
                        debug!(
                            entity = %self.entity,
                            "vector index probe failed, treating as unavailable: {err}"
                        );
                        None
                    }
                }
            })
            .await
            .clone()
    }

    async fn probe_vector_index(&self) -> mongodb::error::Result<Option<String>> {
        let mut cursor = self.collection.list_search_indexes().await?;
        while let Some(index) = cursor.try_next().await? {
            let name = index.get_str("name").unwrap_or_default();
            let is_vector = index
                .get_str("type")
                .map(|t| t == "vectorSearch")
                .unwrap_or(false)
                || name == VECTOR_INDEX_NAME;
            if is_vector && !name.is_empty() {
                return Ok(Some(name.to_string()));
            }
        }
        Ok(None)
    }

    async fn native_search(
        &self,
        index: &str,
        field: &str,
        query: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        let query_vector: Vec<f64> = query.iter().map(|x| f64::from(*x)).collect();
        let num_candidates = (options.limit * 10).max(100) as i64;

        let pipeline = vec![
            doc! { "$vectorSearch": {
                "index": index,
                "path": field,
                "queryVector": query_vector,
                "limit": options.limit as i64,
                "numCandidates": num_candidates,
            }},
            doc! { "$addFields": { "__score": { "$meta": "vectorSearchScore" } } },
        ];

        let mut cursor = self
            .collection
            .aggregate(pipeline)
            .await
            .map_err(|e| StorageError::backend("vector_search", &self.entity, e))?;

        let mut results = Vec::new();
        while let Some(mut doc) = cursor
            .try_next()
            .await
            .map_err(|e| StorageError::backend("vector_search", &self.entity, e))?
        {
            // Atlas returns a cosine-based similarity already in [0, 1].
            let score = doc.remove("__score").and_then(|b| b.as_f64()).unwrap_or(0.0) as f32;
            if score >= options.min_score {
                results.push(VectorSearchResult {
                    record: document_to_record(doc),
                    score,
                });
            }
        }
        Ok(results)
    }

    async fn scan_search(
        &self,
        field: &str,
        query: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        let candidates = match self.load_vector_candidates(field).await {
            Ok(candidates) => candidates,
            Err(err) => {
                // Similarity search is an enhancement over primary retrieval:
                // when even the scan cannot enumerate, degrade to empty.
                warn!(entity = %self.entity, "vector scan enumeration failed: {err}");
                return Ok(Vec::new());
            }
        };
        Ok(scan_by_similarity(candidates, field, query, options))
    }

    async fn load_vector_candidates(&self, field: &str) -> Result<Vec<Record>> {
        let mut query = Document::new();
        query.insert(field, doc! { "$ne": null });

        let mut cursor = self
            .collection
            .find(query)
            .await
            .map_err(|e| StorageError::backend("vector_search", &self.entity, e))?;

        let mut records = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| StorageError::backend("vector_search", &self.entity, e))?
        {
            records.push(document_to_record(doc));
        }
        Ok(records)
    }
}

#[async_trait]
impl Repository for DocumentRepository {
    fn entity(&self) -> &str {
        &self.entity
    }

    async fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Record>> {
        let query = filter_to_document(filter, &self.entity)?;

        let mut find = self
            .collection
            .find(query)
            .skip(options.skip)
            .limit(options.effective_limit() as i64);
        if !options.sort.is_empty() {
            find = find.sort(sort_to_document(&options.sort));
        }

        let mut cursor = find
            .await
            .map_err(|e| StorageError::backend("find", &self.entity, e))?;

        let mut records = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| StorageError::backend("find", &self.entity, e))?
        {
            records.push(document_to_record(doc));
        }
        Ok(records)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Record>> {
        let doc = self
            .collection
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| StorageError::backend("find_by_id", &self.entity, e))?;
        Ok(doc.map(document_to_record))
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Record>> {
        let query = filter_to_document(filter, &self.entity)?;
        let doc = self
            .collection
            .find_one(query)
            .await
            .map_err(|e| StorageError::backend("find_one", &self.entity, e))?;
        Ok(doc.map(document_to_record))
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let query = filter_to_document(filter, &self.entity)?;
        self.collection
            .count_documents(query)
            .await
            .map_err(|e| StorageError::backend("count", &self.entity, e))
    }

    async fn create(&self, mut record: Record) -> Result<Record> {
        if record.id.is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }
        let doc = record_to_document(&record, &self.entity)?;
        self.collection
            .insert_one(doc)
            .await
            .map_err(|e| StorageError::backend("create", &self.entity, e))?;

        // Return the stored form, including any backend-injected defaults.
        Ok(self.find_by_id(&record.id).await?.unwrap_or(record))
    }

    async fn create_many(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut prepared = Vec::with_capacity(records.len());
        for mut record in records {
            if record.id.is_empty() {
                record.id = uuid::Uuid::new_v4().to_string();
            }
            prepared.push(record);
        }

        let docs = prepared
            .iter()
            .map(|r| record_to_document(r, &self.entity))
            .collect::<Result<Vec<_>>>()?;
        self.collection
            .insert_many(docs)
            .await
            .map_err(|e| StorageError::backend("create_many", &self.entity, e))?;
        Ok(prepared)
    }

    async fn update_by_id(&self, id: &str, patch: &Map<String, Value>) -> Result<Option<Record>> {
        let update = doc! { "$set": patch_to_document(patch, &self.entity)? };
        let doc = self
            .collection
            .find_one_and_update(doc! { "_id": id }, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| StorageError::backend("update_by_id", &self.entity, e))?;
        Ok(doc.map(document_to_record))
    }

    async fn update_many(&self, filter: &Filter, patch: &Map<String, Value>) -> Result<u64> {
        let query = filter_to_document(filter, &self.entity)?;
        let update = doc! { "$set": patch_to_document(patch, &self.entity)? };
        let result = self
            .collection
            .update_many(query, update)
            .await
            .map_err(|e| StorageError::backend("update_many", &self.entity, e))?;
        Ok(result.modified_count)
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<Record>> {
        let doc = self
            .collection
            .find_one_and_delete(doc! { "_id": id })
            .await
            .map_err(|e| StorageError::backend("delete_by_id", &self.entity, e))?;
        Ok(doc.map(document_to_record))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64> {
        let query = filter_to_document(filter, &self.entity)?;
        let result = self
            .collection
            .delete_many(query)
            .await
            .map_err(|e| StorageError::backend("delete_many", &self.entity, e))?;
        Ok(result.deleted_count)
    }

    fn vector_search(&self) -> Option<&dyn VectorSearch> {
        Some(self)
    }
}

#[async_trait]
impl VectorSearch for DocumentRepository {
    async fn search(
        &self,
        field: &str,
        query: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        if let Some(index) = self.native_index_name().await {
            match self.native_search(&index, field, query, options).await {
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

fn json_to_bson(value: &Value, entity: &str) -> Result<Bson> {
    to_bson(value).map_err(|e| StorageError::backend("serialize", entity, e))
}

/// Translate a filter into a MongoDB match expression.
fn filter_to_document(filter: &Filter, entity: &str) -> Result<Document> {
    let mut doc = Document::new();
    for clause in filter.clauses() {
        let key = if clause.field == "id" {
            "_id"
        } else {
            clause.field.as_str()
        };
        match &clause.condition {
            Condition::Eq(value) => {
                doc.insert(key, json_to_bson(value, entity)?);
            }
            Condition::Gte(value) => {
                merge_operator(&mut doc, key, doc! { "$gte": json_to_bson(value, entity)? });
            }
            Condition::Lte(value) => {
                merge_operator(&mut doc, key, doc! { "$lte": json_to_bson(value, entity)? });
            }
            Condition::Between { gte, lte } => {
                merge_operator(
                    &mut doc,
                    key,
                    doc! {
                        "$gte": json_to_bson(gte, entity)?,
                        "$lte": json_to_bson(lte, entity)?,
                    },
                );
            }
            Condition::In(values) => {
                let values = values
                    .iter()
                    .map(|v| json_to_bson(v, entity))
                    .collect::<Result<Vec<_>>>()?;
                merge_operator(&mut doc, key, doc! { "$in": values });
            }
            Condition::Contains(needle) => {
                merge_operator(
                    &mut doc,
                    key,
                    doc! { "$regex": regex::escape(needle), "$options": "i" },
                );
            }
        }
    }
    Ok(doc)
}

/// Merge an operator document into the clause for `key`, so separate range
/// clauses on the same field combine instead of overwriting each other.
fn merge_operator(doc: &mut Document, key: &str, condition: Document) {
    match doc.get_mut(key) {
        Some(Bson::Document(existing)) => existing.extend(condition),
        _ => {
            doc.insert(key, condition);
        }
    }
}

fn sort_to_document(sort: &[(String, SortOrder)]) -> Document {
    let mut doc = Document::new();
    for (field, order) in sort {
        let direction = match order {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        };
        doc.insert(field.as_str(), direction);
    }
    doc
}

fn patch_to_document(patch: &Map<String, Value>, entity: &str) -> Result<Document> {
    to_document(patch).map_err(|e| StorageError::backend("serialize", entity, e))
}

fn record_to_document(record: &Record, entity: &str) -> Result<Document> {
    let mut doc = to_document(&record.fields)
        .map_err(|e| StorageError::backend("serialize", entity, e))?;
    doc.insert("_id", record.id.as_str());
    Ok(doc)
}

fn document_to_record(mut doc: Document) -> Record {
    let id = match doc.remove("_id") {
        Some(Bson::String(s)) => s,
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let fields = match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Record { id, fields }
}
