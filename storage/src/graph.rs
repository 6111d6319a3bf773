//! Graph-store backend over Neo4j.
//!
//! Records are nodes labeled with the entity name; filters translate into
//! Cypher `WHERE` clauses with bound parameters. Neo4j properties cannot
//! nest, so object and non-numeric array values are stored as JSON text and
//! re-parsed on read; embedding vectors stay native float lists so a vector
//! index can serve them. Vector search uses the `db.index.vector.queryNodes`
//! procedure when present, and the in-process scan otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use neo4rs::{
    query, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Node, Query,
};
use serde_json::{Map, Value};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::provider::{ConnectionParams, ModelSchema, Provider};
use crate::query::{Condition, Filter, FindOptions, SortOrder};
use crate::record::Record;
use crate::repository::{Repository, VectorSearch, VectorSearchOptions, VectorSearchResult};
use crate::scan::scan_by_similarity;

/// Graph-store provider owning the Neo4j connection.
pub struct GraphProvider {
    params: ConnectionParams,
    graph: RwLock<Option<Graph>>,
    models: RwLock<HashMap<String, ModelSchema>>,
    repos: RwLock<HashMap<String, Arc<GraphRepository>>>,
}

impl GraphProvider {
    /// Create a provider; no connection is made until `connect`.
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            graph: RwLock::new(None),
            models: RwLock::new(HashMap::new()),
            repos: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Provider for GraphProvider {
    fn name(&self) -> &str {
        "graph"
    }

    async fn connect(&self) -> Result<()> {
        let mut graph = self.graph.write().await;
        if graph.is_some() {
            return Ok(());
        }

        let config = ConfigBuilder::default()
            .uri(&self.params.uri)
            .user(self.params.username.clone().unwrap_or_default())
            .password(self.params.password.clone().unwrap_or_default())
            .db(self.params.database.as_str())
            .build()
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;

        let connected = Graph::connect(config)
            .await
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;

        // Surface handshake failures here rather than on the first query.
        connected
            .run(query("RETURN 1"))
            .await
            .map_err(|e| StorageError::backend("connect", &self.params.database, e))?;

        *graph = Some(connected);
        info!(database = %self.params.database, "connected to graph store");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut graph = self.graph.write().await;
        if graph.take().is_some() {
            self.repos.write().await.clear();
            info!(database = %self.params.database, "disconnected from graph store");
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.graph.read().await.is_some()
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

        let graph = self.graph.read().await;
        let Some(graph) = graph.as_ref() else {
            return Err(StorageError::NotConnected);
        };

        let repo = Arc::new(GraphRepository::new(graph.clone(), entity));

        let mut repos = self.repos.write().await;
        let repo = repos.entry(entity.to_string()).or_insert(repo).clone();
        Ok(repo)
    }
}

/// Per-entity repository over nodes carrying the entity label.
pub struct GraphRepository {
    graph: Graph,
    entity: String,
    label: String,
    native_vector_search: OnceCell<bool>,
}

impl GraphRepository {
    fn new(graph: Graph, entity: &str) -> Self {
        Self {
            graph,
            entity: entity.to_string(),
            label: escape_label(entity),
            native_vector_search: OnceCell::new(),
        }
    }

    fn backend_err(
        &self,
        operation: &'static str,
    ) -> impl Fn(neo4rs::Error) -> StorageError + '_ {
        move |e| StorageError::backend(operation, &self.entity, e)
    }

    async fn fetch_records(&self, q: Query, operation: &'static str) -> Result<Vec<Record>> {
        let mut rows = self
            .graph
            .execute(q)
            .await
            .map_err(self.backend_err(operation))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(self.backend_err(operation))? {
            let node = row
                .get::<Node>("n")
                .map_err(|e| StorageError::backend(operation, &self.entity, e))?;
            records.push(node_to_record(&node));
        }
        Ok(records)
    }

    async fn fetch_count(&self, q: Query, operation: &'static str) -> Result<u64> {
        let mut rows = self
            .graph
            .execute(q)
            .await
            .map_err(self.backend_err(operation))?;

        if let Some(row) = rows.next().await.map_err(self.backend_err(operation))? {
            let count = row
                .get::<i64>("count")
                .map_err(|e| StorageError::backend(operation, &self.entity, e))?;
            return Ok(count.max(0) as u64);
        }
        Ok(0)
    }

    /// Probe once for the vector query procedure.
    async fn has_native_vector_search(&self) -> bool {
        *self
            .native_vector_search
            .get_or_init(|| async {
                match self.probe_vector_procedure().await {
                    Ok(found) => found,
                    Err(err) => {
                        debug!(
                            entity = %self.entity,
                            "vector procedure probe failed, treating as unavailable: {err}"
                        );
                        false
                    }
                }
            })
            .await
    }

    async fn probe_vector_procedure(&self) -> std::result::Result<bool, neo4rs::Error> {
        let q = query("SHOW PROCEDURES YIELD name WHERE name = $name RETURN count(*) AS count")
            .param("name", "db.index.vector.queryNodes");
        let mut rows = self.graph.execute(q).await?;
        if let Some(row) = rows.next().await? {
            if let Ok(count) = row.get::<i64>("count") {
                return Ok(count > 0);
            }
        }
        Ok(false)
    }

    async fn native_search(
        &self,
        field: &str,
        query_vector: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        let vector = BoltType::List(BoltList {
            value: query_vector
                .iter()
                .map(|x| BoltType::from(f64::from(*x)))
                .collect(),
        });

        let q = query(
            "CALL db.index.vector.queryNodes($index, $limit, $vector) \
             YIELD node, score RETURN node, score",
        )
        .param("index", vector_index_name(&self.entity, field))
        .param("limit", options.limit as i64)
        .param("vector", vector);

        let mut rows = self
            .graph
            .execute(q)
            .await
            .map_err(self.backend_err("vector_search"))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(self.backend_err("vector_search"))?
        {
            let node = row
                .get::<Node>("node")
                .map_err(|e| StorageError::backend("vector_search", &self.entity, e))?;
            // Cosine vector indexes report similarity in [0, 1] directly.
            let score = row.get::<f64>("score").unwrap_or(0.0) as f32;
            if score >= options.min_score {
                results.push(VectorSearchResult {
                    record: node_to_record(&node),
                    score,
                });
            }
        }
        Ok(results)
    }

    async fn scan_search(
        &self,
        field: &str,
        query_vector: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        let cypher = format!(
            "MATCH (n:{label}) WHERE {prop} IS NOT NULL RETURN n",
            label = self.label,
            prop = property_ref(field),
        );

        let candidates = match self.fetch_records(query(&cypher), "vector_search").await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(entity = %self.entity, "vector scan enumeration failed: {err}");
                return Ok(Vec::new());
            }
        };
        Ok(scan_by_similarity(candidates, field, query_vector, options))
    }
}

#[async_trait]
impl Repository for GraphRepository {
    fn entity(&self) -> &str {
        &self.entity
    }

    async fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Record>> {
        let (where_clause, params) = filter_to_cypher(filter);

        let mut cypher = format!("MATCH (n:{label})", label = self.label);
        if !where_clause.is_empty() {
            cypher.push_str(" WHERE ");
            cypher.push_str(&where_clause);
        }
        cypher.push_str(" RETURN n");
        if !options.sort.is_empty() {
            let keys: Vec<String> = options
                .sort
                .iter()
                .map(|(field, order)| {
                    let direction = match order {
                        SortOrder::Asc => "ASC",
                        SortOrder::Desc => "DESC",
                    };
                    format!("{} {direction}", property_ref(field))
                })
                .collect();
            cypher.push_str(" ORDER BY ");
            cypher.push_str(&keys.join(", "));
        }
        cypher.push_str(" SKIP $skip LIMIT $limit");

        let mut q = query(&cypher)
            .param("skip", options.skip as i64)
            .param("limit", options.effective_limit() as i64);
        for (name, value) in params {
            q = q.param(&name, value);
        }

        self.fetch_records(q, "find").await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Record>> {
        let cypher = format!(
            "MATCH (n:{label} {{ id: $id }}) RETURN n LIMIT 1",
            label = self.label,
        );
        let records = self
            .fetch_records(query(&cypher).param("id", id), "find_by_id")
            .await?;
        Ok(records.into_iter().next())
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Record>> {
        let records = self.find(filter, &FindOptions::new().limit(1)).await?;
        Ok(records.into_iter().next())
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let (where_clause, params) = filter_to_cypher(filter);

        let mut cypher = format!("MATCH (n:{label})", label = self.label);
        if !where_clause.is_empty() {
            cypher.push_str(" WHERE ");
            cypher.push_str(&where_clause);
        }
        cypher.push_str(" RETURN count(n) AS count");

        let mut q = query(&cypher);
        for (name, value) in params {
            q = q.param(&name, value);
        }

        self.fetch_count(q, "count").await
    }

    async fn create(&self, mut record: Record) -> Result<Record> {
        if record.id.is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }

        let cypher = format!(
            "CREATE (n:{label}) SET n = $props RETURN n",
            label = self.label,
        );
        let q = query(&cypher).param("props", record_to_bolt(&record));

        let records = self.fetch_records(q, "create").await?;
        Ok(records.into_iter().next().unwrap_or(record))
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

        let rows = BoltType::List(BoltList {
            value: prepared.iter().map(record_to_bolt).collect(),
        });

        let cypher = format!(
            "UNWIND $rows AS row CREATE (n:{label}) SET n = row RETURN n",
            label = self.label,
        );
        let stored = self
            .fetch_records(query(&cypher).param("rows", rows), "create_many")
            .await?;

        if stored.len() == prepared.len() {
            Ok(stored)
        } else {
            Ok(prepared)
        }
    }

    async fn update_by_id(&self, id: &str, patch: &Map<String, Value>) -> Result<Option<Record>> {
        let (set_clause, params) = patch_to_cypher(patch);

        let cypher = if set_clause.is_empty() {
            format!(
                "MATCH (n:{label} {{ id: $id }}) RETURN n LIMIT 1",
                label = self.label,
            )
        } else {
            format!(
                "MATCH (n:{label} {{ id: $id }}) SET {set_clause} RETURN n",
                label = self.label,
            )
        };

        let mut q = query(&cypher).param("id", id);
        for (name, value) in params {
            q = q.param(&name, value);
        }

        let records = self.fetch_records(q, "update_by_id").await?;
        Ok(records.into_iter().next())
    }

    async fn update_many(&self, filter: &Filter, patch: &Map<String, Value>) -> Result<u64> {
        let (set_clause, set_params) = patch_to_cypher(patch);
        if set_clause.is_empty() {
            return Ok(0);
        }

        let (where_clause, filter_params) = filter_to_cypher(filter);

        let mut cypher = format!("MATCH (n:{label})", label = self.label);
        if !where_clause.is_empty() {
            cypher.push_str(" WHERE ");
            cypher.push_str(&where_clause);
        }
        cypher.push_str(&format!(" SET {set_clause} RETURN count(n) AS count"));

        let mut q = query(&cypher);
        for (name, value) in filter_params.into_iter().chain(set_params) {
            q = q.param(&name, value);
        }

        self.fetch_count(q, "update_many").await
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<Record>> {
        let cypher = format!(
            "MATCH (n:{label} {{ id: $id }}) \
             WITH n, properties(n) AS props DETACH DELETE n RETURN props",
            label = self.label,
        );

        let mut rows = self
            .graph
            .execute(query(&cypher).param("id", id))
            .await
            .map_err(self.backend_err("delete_by_id"))?;

        if let Some(row) = rows
            .next()
            .await
            .map_err(self.backend_err("delete_by_id"))?
        {
            let props = row
                .get::<Map<String, Value>>("props")
                .map_err(|e| StorageError::backend("delete_by_id", &self.entity, e))?;
            return Ok(Some(fields_to_record(props)));
        }
        Ok(None)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64> {
        let (where_clause, params) = filter_to_cypher(filter);

        let mut cypher = format!("MATCH (n:{label})", label = self.label);
        if !where_clause.is_empty() {
            cypher.push_str(" WHERE ");
            cypher.push_str(&where_clause);
        }
        cypher.push_str(" WITH n DETACH DELETE n RETURN count(*) AS count");

        let mut q = query(&cypher);
        for (name, value) in params {
            q = q.param(&name, value);
        }

        self.fetch_count(q, "delete_many").await
    }

    fn vector_search(&self) -> Option<&dyn VectorSearch> {
        Some(self)
    }
}

#[async_trait]
impl VectorSearch for GraphRepository {
    async fn search(
        &self,
        field: &str,
        query_vector: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        if self.has_native_vector_search().await {
            match self.native_search(field, query_vector, options).await {
                Ok(results) => return Ok(results),
                Err(err) => {
                    warn!(
                        entity = %self.entity,
                        "native vector search failed, falling back to scan: {err}"
                    );
                }
            }
        }
        self.scan_search(field, query_vector, options).await
    }
}

/// Conventional name of the vector index serving an entity/field pair.
fn vector_index_name(entity: &str, field: &str) -> String {
    format!("{entity}_{field}_idx")
}

/// Escape an entity name for use as a node label.
fn escape_label(entity: &str) -> String {
    format!("`{}`", entity.replace('`', ""))
}

/// Escape a field path for use as a property reference.
fn property_ref(field: &str) -> String {
    format!("n.`{}`", field.replace('`', ""))
}

/// Translate a filter into a Cypher `WHERE` clause and its parameters.
fn filter_to_cypher(filter: &Filter) -> (String, Vec<(String, BoltType)>) {
    let mut fragments = Vec::new();
    let mut params = Vec::new();

    for (i, clause) in filter.clauses().iter().enumerate() {
        let prop = property_ref(&clause.field);
        match &clause.condition {
            Condition::Eq(Value::Null) => fragments.push(format!("{prop} IS NULL")),
            Condition::Eq(value) => {
                let name = format!("p{i}");
                fragments.push(format!("{prop} = ${name}"));
                params.push((name, bolt_from_json(value)));
            }
            Condition::Gte(value) => {
                let name = format!("p{i}");
                fragments.push(format!("{prop} >= ${name}"));
                params.push((name, bolt_from_json(value)));
            }
            Condition::Lte(value) => {
                let name = format!("p{i}");
                fragments.push(format!("{prop} <= ${name}"));
                params.push((name, bolt_from_json(value)));
            }
            Condition::Between { gte, lte } => {
                let lo = format!("p{i}lo");
                let hi = format!("p{i}hi");
                fragments.push(format!("{prop} >= ${lo} AND {prop} <= ${hi}"));
                params.push((lo, bolt_from_json(gte)));
                params.push((hi, bolt_from_json(lte)));
            }
            Condition::In(values) => {
                let name = format!("p{i}");
                fragments.push(format!("{prop} IN ${name}"));
                params.push((
                    name,
                    BoltType::List(BoltList {
                        value: values.iter().map(bolt_from_json).collect(),
                    }),
                ));
            }
            Condition::Contains(needle) => {
                let name = format!("p{i}");
                fragments.push(format!("toLower({prop}) CONTAINS toLower(${name})"));
                params.push((name, needle.clone().into()));
            }
        }
    }

    (fragments.join(" AND "), params)
}

/// Translate a patch into a Cypher `SET` clause and its parameters.
///
/// `null` patch values are emitted literally: setting a Neo4j property to
/// null removes it, which matches the shallow-merge semantics.
fn patch_to_cypher(patch: &Map<String, Value>) -> (String, Vec<(String, BoltType)>) {
    let mut fragments = Vec::new();
    let mut params = Vec::new();

    for (i, (key, value)) in patch.iter().enumerate() {
        let prop = property_ref(key);
        if value.is_null() {
            fragments.push(format!("{prop} = null"));
        } else {
            let name = format!("v{i}");
            fragments.push(format!("{prop} = ${name}"));
            params.push((name, bolt_from_json(value)));
        }
    }

    (fragments.join(", "), params)
}

/// Convert a JSON value into a Bolt parameter value.
fn bolt_from_json(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull::default()),
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else {
                n.as_f64().unwrap_or(0.0).into()
            }
        }
        Value::String(s) => s.clone().into(),
        Value::Array(items) if items.iter().all(Value::is_number) => BoltType::List(BoltList {
            value: items
                .iter()
                .map(|v| BoltType::from(v.as_f64().unwrap_or(0.0)))
                .collect(),
        }),
        // Properties cannot nest: store as JSON text, re-parsed on read.
        other => other.to_string().into(),
    }
}

fn record_to_bolt(record: &Record) -> BoltType {
    let mut value = HashMap::new();
    value.insert(
        BoltString::from("id"),
        BoltType::from(record.id.as_str()),
    );
    for (key, field_value) in &record.fields {
        value.insert(BoltString::from(key.as_str()), bolt_from_json(field_value));
    }
    BoltType::Map(BoltMap { value })
}

fn node_to_record(node: &Node) -> Record {
    let fields: Map<String, Value> = node.to::<Map<String, Value>>().unwrap_or_default();
    fields_to_record(fields)
}

fn fields_to_record(mut fields: Map<String, Value>) -> Record {
    let id = match fields.remove("id") {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Record {
        id,
        fields: unpack_fields(fields),
    }
}

/// Undo the JSON-text packing of nested values.
fn unpack_fields(fields: Map<String, Value>) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) if looks_like_json(&s) => {
                    serde_json::from_str(&s).unwrap_or(Value::String(s))
                }
                other => other,
            };
            (key, value)
        })
        .collect()
}

fn looks_like_json(s: &str) -> bool {
    matches!(s.trim_start().as_bytes().first(), Some(b'{') | Some(b'['))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_filter_to_cypher_fragments() {
        let filter = Filter::new()
            .eq("platform", "twitter")
            .gte("timestamp", 10)
            .contains("content", "rust");
        let (clause, params) = filter_to_cypher(&filter);

        assert_eq!(
            clause,
            "n.`platform` = $p0 AND n.`timestamp` >= $p1 \
             AND toLower(n.`content`) CONTAINS toLower($p2)"
        );
        let names: Vec<&str> = params.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["p0", "p1", "p2"]);
    }

    #[test]
    fn test_between_and_in_fragments() {
        let filter = Filter::new()
            .between("timestamp", 10, 20)
            .is_in("platform", vec![json!("twitter")]);
        let (clause, params) = filter_to_cypher(&filter);

        assert_eq!(
            clause,
            "n.`timestamp` >= $p0lo AND n.`timestamp` <= $p0hi AND n.`platform` IN $p1"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_null_equality_has_no_parameter() {
        let filter = Filter::new().eq("deleted_at", Value::Null);
        let (clause, params) = filter_to_cypher(&filter);

        assert_eq!(clause, "n.`deleted_at` IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_empty_filter_has_empty_clause() {
        let (clause, params) = filter_to_cypher(&Filter::new());
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_patch_to_cypher_null_removes_property() {
        let mut patch = Map::new();
        patch.insert("stale".to_string(), Value::Null);
        let (clause, params) = patch_to_cypher(&patch);
        assert_eq!(clause, "n.`stale` = null");
        assert!(params.is_empty());

        let mut patch = Map::new();
        patch.insert("title".to_string(), json!("new"));
        let (clause, params) = patch_to_cypher(&patch);
        assert_eq!(clause, "n.`title` = $v0");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_identifier_escaping_strips_backticks() {
        assert_eq!(escape_label("posts"), "`posts`");
        assert_eq!(escape_label("po`sts"), "`posts`");
        assert_eq!(property_ref("author.name"), "n.`author.name`");
    }

    #[test]
    fn test_bolt_from_json_shapes() {
        assert!(matches!(bolt_from_json(&json!(5)), BoltType::Integer(_)));
        assert!(matches!(bolt_from_json(&json!(1.5)), BoltType::Float(_)));
        assert!(matches!(bolt_from_json(&json!("x")), BoltType::String(_)));
        // Numeric arrays stay native lists.
        assert!(matches!(
            bolt_from_json(&json!([1.0, 2.0])),
            BoltType::List(_)
        ));
        // Objects and mixed arrays are packed as JSON text.
        assert!(matches!(
            bolt_from_json(&json!({ "a": 1 })),
            BoltType::String(_)
        ));
        assert!(matches!(
            bolt_from_json(&json!(["a", 1])),
            BoltType::String(_)
        ));
    }

    #[test]
    fn test_unpack_fields_reparses_json_text() {
        let mut fields = Map::new();
        fields.insert("meta".to_string(), json!("{\"a\":1}"));
        fields.insert("plain".to_string(), json!("not json"));

        let unpacked = unpack_fields(fields);
        assert_eq!(unpacked.get("meta"), Some(&json!({ "a": 1 })));
        assert_eq!(unpacked.get("plain"), Some(&json!("not json")));
    }

    #[test]
    fn test_fields_to_record_extracts_id() {
        let mut fields = Map::new();
        fields.insert("id".to_string(), json!("r1"));
        fields.insert("platform".to_string(), json!("twitter"));

        let record = fields_to_record(fields);
        assert_eq!(record.id, "r1");
        assert_eq!(record.get("platform"), Some(&json!("twitter")));
        assert_eq!(record.get("id"), None);
    }
}
