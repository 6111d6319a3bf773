//! Backend integration tests.
//!
//! The state-machine tests at the top run against no live backend. The
//! round-trip tests exercise real deployments and are ignored by default;
//! run them with `cargo test -- --ignored` against local MongoDB, Neo4j, and
//! Redis instances.

use serde_json::{json, Map};

use pulse_storage::{
    ConnectionParams, DocumentProvider, Filter, FindOptions, GraphProvider, KvProvider,
    ModelSchema, Provider, Record, SortOrder, StorageError, VectorSearchOptions,
};

fn post(id: &str, platform: &str, timestamp: i64) -> Record {
    Record::with_id(id)
        .with_field("platform", platform)
        .with_field("timestamp", timestamp)
}

fn providers() -> Vec<Box<dyn Provider>> {
    vec![
        Box::new(DocumentProvider::new(ConnectionParams::new(
            "mongodb://localhost:27017",
            "pulse_test",
        ))),
        Box::new(GraphProvider::new(
            ConnectionParams::new("neo4j://localhost:7687", "neo4j")
                .with_credentials("neo4j", "password"),
        )),
        Box::new(KvProvider::new(ConnectionParams::new(
            "redis://localhost:6379",
            "0",
        ))),
    ]
}

#[tokio::test]
async fn disconnect_is_idempotent_without_connecting() {
    for provider in providers() {
        assert!(!provider.is_connected().await);

        provider.disconnect().await.unwrap();
        assert!(!provider.is_connected().await);

        // A second disconnect observes the same state, with no error.
        provider.disconnect().await.unwrap();
        assert!(!provider.is_connected().await);
    }
}

#[tokio::test]
async fn repository_before_connect_is_rejected() {
    for provider in providers() {
        let err = provider
            .repository("posts")
            .await
            .err()
            .expect("repository access must fail before connect");
        assert!(
            matches!(err, StorageError::NotConnected),
            "{}: expected NotConnected, got {err}",
            provider.name(),
        );
    }
}

#[tokio::test]
async fn register_model_never_fails_before_connect() {
    for provider in providers() {
        provider
            .register_model("posts", ModelSchema::default())
            .await
            .unwrap();
    }
}

/// The shared battery: the Repository surface is identical across backends,
/// so one exercise covers all three.
async fn exercise_crud(provider: &dyn Provider, entity: &str) -> anyhow::Result<()> {
    provider.register_model(entity, ModelSchema::default()).await?;
    let repo = provider.repository(entity).await?;

    // Clean slate.
    repo.delete_many(&Filter::new()).await?;

    // Round-trip: create then read back by the returned id.
    let created = repo
        .create(post("a", "twitter", 100).with_field("embedding", json!([1.0, 0.0, 0.0])))
        .await?;
    assert_eq!(created.id, "a");

    let fetched = repo.find_by_id("a").await?.expect("created record is readable");
    assert_eq!(fetched.get("platform"), created.get("platform"));
    assert_eq!(fetched.vector("embedding"), Some(vec![1.0, 0.0, 0.0]));

    // Id assignment for partial records.
    let assigned = repo
        .create(
            Record::new()
                .with_field("platform", "reddit")
                .with_field("timestamp", chrono::Utc::now().timestamp()),
        )
        .await?;
    assert!(!assigned.id.is_empty());

    // Batch insert plus the filtered/sorted/paginated find pipeline.
    repo.create_many(vec![
        post("b", "twitter", 300).with_field("embedding", json!([0.0, 1.0, 0.0])),
        post("c", "twitter", 200),
        post("d", "reddit", 500),
    ])
    .await?;

    let page = repo
        .find(
            &Filter::new().eq("platform", "twitter"),
            &FindOptions::new()
                .skip(1)
                .limit(2)
                .sort_by("timestamp", SortOrder::Desc),
        )
        .await?;
    let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
    // Matches are a(100), b(300), c(200); newest-first with skip 1 leaves the
    // 2nd and 3rd most recent.
    assert_eq!(ids, vec!["c", "a"]);

    assert_eq!(repo.count(&Filter::new().eq("platform", "twitter")).await?, 3);
    assert_eq!(
        repo.find_one(&Filter::new().eq("platform", "reddit"))
            .await?
            .map(|r| r.get("platform").cloned()),
        Some(Some(json!("reddit"))),
    );

    // Shallow-merge update.
    let mut patch = Map::new();
    patch.insert("platform".to_string(), json!("bluesky"));
    let updated = repo.update_by_id("c", &patch).await?.expect("c exists");
    assert_eq!(updated.get("platform"), Some(&json!("bluesky")));

    // Updating a missing id returns None and performs no write.
    let before = repo.count(&Filter::new()).await?;
    assert!(repo.update_by_id("missing", &patch).await?.is_none());
    assert_eq!(repo.count(&Filter::new()).await?, before);

    let modified = repo
        .update_many(&Filter::new().eq("platform", "twitter"), &patch)
        .await?;
    assert_eq!(modified, 2);

    // Vector search: orthogonal "b" scores 0 and stays below the threshold.
    let search = repo
        .vector_search()
        .expect("every backend can at least emulate vector search");
    let results = search
        .search(
            "embedding",
            &[1.0, 0.0, 0.0],
            &VectorSearchOptions {
                limit: 10,
                min_score: 0.5,
            },
        )
        .await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.id, "a");
    assert!((results[0].score - 1.0).abs() < 1e-5);

    // Delete.
    assert!(repo.delete_by_id("a").await?.is_some());
    assert!(repo.delete_by_id("a").await?.is_none());
    repo.delete_many(&Filter::new()).await?;
    assert_eq!(repo.count(&Filter::new()).await?, 0);

    Ok(())
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn document_backend_roundtrip() -> anyhow::Result<()> {
    let provider = DocumentProvider::new(ConnectionParams::new(
        "mongodb://localhost:27017",
        "pulse_test",
    ));
    provider.connect().await?;
    provider.connect().await?; // idempotent

    // The document store requires registration before repository access.
    let err = provider
        .repository("unregistered")
        .await
        .err()
        .expect("unregistered model must be rejected");
    assert!(matches!(err, StorageError::ModelNotRegistered { .. }));

    exercise_crud(&provider, "posts").await?;

    provider.disconnect().await?;
    assert!(!provider.is_connected().await);
    provider.disconnect().await?;
    assert!(!provider.is_connected().await);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Neo4j"]
async fn graph_backend_roundtrip() -> anyhow::Result<()> {
    let provider = GraphProvider::new(
        ConnectionParams::new("neo4j://localhost:7687", "neo4j")
            .with_credentials("neo4j", "password"),
    );
    provider.connect().await?;
    provider.connect().await?;

    exercise_crud(&provider, "posts").await?;

    provider.disconnect().await?;
    assert!(!provider.is_connected().await);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn kv_backend_roundtrip() -> anyhow::Result<()> {
    let provider = KvProvider::new(ConnectionParams::new("redis://localhost:6379", "0"));
    provider.connect().await?;
    provider.connect().await?;

    exercise_crud(&provider, "posts").await?;

    provider.disconnect().await?;
    assert!(!provider.is_connected().await);
    Ok(())
}
