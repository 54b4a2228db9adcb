//! End-to-end scenarios over a `Users` collection opened through `Engine`,
//! the public façade a caller actually talks to.

use nyarudb2::{DbError, Engine, JsonDocument, Predicate, Query, Value};
use tempfile::TempDir;

/// Surfaces the crate's `tracing` output under `cargo test -- --nocapture`;
/// harmless to call more than once since `try_init` ignores a second call.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn seeded_users() -> Vec<JsonDocument> {
    vec![
        JsonDocument::new(vec![
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::Str("Alice".to_string())),
            ("age".to_string(), Value::Int(30)),
        ]),
        JsonDocument::new(vec![
            ("id".to_string(), Value::Int(2)),
            ("name".to_string(), Value::Str("Bob".to_string())),
            ("age".to_string(), Value::Int(25)),
        ]),
        JsonDocument::new(vec![
            ("id".to_string(), Value::Int(3)),
            ("name".to_string(), Value::Str("Charlie".to_string())),
            ("age".to_string(), Value::Int(35)),
        ]),
        JsonDocument::new(vec![
            ("id".to_string(), Value::Int(4)),
            ("name".to_string(), Value::Str("David".to_string())),
            ("age".to_string(), Value::Int(40)),
        ]),
        JsonDocument::new(vec![
            ("id".to_string(), Value::Int(5)),
            ("name".to_string(), Value::Str("Alice".to_string())),
            ("age".to_string(), Value::Int(45)),
        ]),
    ]
}

fn ids(docs: &[JsonDocument]) -> Vec<i64> {
    let mut out: Vec<i64> = docs
        .iter()
        .filter_map(|d| match d.get("id") {
            Some(Value::Int(i)) => Some(*i),
            _ => None,
        })
        .collect();
    out.sort();
    out
}

#[tokio::test]
async fn s1_equality_filter_returns_both_alices() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(dir.path()).await.unwrap();
    engine.bulk_insert_json("Users", &seeded_users()).await.unwrap();

    let matches = engine
        .fetch_json(
            "Users",
            Query::new().filter("name", Predicate::Equal(Value::Str("Alice".into()))),
        )
        .await
        .unwrap();
    assert_eq!(ids(&matches), vec![1, 5]);
}

#[tokio::test]
async fn s2_between_returns_ages_30_to_40_inclusive() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(dir.path()).await.unwrap();
    engine.bulk_insert_json("Users", &seeded_users()).await.unwrap();

    let matches = engine
        .fetch_json(
            "Users",
            Query::new().filter("age", Predicate::Between(Value::Int(30), Value::Int(40))),
        )
        .await
        .unwrap();
    assert_eq!(ids(&matches), vec![1, 3, 4]);
}

#[tokio::test]
async fn s3_starts_with_a_returns_both_alices() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(dir.path()).await.unwrap();
    engine.bulk_insert_json("Users", &seeded_users()).await.unwrap();

    let matches = engine
        .fetch_json(
            "Users",
            Query::new().filter("name", Predicate::StartsWith("A".to_string())),
        )
        .await
        .unwrap();
    assert_eq!(ids(&matches), vec![1, 5]);
}

#[tokio::test]
async fn s4_contains_v_returns_david_only() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(dir.path()).await.unwrap();
    engine.bulk_insert_json("Users", &seeded_users()).await.unwrap();

    let matches = engine
        .fetch_json(
            "Users",
            Query::new().filter("name", Predicate::Contains("v".to_string())),
        )
        .await
        .unwrap();
    assert_eq!(ids(&matches), vec![4]);
}

#[tokio::test]
async fn s5_compaction_merges_three_small_shards_into_one() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(dir.path()).await.unwrap();
    engine.set_partition_key("Users", Some("bucket")).await.unwrap();

    let bucket = |id: i64, bucket: &str| {
        JsonDocument::new(vec![
            ("id".to_string(), Value::Int(id)),
            ("bucket".to_string(), Value::Str(bucket.to_string())),
        ])
    };
    for d in [bucket(1, "a"), bucket(2, "a")] {
        engine.insert_json("Users", &d).await.unwrap();
    }
    for d in [bucket(3, "b"), bucket(4, "b"), bucket(5, "b")] {
        engine.insert_json("Users", &d).await.unwrap();
    }
    for d in [bucket(6, "c"), bucket(7, "c"), bucket(8, "c"), bucket(9, "c")] {
        engine.insert_json("Users", &d).await.unwrap();
    }

    let users = engine.collection("Users").await.unwrap();
    assert_eq!(users.all_shard_info().await.len(), 3);

    let report = users
        .shard_manager_compact_once_for_test()
        .await
        .unwrap();
    assert_eq!(report.merged_document_count, 9);
    assert_eq!(report.absorbed_shards.len(), 2);
    assert_eq!(users.all_shard_info().await.len(), 1);
    assert_eq!(engine.count_documents("Users").await.unwrap(), 9);
}

#[tokio::test]
async fn partition_locality_and_count_documents_invariant() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(dir.path()).await.unwrap();
    engine.set_partition_key("Users", Some("name")).await.unwrap();
    engine.bulk_insert_json("Users", &seeded_users()).await.unwrap();

    let users = engine.collection("Users").await.unwrap();
    let info = users.all_shard_info().await;
    let mut shard_ids: Vec<String> = info.iter().map(|(id, _)| id.clone()).collect();
    shard_ids.sort();
    assert_eq!(
        shard_ids,
        vec![
            "Alice".to_string(),
            "Bob".to_string(),
            "Charlie".to_string(),
            "David".to_string(),
        ]
    );
    let total: u64 = info.iter().map(|(_, meta)| meta.document_count).sum();
    assert_eq!(total, engine.count_documents("Users").await.unwrap());
    assert_eq!(total, 5);
}

#[tokio::test]
async fn index_coverage_invariant_after_create_index_and_insert() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(dir.path()).await.unwrap();
    engine.create_index("Users", "name").await.unwrap();
    engine.bulk_insert_json("Users", &seeded_users()).await.unwrap();

    let by_index = engine
        .fetch_json(
            "Users",
            Query::new().filter("name", Predicate::Equal(Value::Str("Charlie".into()))),
        )
        .await
        .unwrap();
    assert_eq!(ids(&by_index), vec![3]);
}

#[tokio::test]
async fn update_with_no_matches_returns_document_not_found() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(dir.path()).await.unwrap();
    engine.bulk_insert_json("Users", &seeded_users()).await.unwrap();

    let result = engine
        .update_json(
            "Users",
            &Query::new().filter("name", Predicate::Equal(Value::Str("Zed".into()))),
            |d| d.clone(),
        )
        .await;
    assert!(matches!(result, Err(DbError::DocumentNotFound)));
}

#[tokio::test]
async fn drop_collection_then_reopen_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(dir.path()).await.unwrap();
    engine.bulk_insert_json("Users", &seeded_users()).await.unwrap();
    engine.drop_collection("Users").await.unwrap();

    assert_eq!(engine.count_documents("Users").await.unwrap(), 0);
}
