//! A named namespace of records: owns one [`ShardManager`], one
//! [`IndexManager`], the mutable partition-key cell, and the stats snapshot
//! cache the planner consults. All mutating operations are serialized by a
//! single per-collection mutator; reads take a shared guard.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::RwLock as AsyncRwLock;

use crate::config::CollectionConfig;
use crate::error::{DbError, DbResult};
use crate::index_manager::IndexManager;
use crate::planner::{self, Plan};
use crate::query::Query;
use crate::record::Record;
use crate::serializer::{self, FieldContext};
use crate::shard::{self, ShardMeta};
use crate::shard_manager::{IndexedFields, ShardManager};
use crate::stats::{self, CollectionStats, IndexFieldStats, ShardStats};
use crate::value::Value;

const META_FILE: &str = "_collection_meta.json";

/// Persisted sidecar recording the two pieces of collection state that are
/// mutable at runtime but that a [`BTreeIndex`](crate::btree::BTreeIndex) and
/// a bare in-memory cell can't survive a process restart on their own: the
/// partition field and the set of indexed fields. Neither is part of the
/// shard files' own on-disk layout; this sidecar is the minimum extra state
/// needed to reopen a collection without the caller re-declaring its indexes.
#[derive(Debug, Clone, Default)]
struct CollectionMeta {
    partition_field: Option<String>,
    indexed_fields: Vec<String>,
}

impl CollectionMeta {
    fn to_value(&self) -> Value {
        Value::Object(vec![
            (
                "partitionField".to_string(),
                match &self.partition_field {
                    Some(f) => Value::Str(f.clone()),
                    None => Value::Null,
                },
            ),
            (
                "indexedFields".to_string(),
                Value::Array(self.indexed_fields.iter().cloned().map(Value::Str).collect()),
            ),
        ])
    }

    fn from_value(value: Value) -> DbResult<Self> {
        let fail = || DbError::DecodeFailure("malformed collection metadata sidecar".to_string());
        let obj = value.as_object().ok_or_else(fail)?;
        let get = |k: &str| obj.iter().find(|(key, _)| key == k).map(|(_, v)| v);
        let partition_field = match get("partitionField") {
            Some(Value::Str(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            _ => return Err(fail()),
        };
        let indexed_fields = match get("indexedFields") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::Str(s) => Ok(s.clone()),
                    _ => Err(fail()),
                })
                .collect::<DbResult<Vec<_>>>()?,
            _ => return Err(fail()),
        };
        Ok(Self {
            partition_field,
            indexed_fields,
        })
    }
}

/// One named collection: the unit of partitioning, indexing, and querying.
/// Generic over the caller's record type; a ready-to-use
/// [`crate::JsonDocument`] is provided for callers without their own model.
pub struct Collection<T: Record> {
    name: String,
    dir: PathBuf,
    config: CollectionConfig,
    partition_field: Arc<SyncRwLock<Option<String>>>,
    indexed_fields: IndexedFields,
    shard_manager: Arc<ShardManager>,
    index_manager: Arc<IndexManager>,
    stats: Arc<SyncRwLock<Arc<CollectionStats>>>,
    /// Collection mutator: mutating ops take `.write()`, reads
    /// take `.read()`.
    mutator: Arc<AsyncRwLock<()>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            dir: self.dir.clone(),
            config: self.config.clone(),
            partition_field: self.partition_field.clone(),
            indexed_fields: self.indexed_fields.clone(),
            shard_manager: self.shard_manager.clone(),
            index_manager: self.index_manager.clone(),
            stats: self.stats.clone(),
            mutator: self.mutator.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> Collection<T> {
    /// Open (creating if absent) the collection directory `<base>/<name>/`,
    /// restoring any persisted partition/index configuration and rebuilding
    /// the in-memory B-tree indexes from the shards already on disk.
    pub async fn open(name: String, base_dir: &Path, config: CollectionConfig) -> DbResult<Self> {
        let dir = base_dir.join(&name);
        tokio::fs::create_dir_all(&dir).await?;
        let mut config = config;
        config.path = dir.clone();

        let meta = Self::load_meta(&dir).await.unwrap_or_default();

        let indexed_fields: IndexedFields =
            Arc::new(SyncRwLock::new(meta.indexed_fields.clone()));
        let mutator = Arc::new(AsyncRwLock::new(()));
        let shard_manager = Arc::new(ShardManager::new(
            dir.clone(),
            config.codec,
            config.format,
            config.compaction_threshold,
            config.compaction_interval,
            indexed_fields.clone(),
            mutator.clone(),
        ));
        shard_manager.open_existing().await?;

        let index_manager = Arc::new(IndexManager::new());
        for field in &meta.indexed_fields {
            index_manager.create_index(field);
        }
        Self::backfill_indexes(&shard_manager, &index_manager, &meta.indexed_fields, config.format)
            .await?;

        let collection = Self {
            name,
            dir,
            config,
            partition_field: Arc::new(SyncRwLock::new(meta.partition_field)),
            indexed_fields,
            shard_manager,
            index_manager,
            stats: Arc::new(SyncRwLock::new(Arc::new(CollectionStats::default()))),
            mutator,
            _marker: PhantomData,
        };
        collection.refresh_stats().await;
        collection.shard_manager.spawn_compaction().await;
        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn load_meta(dir: &Path) -> DbResult<CollectionMeta> {
        let bytes = tokio::fs::read(dir.join(META_FILE)).await?;
        let value = serializer::decode_value(&bytes, crate::serializer::Format::TagTree)?;
        CollectionMeta::from_value(value)
    }

    async fn persist_meta(&self) -> DbResult<()> {
        let meta = CollectionMeta {
            partition_field: self.partition_field.read().clone(),
            indexed_fields: self.indexed_fields.read().clone(),
        };
        let bytes =
            serializer::encode_value(&meta.to_value(), crate::serializer::Format::TagTree)?;
        shard::atomic_write(&self.dir.join(META_FILE), &bytes).await
    }

    async fn backfill_indexes(
        shard_manager: &ShardManager,
        index_manager: &IndexManager,
        fields: &[String],
        format: crate::serializer::Format,
    ) -> DbResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        for shard_handle in shard_manager.all_shards() {
            let body = shard_handle.raw_bytes().await?;
            let elements = serializer::decode_array(&body, format)?;
            for encoded in elements {
                for field in fields {
                    if let Ok(key) =
                        serializer::extract_field(&encoded, field, format, FieldContext::Index)
                    {
                        index_manager.insert(field, &key, encoded.clone());
                    }
                }
            }
        }
        Ok(())
    }

    async fn refresh_stats(&self) {
        let computed = stats::compute(&self.shard_manager, &self.index_manager).await;
        *self.stats.write() = Arc::new(computed);
    }

    fn partition_value_for(&self, encoded: &[u8]) -> DbResult<String> {
        match self.partition_field.read().clone() {
            Some(field) => serializer::extract_field(
                encoded,
                &field,
                self.config.format,
                FieldContext::Partition,
            ),
            None => Ok("default".to_string()),
        }
    }

    /// Insert one record: partition routing, shard
    /// append, and index maintenance for every currently-indexed field.
    /// Missing indexed fields are skipped rather than rejected, matching
    /// the shard's own leniency when collecting field-range statistics.
    pub async fn insert(&self, record: &T) -> DbResult<()> {
        let _guard = self.mutator.write().await;
        self.insert_locked(record).await?;
        self.refresh_stats().await;
        Ok(())
    }

    /// Insert every record under one acquisition of the collection mutator,
    /// refreshing stats once at the end. Returns the
    /// number of records inserted.
    pub async fn bulk_insert(&self, records: &[T]) -> DbResult<usize> {
        let _guard = self.mutator.write().await;
        for record in records {
            self.insert_locked(record).await?;
        }
        self.refresh_stats().await;
        Ok(records.len())
    }

    async fn insert_locked(&self, record: &T) -> DbResult<()> {
        let encoded = serializer::encode(record, self.config.format)?;
        let partition_value = self.partition_value_for(&encoded)?;
        let shard = self.shard_manager.get_or_create_shard(&partition_value);
        let indexed = self.indexed_fields.read().clone();
        shard.append_encoded(&encoded, &indexed).await?;
        for field in &indexed {
            if let Ok(key) =
                serializer::extract_field(&encoded, field, self.config.format, FieldContext::Index)
            {
                self.index_manager.insert(field, &key, encoded.clone());
            }
        }
        Ok(())
    }

    /// Apply `updater` to every record matching `query`, rewriting the
    /// shard(s) that held them. Records must not change partition-field
    /// value under update (cross-shard moves under `update` are not
    /// supported; that is what `repartitionCollection` is for) — an update
    /// that would relocate a record fails with `InvalidDocument`. Returns
    /// `DocumentNotFound` if nothing matched.
    pub async fn update(&self, query: &Query, updater: impl Fn(&T) -> T) -> DbResult<usize> {
        let _guard = self.mutator.write().await;
        let indexed = self.indexed_fields.read().clone();
        let mut total_updated = 0usize;

        for shard in self.shard_manager.all_shards() {
            let records: Vec<T> = shard.load_all().await?;
            let mut changed = false;
            let mut next = Vec::with_capacity(records.len());
            for record in records {
                if query.matches(&record) {
                    let old_encoded = serializer::encode(&record, self.config.format)?;
                    let updated = updater(&record);
                    let new_encoded = serializer::encode(&updated, self.config.format)?;
                    let new_partition = self.partition_value_for(&new_encoded)?;
                    if new_partition != shard.id() {
                        return Err(DbError::InvalidDocument(format!(
                            "update would move record from shard '{}' to '{}'; use repartitionCollection",
                            shard.id(),
                            new_partition
                        )));
                    }
                    for field in &indexed {
                        if let Ok(old_key) = serializer::extract_field(
                            &old_encoded,
                            field,
                            self.config.format,
                            FieldContext::Index,
                        ) {
                            self.index_manager.delete(field, &old_key, &old_encoded);
                        }
                        if let Ok(new_key) = serializer::extract_field(
                            &new_encoded,
                            field,
                            self.config.format,
                            FieldContext::Index,
                        ) {
                            self.index_manager
                                .insert(field, &new_key, new_encoded.clone());
                        }
                    }
                    changed = true;
                    total_updated += 1;
                    next.push(updated);
                } else {
                    next.push(record);
                }
            }
            if changed {
                shard.save_all(&next, &indexed).await?;
            }
        }

        self.refresh_stats().await;
        if total_updated == 0 {
            return Err(DbError::DocumentNotFound);
        }
        Ok(total_updated)
    }

    /// Remove every record matching `query`. Returns the
    /// number of records removed.
    pub async fn delete(&self, query: &Query) -> DbResult<usize> {
        let _guard = self.mutator.write().await;
        let indexed = self.indexed_fields.read().clone();
        let mut total_deleted = 0usize;

        for shard in self.shard_manager.all_shards() {
            let records: Vec<T> = shard.load_all().await?;
            let mut changed = false;
            let mut kept = Vec::with_capacity(records.len());
            for record in records {
                if query.matches(&record) {
                    let encoded = serializer::encode(&record, self.config.format)?;
                    for field in &indexed {
                        if let Ok(key) = serializer::extract_field(
                            &encoded,
                            field,
                            self.config.format,
                            FieldContext::Index,
                        ) {
                            self.index_manager.delete(field, &key, &encoded);
                        }
                    }
                    changed = true;
                    total_deleted += 1;
                } else {
                    kept.push(record);
                }
            }
            if changed {
                shard.save_all(&kept, &indexed).await?;
            }
        }

        self.refresh_stats().await;
        Ok(total_deleted)
    }

    /// Plan and execute `query`, materializing every match.
    pub async fn fetch(&self, query: Query) -> DbResult<Vec<T>> {
        let stream = self.fetch_stream(query).await;
        tokio::pin!(stream);
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item?);
        }
        Ok(out)
    }

    /// Plan and stream `query`'s matches lazily. The collection mutator is
    /// held only long enough to snapshot stats and the partition field for
    /// plan selection — planners consult an immutable snapshot so they
    /// never hold the lock during plan execution; the stream itself runs
    /// unguarded.
    pub async fn fetch_stream(&self, query: Query) -> impl Stream<Item = DbResult<T>> + 'static {
        let guard = self.mutator.read().await;
        let stats = self.stats.read().clone();
        let partition_field = self.partition_field.read().clone();
        drop(guard);

        let plan = planner::select_plan(
            &query,
            partition_field.as_deref(),
            &stats,
            &self.index_manager,
        );
        planner::execute::<T>(
            plan,
            query,
            self.shard_manager.clone(),
            self.index_manager.clone(),
            self.config.format,
        )
    }

    /// The plan `fetch`/`fetch_stream` would pick for `query` right now,
    /// exposed for tests and diagnostics.
    pub fn explain(&self, query: &Query) -> Plan {
        let stats = self.stats.read().clone();
        let partition_field = self.partition_field.read().clone();
        planner::select_plan(query, partition_field.as_deref(), &stats, &self.index_manager)
    }

    /// Create a secondary index on `field`; idempotent. Returns
    /// `true` if this call actually created it. Backfills from existing
    /// shard contents and persists the field in the collection's metadata
    /// sidecar so it survives a reopen.
    pub async fn create_index(&self, field: &str) -> DbResult<bool> {
        let _guard = self.mutator.write().await;
        let created = self.index_manager.create_index(field);
        if created {
            self.indexed_fields.write().push(field.to_string());
            let fields = vec![field.to_string()];
            Self::backfill_indexes(
                &self.shard_manager,
                &self.index_manager,
                &fields,
                self.config.format,
            )
            .await?;
            let indexed = self.indexed_fields.read().clone();
            for shard in self.shard_manager.all_shards() {
                shard.recompute_metadata(&indexed).await?;
            }
            self.persist_meta().await?;
        }
        self.refresh_stats().await;
        Ok(created)
    }

    /// Change which field routes new writes to shards. Does not move
    /// records already on disk — see
    /// [`Collection::repartition_collection`] for that.
    pub async fn set_partition_key(&self, field: Option<&str>) -> DbResult<()> {
        let _guard = self.mutator.write().await;
        *self.partition_field.write() = field.map(|s| s.to_string());
        self.persist_meta().await
    }

    /// Rewrite every shard under a new partition field, reloading every
    /// record and reinserting it under its new partition value. Index
    /// entries are untouched: they key on encoded record bytes, which don't
    /// change, only which shard holds them.
    pub async fn repartition_collection(&self, field: Option<&str>) -> DbResult<()> {
        let _guard = self.mutator.write().await;
        tracing::info!(collection = %self.name, field = ?field, "repartitioning collection");
        let mut all: Vec<T> = Vec::new();
        for shard in self.shard_manager.all_shards() {
            all.extend(shard.load_all::<T>().await?);
        }
        self.shard_manager.remove_all_shards().await?;
        *self.partition_field.write() = field.map(|s| s.to_string());

        let indexed = self.indexed_fields.read().clone();
        for record in &all {
            let encoded = serializer::encode(record, self.config.format)?;
            let partition_value = self.partition_value_for(&encoded)?;
            let shard = self.shard_manager.get_or_create_shard(&partition_value);
            shard.append_encoded(&encoded, &indexed).await?;
        }

        self.persist_meta().await?;
        self.refresh_stats().await;
        Ok(())
    }

    /// Total documents across every shard.
    pub async fn count_documents(&self) -> DbResult<u64> {
        let _guard = self.mutator.read().await;
        let info = self.shard_manager.all_shard_info().await;
        Ok(info.iter().map(|(_, meta)| meta.document_count).sum())
    }

    /// Per-field index statistics.
    pub fn index_stats(&self) -> Vec<IndexFieldStats> {
        self.stats.read().index_stats.clone()
    }

    /// Per-shard statistics.
    pub fn shard_stats(&self) -> Vec<ShardStats> {
        self.stats.read().shard_stats.clone()
    }

    pub async fn all_shard_info(&self) -> Vec<(String, ShardMeta)> {
        self.shard_manager.all_shard_info().await
    }

    /// Delete every shard whose document count is zero.
    pub async fn cleanup_empty_shards(&self) -> DbResult<usize> {
        let _guard = self.mutator.write().await;
        let removed = self.shard_manager.cleanup_empty_shards().await?;
        self.refresh_stats().await;
        Ok(removed)
    }

    /// Run one compaction pass synchronously rather than waiting on the
    /// periodic background task. Exposed for tests that need a
    /// deterministic compaction point.
    pub async fn shard_manager_compact_once_for_test(&self) -> DbResult<crate::shard_manager::CompactionReport> {
        self.shard_manager.compact_once().await
    }

    /// Cancel background compaction and wait for its current iteration.
    pub async fn shutdown(&self) {
        self.shard_manager.shutdown().await;
    }

    /// Remove this collection's directory from disk entirely. Callers go
    /// through `Engine::drop_collection`,
    /// which also evicts the cached handle; exposed here so the engine
    /// doesn't need a back door into shard internals.
    pub async fn delete_directory(&self) -> DbResult<()> {
        self.shutdown().await;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecKind;
    use crate::query::Predicate;
    use crate::record::JsonDocument;
    use crate::serializer::Format;
    use tempfile::TempDir;

    fn doc(id: i64, name: &str, age: i64) -> JsonDocument {
        JsonDocument::new(vec![
            ("id".to_string(), Value::Int(id)),
            ("name".to_string(), Value::Str(name.to_string())),
            ("age".to_string(), Value::Int(age)),
        ])
    }

    async fn open(dir: &TempDir, name: &str) -> Collection<JsonDocument> {
        let config = CollectionConfig {
            codec: CodecKind::None,
            format: Format::TagTree,
            ..CollectionConfig::new(dir.path())
        };
        Collection::open(name.to_string(), dir.path(), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_without_partition_key_routes_to_default_shard() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        users.insert(&doc(1, "Alice", 30)).await.unwrap();
        users.insert(&doc(2, "Bob", 25)).await.unwrap();
        assert_eq!(users.count_documents().await.unwrap(), 2);
        let info = users.all_shard_info().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].0, "default");
    }

    #[tokio::test]
    async fn insert_with_partition_key_routes_by_field_value() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        users.set_partition_key(Some("name")).await.unwrap();
        users.insert(&doc(1, "Alice", 30)).await.unwrap();
        users.insert(&doc(2, "Bob", 25)).await.unwrap();
        let mut ids: Vec<String> = users
            .all_shard_info()
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["Alice".to_string(), "Bob".to_string()]);
    }

    #[tokio::test]
    async fn scenario_s1_equality_filter_over_seeded_users() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        users.create_index("name").await.unwrap();
        for d in [
            doc(1, "Alice", 30),
            doc(2, "Bob", 25),
            doc(3, "Charlie", 35),
            doc(4, "David", 40),
            doc(5, "Alice", 45),
        ] {
            users.insert(&d).await.unwrap();
        }

        let query = Query::new().filter("name", Predicate::Equal(Value::Str("Alice".into())));
        let matches = users.fetch(query).await.unwrap();
        let mut ids: Vec<i64> = matches
            .iter()
            .filter_map(|d| match d.get("id") {
                Some(Value::Int(i)) => Some(*i),
                _ => None,
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 5]);
    }

    #[tokio::test]
    async fn scenario_s2_between_over_seeded_users() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        for d in [
            doc(1, "Alice", 30),
            doc(2, "Bob", 25),
            doc(3, "Charlie", 35),
            doc(4, "David", 40),
            doc(5, "Alice", 45),
        ] {
            users.insert(&d).await.unwrap();
        }

        let query = Query::new().filter("age", Predicate::Between(Value::Int(30), Value::Int(40)));
        let matches = users.fetch(query).await.unwrap();
        let mut ids: Vec<i64> = matches
            .iter()
            .filter_map(|d| match d.get("id") {
                Some(Value::Int(i)) => Some(*i),
                _ => None,
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn update_rewrites_matching_records_and_index_entries() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        users.create_index("age").await.unwrap();
        users.insert(&doc(1, "Alice", 30)).await.unwrap();
        users.insert(&doc(2, "Bob", 25)).await.unwrap();

        let query = Query::new().filter("name", Predicate::Equal(Value::Str("Alice".into())));
        let updated = users
            .update(&query, |d| {
                let mut fields = d.fields.clone();
                for (k, v) in fields.iter_mut() {
                    if k == "age" {
                        *v = Value::Int(31);
                    }
                }
                JsonDocument::new(fields)
            })
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let all = users.fetch(Query::new()).await.unwrap();
        let alice = all.iter().find(|d| d.get("id") == Some(&Value::Int(1))).unwrap();
        assert_eq!(alice.get("age"), Some(&Value::Int(31)));

        let by_new_age = users
            .fetch(Query::new().filter("age", Predicate::Equal(Value::Int(31))))
            .await
            .unwrap();
        assert_eq!(by_new_age.len(), 1);
    }

    #[tokio::test]
    async fn update_with_no_matches_is_document_not_found() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        users.insert(&doc(1, "Alice", 30)).await.unwrap();

        let query = Query::new().filter("name", Predicate::Equal(Value::Str("Zed".into())));
        let err = users.update(&query, |d| d.clone()).await.unwrap_err();
        assert!(matches!(err, DbError::DocumentNotFound));
    }

    #[tokio::test]
    async fn delete_removes_matches_and_updates_counts() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        users.create_index("name").await.unwrap();
        users.insert(&doc(1, "Alice", 30)).await.unwrap();
        users.insert(&doc(2, "Bob", 25)).await.unwrap();

        let removed = users
            .delete(&Query::new().filter("name", Predicate::Equal(Value::Str("Alice".into()))))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(users.count_documents().await.unwrap(), 1);

        let by_index = users
            .fetch(Query::new().filter("name", Predicate::Equal(Value::Str("Alice".into()))))
            .await
            .unwrap();
        assert!(by_index.is_empty());
    }

    #[tokio::test]
    async fn repartition_collection_moves_records_into_new_shards() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        users.insert(&doc(1, "Alice", 30)).await.unwrap();
        users.insert(&doc(2, "Bob", 25)).await.unwrap();
        assert_eq!(users.all_shard_info().await.len(), 1);

        users.repartition_collection(Some("name")).await.unwrap();
        let mut ids: Vec<String> = users
            .all_shard_info()
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(users.count_documents().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn create_index_backfills_existing_shard_data() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        users.insert(&doc(1, "Alice", 30)).await.unwrap();
        users.insert(&doc(2, "Alice", 45)).await.unwrap();

        let created = users.create_index("name").await.unwrap();
        assert!(created);
        assert!(!users.create_index("name").await.unwrap());

        let matches = users
            .fetch(Query::new().filter("name", Predicate::Equal(Value::Str("Alice".into()))))
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn reopen_restores_partition_field_and_indexes() {
        let dir = TempDir::new().unwrap();
        {
            let users = open(&dir, "Users").await;
            users.set_partition_key(Some("name")).await.unwrap();
            users.create_index("age").await.unwrap();
            users.insert(&doc(1, "Alice", 30)).await.unwrap();
            users.shutdown().await;
        }
        let reopened = open(&dir, "Users").await;
        let by_index = reopened
            .fetch(Query::new().filter("age", Predicate::Equal(Value::Int(30))))
            .await
            .unwrap();
        assert_eq!(by_index.len(), 1);
        let info = reopened.all_shard_info().await;
        assert_eq!(info[0].0, "Alice");
    }

    #[tokio::test]
    async fn cleanup_empty_shards_via_collection() {
        let dir = TempDir::new().unwrap();
        let users = open(&dir, "Users").await;
        users.insert(&doc(1, "Alice", 30)).await.unwrap();
        let _ = users.shard_manager.get_or_create_shard("empty");
        let removed = users.cleanup_empty_shards().await.unwrap();
        assert_eq!(removed, 1);
    }
}
