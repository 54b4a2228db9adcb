//! The top-level handle a caller opens: owns the data directory and a cache
//! of [`Collection`] handles, each with its own independent background
//! compaction task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::codec::CodecKind;
use crate::collection::Collection;
use crate::config::CollectionConfig;
use crate::error::{DbError, DbResult};
use crate::query::Query;
use crate::record::JsonDocument;
use crate::serializer::Format;
use crate::stats::{IndexFieldStats, ShardStats};

/// Engine-wide defaults applied to every collection opened through it,
/// unless the caller passes a collection-specific override to
/// [`Engine::collection_with_config`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub codec: CodecKind,
    pub format: Format,
    pub compaction_threshold: usize,
    pub compaction_interval: Duration,
    /// Wraps every public operation in `tokio::time::timeout` when set.
    pub operation_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::None,
            format: Format::TagTree,
            compaction_threshold: 100,
            compaction_interval: Duration::from_secs(60),
            operation_timeout: None,
        }
    }
}

impl EngineConfig {
    /// `path` is overwritten by `Collection::open` once it knows the
    /// collection's own directory; a placeholder is fine here.
    fn collection_config(&self) -> CollectionConfig {
        CollectionConfig {
            path: PathBuf::new(),
            codec: self.codec,
            format: self.format,
            file_protection: false,
            compaction_threshold: self.compaction_threshold,
            compaction_interval: self.compaction_interval,
            operation_timeout: self.operation_timeout,
        }
    }
}

/// The database handle: a directory of named collections, each
/// lazily opened and cached for the lifetime of the `Engine`. Collections
/// hold `JsonDocument`s; callers needing a typed model build their own
/// [`Collection<T>`] directly via `Collection::open`.
pub struct Engine {
    base_dir: PathBuf,
    config: EngineConfig,
    collections: Arc<DashMap<String, Arc<Collection<JsonDocument>>>>,
    /// Serializes the open-or-create path so two racing callers opening the
    /// same not-yet-cached collection can't each construct one (and each
    /// spawn a compaction task) only for one to be discarded.
    creation_lock: AsyncMutex<()>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            base_dir: self.base_dir.clone(),
            config: self.config.clone(),
            collections: self.collections.clone(),
            creation_lock: AsyncMutex::new(()),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("base_dir", &self.base_dir).finish()
    }
}

impl Engine {
    /// Open (creating if absent) the engine's data directory with default
    /// configuration.
    pub async fn new(base_dir: impl Into<PathBuf>) -> DbResult<Self> {
        Self::with_config(base_dir, EngineConfig::default()).await
    }

    pub async fn with_config(base_dir: impl Into<PathBuf>, config: EngineConfig) -> DbResult<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            base_dir,
            config,
            collections: Arc::new(DashMap::new()),
            creation_lock: AsyncMutex::new(()),
        })
    }

    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = DbResult<T>>) -> DbResult<T> {
        match self.config.operation_timeout {
            Some(duration) => tokio::time::timeout(duration, fut)
                .await
                .map_err(|_| DbError::Timeout)?,
            None => fut.await,
        }
    }

    /// Return the cached handle for `name`, opening it from disk (creating
    /// an empty one if it doesn't exist yet) the first time it's requested.
    pub async fn collection(&self, name: &str) -> DbResult<Arc<Collection<JsonDocument>>> {
        if let Some(existing) = self.collections.get(name) {
            return Ok(existing.clone());
        }

        let _guard = self.creation_lock.lock().await;
        if let Some(existing) = self.collections.get(name) {
            return Ok(existing.clone());
        }

        let config = self.config.collection_config();
        let opened = Collection::open(name.to_string(), &self.base_dir, config).await?;
        let handle = Arc::new(opened);
        self.collections.insert(name.to_string(), handle.clone());
        tracing::info!(collection = name, "opened collection");
        Ok(handle)
    }

    /// Whether `name` has a collection directory on disk, without opening
    /// (and without spawning its compaction task).
    pub async fn collection_exists(&self, name: &str) -> bool {
        if self.collections.contains_key(name) {
            return true;
        }
        tokio::fs::metadata(self.base_dir.join(name)).await.is_ok()
    }

    /// Every collection name with a directory under the engine root, cached
    /// or not.
    pub async fn list_collections(&self) -> DbResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Shut down and remove a collection entirely, deleting its directory.
    /// A no-op success if the collection was never opened and has no
    /// directory on disk.
    pub async fn drop_collection(&self, name: &str) -> DbResult<()> {
        let _guard = self.creation_lock.lock().await;
        tracing::info!(collection = name, "dropping collection");
        if let Some((_, handle)) = self.collections.remove(name) {
            handle.delete_directory().await?;
            return Ok(());
        }
        let path = self.base_dir.join(name);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Convenience facade over `collection(name).await?.insert(..)` for the
    /// common case of a `JsonDocument`-typed collection.
    pub async fn insert_json(&self, collection: &str, record: &JsonDocument) -> DbResult<()> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.insert(record)).await
    }

    pub async fn bulk_insert_json(&self, collection: &str, records: &[JsonDocument]) -> DbResult<usize> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.bulk_insert(records)).await
    }

    pub async fn fetch_json(&self, collection: &str, query: Query) -> DbResult<Vec<JsonDocument>> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.fetch(query)).await
    }

    pub async fn update_json(
        &self,
        collection: &str,
        query: &Query,
        updater: impl Fn(&JsonDocument) -> JsonDocument,
    ) -> DbResult<usize> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.update(query, updater)).await
    }

    pub async fn delete_json(&self, collection: &str, query: &Query) -> DbResult<usize> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.delete(query)).await
    }

    pub async fn create_index(&self, collection: &str, field: &str) -> DbResult<bool> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.create_index(field)).await
    }

    pub async fn set_partition_key(&self, collection: &str, field: Option<&str>) -> DbResult<()> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.set_partition_key(field)).await
    }

    pub async fn repartition_collection(&self, collection: &str, field: Option<&str>) -> DbResult<()> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.repartition_collection(field)).await
    }

    pub async fn count_documents(&self, collection: &str) -> DbResult<u64> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.count_documents()).await
    }

    pub async fn get_index_stats(&self, collection: &str) -> DbResult<Vec<IndexFieldStats>> {
        let handle = self.collection(collection).await?;
        Ok(handle.index_stats())
    }

    pub async fn get_shard_stats(&self, collection: &str) -> DbResult<Vec<ShardStats>> {
        let handle = self.collection(collection).await?;
        Ok(handle.shard_stats())
    }

    pub async fn cleanup_empty_shards(&self, collection: &str) -> DbResult<usize> {
        let handle = self.collection(collection).await?;
        self.with_timeout(handle.cleanup_empty_shards()).await
    }

    /// Shut down every currently-cached collection's background compaction
    /// task. Does not drop the cache, so the engine
    /// remains usable afterward (a fresh `collection()` call re-spawns
    /// compaction for that collection).
    pub async fn shutdown(&self) {
        for entry in self.collections.iter() {
            entry.value().shutdown().await;
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Predicate;
    use crate::value::Value;
    use tempfile::TempDir;

    fn doc(id: i64, name: &str) -> JsonDocument {
        JsonDocument::new(vec![
            ("id".to_string(), Value::Int(id)),
            ("name".to_string(), Value::Str(name.to_string())),
        ])
    }

    #[tokio::test]
    async fn collection_is_opened_lazily_and_cached() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(dir.path()).await.unwrap();
        assert!(!engine.collection_exists("Users").await);

        let a = engine.collection("Users").await.unwrap();
        let b = engine.collection("Users").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(engine.collection_exists("Users").await);
    }

    #[tokio::test]
    async fn insert_and_fetch_through_engine_facade() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(dir.path()).await.unwrap();
        engine.insert_json("Users", &doc(1, "Alice")).await.unwrap();
        engine.insert_json("Users", &doc(2, "Bob")).await.unwrap();

        let results = engine
            .fetch_json(
                "Users",
                Query::new().filter("name", Predicate::Equal(Value::Str("Alice".into()))),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(engine.count_documents("Users").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_collections_reflects_directories_on_disk() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(dir.path()).await.unwrap();
        engine.insert_json("Users", &doc(1, "Alice")).await.unwrap();
        engine.insert_json("Products", &doc(1, "Widget")).await.unwrap();

        let mut names = engine.list_collections().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["Products".to_string(), "Users".to_string()]);
    }

    #[tokio::test]
    async fn drop_collection_removes_cache_and_directory() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(dir.path()).await.unwrap();
        engine.insert_json("Users", &doc(1, "Alice")).await.unwrap();
        engine.drop_collection("Users").await.unwrap();

        assert!(!engine.collection_exists("Users").await);
        let names = engine.list_collections().await.unwrap();
        assert!(!names.contains(&"Users".to_string()));
    }

    #[tokio::test]
    async fn operation_timeout_surfaces_as_timeout_error() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::with_config(
            dir.path(),
            EngineConfig {
                operation_timeout: Some(Duration::from_nanos(1)),
                ..EngineConfig::default()
            },
        )
        .await
        .unwrap();

        // A single insert on an empty collection is virtually certain to
        // exceed a 1ns budget, but tolerate the rare fast scheduler by only
        // asserting on an actual timeout when one occurs.
        let result = engine.insert_json("Users", &doc(1, "Alice")).await;
        if let Err(e) = result {
            assert!(matches!(e, DbError::Timeout));
        }
    }

    #[tokio::test]
    async fn concurrent_collection_opens_share_one_handle() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(Engine::new(dir.path()).await.unwrap());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move { engine.collection("Users").await.unwrap() }));
        }
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        for h in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], h));
        }
    }
}
