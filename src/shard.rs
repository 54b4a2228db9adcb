//! An on-disk partition of one collection's documents: a
//! compressed, codec/format-tagged payload file plus a sidecar metadata
//! document, atomically replaced on every mutation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::codec::CodecKind;
use crate::error::{DbError, DbResult};
use crate::record::Record;
use crate::serializer::{self, FieldContext, Format};
use crate::value::Value;

const MAGIC: &[u8; 4] = b"NYRU";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 8;

/// Minimum/maximum canonical string value of an indexed field observed in a
/// shard.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRange {
    pub min: String,
    pub max: String,
}

/// The sidecar document persisted alongside a shard's payload.
#[derive(Debug, Clone)]
pub struct ShardMeta {
    pub document_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub field_stats: Vec<(String, FieldRange)>,
}

impl ShardMeta {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            document_count: 0,
            created_at: now,
            updated_at: now,
            field_stats: Vec::new(),
        }
    }

    fn to_value(&self) -> Value {
        let stats = self
            .field_stats
            .iter()
            .map(|(field, range)| {
                (
                    field.clone(),
                    Value::Object(vec![
                        ("min".to_string(), Value::Str(range.min.clone())),
                        ("max".to_string(), Value::Str(range.max.clone())),
                    ]),
                )
            })
            .collect();
        Value::Object(vec![
            (
                "documentCount".to_string(),
                Value::UInt(self.document_count),
            ),
            (
                "createdAt".to_string(),
                Value::Str(self.created_at.to_rfc3339()),
            ),
            (
                "updatedAt".to_string(),
                Value::Str(self.updated_at.to_rfc3339()),
            ),
            ("fieldStats".to_string(), Value::Object(stats)),
        ])
    }

    fn from_value(value: Value) -> DbResult<Self> {
        let fail = || DbError::DecodeFailure("malformed shard metadata sidecar".to_string());
        let obj = value.as_object().ok_or_else(fail)?;
        let get = |k: &str| obj.iter().find(|(key, _)| key == k).map(|(_, v)| v);

        let document_count = match get("documentCount") {
            Some(Value::UInt(n)) => *n,
            Some(Value::Int(n)) if *n >= 0 => *n as u64,
            _ => return Err(fail()),
        };
        let parse_time = |v: Option<&Value>| -> DbResult<DateTime<Utc>> {
            match v {
                Some(Value::Str(s)) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| DbError::DecodeFailure(format!("bad timestamp: {e}"))),
                _ => Err(fail()),
            }
        };
        let created_at = parse_time(get("createdAt"))?;
        let updated_at = parse_time(get("updatedAt"))?;
        let field_stats = match get("fieldStats") {
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(field, v)| {
                    let obj = v.as_object().ok_or_else(fail)?;
                    let min = match obj.iter().find(|(k, _)| k == "min").map(|(_, v)| v) {
                        Some(Value::Str(s)) => s.clone(),
                        _ => return Err(fail()),
                    };
                    let max = match obj.iter().find(|(k, _)| k == "max").map(|(_, v)| v) {
                        Some(Value::Str(s)) => s.clone(),
                        _ => return Err(fail()),
                    };
                    Ok((field.clone(), FieldRange { min, max }))
                })
                .collect::<DbResult<Vec<_>>>()?,
            _ => return Err(fail()),
        };
        Ok(Self {
            document_count,
            created_at,
            updated_at,
            field_stats,
        })
    }
}

fn payload_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.nyaru"))
}

fn meta_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.nyaru.meta.json"))
}

pub(crate) async fn atomic_write(path: &Path, bytes: &[u8]) -> DbResult<()> {
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// One partition's file, guarded against concurrent writers by the manager
/// that owns it: an exclusive lock serializes concurrent writers to the
/// same shard.
pub struct Shard {
    id: String,
    payload_path: PathBuf,
    meta_path: PathBuf,
    codec: CodecKind,
    format: Format,
    meta: RwLock<ShardMeta>,
}

impl Shard {
    /// A brand-new, empty shard; nothing is written to disk until the first
    /// mutation — a shard is created lazily on first insert.
    pub fn new_empty(id: impl Into<String>, dir: &Path, codec: CodecKind, format: Format) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            payload_path: payload_path(dir, &id),
            meta_path: meta_path(dir, &id),
            id,
            codec,
            format,
            meta: RwLock::new(ShardMeta::empty(now)),
        }
    }

    /// Reopen a shard whose payload file already exists on disk. Recomputes
    /// metadata from the payload if the sidecar is missing or unreadable;
    /// sidecar errors are non-fatal.
    pub async fn open(id: impl Into<String>, dir: &Path, indexed_fields: &[String]) -> DbResult<Self> {
        let id = id.into();
        let payload_path = payload_path(dir, &id);
        let meta_path = meta_path(dir, &id);
        let header = tokio::fs::read(&payload_path).await?;
        let (codec, format) = read_header(&header)?;

        let meta = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => match serializer::decode_value(&bytes, Format::TagTree)
                .and_then(ShardMeta::from_value)
            {
                Ok(meta) => meta,
                Err(_) => ShardMeta::empty(Utc::now()),
            },
            Err(_) => ShardMeta::empty(Utc::now()),
        };

        let shard = Self {
            id,
            payload_path,
            meta_path,
            codec,
            format,
            meta: RwLock::new(meta),
        };
        if shard.meta.read().await.document_count == 0 {
            shard.recompute_metadata(indexed_fields).await?;
        }
        Ok(shard)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn metadata(&self) -> ShardMeta {
        self.meta.read().await.clone()
    }

    /// Append one record's encoded bytes to the shard, recompressing and
    /// atomically replacing the payload, then refreshing metadata.
    pub async fn append<T: Record>(&self, record: &T, indexed_fields: &[String]) -> DbResult<()> {
        let encoded = serializer::encode(record, self.format)?;
        self.append_encoded(&encoded, indexed_fields).await
    }

    /// Type-agnostic append used internally and by tests exercising the
    /// wire bytes directly.
    pub async fn append_encoded(&self, encoded: &[u8], indexed_fields: &[String]) -> DbResult<()> {
        let mut elements = self.decode_elements().await?;
        elements.push(encoded.to_vec());
        self.write_elements(&elements).await?;

        let mut meta = self.meta.write().await;
        meta.document_count += 1;
        meta.updated_at = Utc::now();
        for field in indexed_fields {
            if let Ok(s) = serializer::extract_field(encoded, field, self.format, FieldContext::Index)
            {
                update_range(&mut meta.field_stats, field, &s);
            }
        }
        drop(meta);
        self.persist_meta().await
    }

    /// Replace the whole decoded sequence, recomputing
    /// metadata from scratch over the new contents.
    pub async fn save_all<T: Record>(&self, records: &[T], indexed_fields: &[String]) -> DbResult<()> {
        let encoded: DbResult<Vec<Vec<u8>>> = records
            .iter()
            .map(|r| serializer::encode(r, self.format))
            .collect();
        self.replace_contents(&encoded?, indexed_fields).await
    }

    /// Decode and yield every record currently stored.
    pub async fn load_all<T: Record>(&self) -> DbResult<Vec<T>> {
        let elements = self.decode_elements().await?;
        elements
            .iter()
            .map(|bytes| serializer::decode::<T>(bytes, self.format))
            .collect()
    }

    /// The shard's decompressed payload body: an encoded array of
    /// already-encoded record byte strings. Used by
    /// compaction, which never decodes into a typed record.
    pub async fn raw_bytes(&self) -> DbResult<Vec<u8>> {
        let elements = self.decode_elements().await?;
        serializer::encode_array(&elements, self.format)
    }

    /// Replace the payload with a pre-encoded array body, used by compaction
    /// once it has merged candidate shards' elements into one array.
    pub async fn set_raw_bytes(&self, body: &[u8], indexed_fields: &[String]) -> DbResult<()> {
        let elements = serializer::decode_array(body, self.format)?;
        self.replace_contents(&elements, indexed_fields).await
    }

    async fn replace_contents(&self, elements: &[Vec<u8>], indexed_fields: &[String]) -> DbResult<()> {
        self.write_elements(elements).await?;

        let mut field_stats: Vec<(String, FieldRange)> = Vec::new();
        for element in elements {
            for field in indexed_fields {
                if let Ok(s) =
                    serializer::extract_field(element, field, self.format, FieldContext::Index)
                {
                    update_range(&mut field_stats, field, &s);
                }
            }
        }

        let mut meta = self.meta.write().await;
        meta.document_count = elements.len() as u64;
        meta.updated_at = Utc::now();
        meta.field_stats = field_stats;
        drop(meta);
        self.persist_meta().await
    }

    /// Recompute `field_stats` (and `document_count`) from the current
    /// payload for the given set of indexed fields. Used both on reopen
    /// (when the sidecar is missing/stale) and by `Collection::create_index`
    /// to backfill min/max coverage for a field indexed after the shard
    /// already held data.
    pub async fn recompute_metadata(&self, indexed_fields: &[String]) -> DbResult<()> {
        let elements = self.decode_elements().await?;
        let mut field_stats: Vec<(String, FieldRange)> = Vec::new();
        for element in &elements {
            for field in indexed_fields {
                if let Ok(s) =
                    serializer::extract_field(element, field, self.format, FieldContext::Index)
                {
                    update_range(&mut field_stats, field, &s);
                }
            }
        }
        let mut meta = self.meta.write().await;
        meta.document_count = elements.len() as u64;
        meta.field_stats = field_stats;
        drop(meta);
        self.persist_meta().await
    }

    async fn decode_elements(&self) -> DbResult<Vec<Vec<u8>>> {
        match tokio::fs::read(&self.payload_path).await {
            Ok(bytes) => {
                let (_, _, body) = split_header(&bytes)?;
                let decompressed = self.codec.codec().decompress(body)?;
                serializer::decode_array(&decompressed, self.format)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_elements(&self, elements: &[Vec<u8>]) -> DbResult<()> {
        let body = serializer::encode_array(elements, self.format)?;
        let compressed = self.codec.codec().compress(&body)?;
        let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(self.codec.tag());
        out.push(self.format.tag());
        out.push(0);
        out.extend_from_slice(&compressed);
        atomic_write(&self.payload_path, &out)
            .await
            .map_err(|e| DbError::ShardPersistFailure(self.id.clone(), e.to_string()))
    }

    async fn persist_meta(&self) -> DbResult<()> {
        let meta = self.meta.read().await;
        let bytes = serializer::encode_value(&meta.to_value(), Format::TagTree)?;
        drop(meta);
        // Sidecar errors are non-fatal: stats are recomputable on
        // next open, so a failure here doesn't roll back the payload swap.
        let _ = atomic_write(&self.meta_path, &bytes).await;
        Ok(())
    }

    /// Remove the payload and sidecar files from disk.
    pub async fn delete_files(&self) -> DbResult<()> {
        let _ = tokio::fs::remove_file(&self.payload_path).await;
        let _ = tokio::fs::remove_file(&self.meta_path).await;
        Ok(())
    }
}

fn update_range(stats: &mut Vec<(String, FieldRange)>, field: &str, value: &str) {
    if let Some((_, range)) = stats.iter_mut().find(|(f, _)| f == field) {
        if value < range.min.as_str() {
            range.min = value.to_string();
        }
        if value > range.max.as_str() {
            range.max = value.to_string();
        }
    } else {
        stats.push((
            field.to_string(),
            FieldRange {
                min: value.to_string(),
                max: value.to_string(),
            },
        ));
    }
}

fn read_header(bytes: &[u8]) -> DbResult<(CodecKind, Format)> {
    let (codec, format, _) = split_header(bytes)?;
    Ok((codec, format))
}

fn split_header(bytes: &[u8]) -> DbResult<(CodecKind, Format, &[u8])> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
        return Err(DbError::DecodeFailure("bad shard header magic".to_string()));
    }
    if bytes[4] != VERSION {
        return Err(DbError::DecodeFailure(format!(
            "unsupported shard version {}",
            bytes[4]
        )));
    }
    let codec = CodecKind::from_tag(bytes[5])?;
    let format = Format::from_tag(bytes[6])?;
    Ok((codec, format, &bytes[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::JsonDocument;
    use tempfile::TempDir;

    fn doc(id: i64, name: &str) -> JsonDocument {
        JsonDocument::new(vec![
            ("id".to_string(), Value::Int(id)),
            ("name".to_string(), Value::Str(name.to_string())),
        ])
    }

    #[tokio::test]
    async fn append_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let shard = Shard::new_empty("default", dir.path(), CodecKind::None, Format::TagTree);
        let indexed = vec!["name".to_string()];
        shard.append(&doc(1, "Alice"), &indexed).await.unwrap();
        shard.append(&doc(2, "Bob"), &indexed).await.unwrap();

        let loaded: Vec<JsonDocument> = shard.load_all().await.unwrap();
        assert_eq!(loaded, vec![doc(1, "Alice"), doc(2, "Bob")]);

        let meta = shard.metadata().await;
        assert_eq!(meta.document_count, 2);
        let name_range = meta
            .field_stats
            .iter()
            .find(|(f, _)| f == "name")
            .map(|(_, r)| r.clone())
            .unwrap();
        assert_eq!(name_range.min, "Alice");
        assert_eq!(name_range.max, "Bob");
    }

    #[tokio::test]
    async fn append_with_lz4_codec_roundtrips() {
        let dir = TempDir::new().unwrap();
        let shard = Shard::new_empty("default", dir.path(), CodecKind::General, Format::Packed);
        shard.append(&doc(1, "Alice"), &[]).await.unwrap();
        let loaded: Vec<JsonDocument> = shard.load_all().await.unwrap();
        assert_eq!(loaded, vec![doc(1, "Alice")]);
    }

    #[tokio::test]
    async fn reopen_reads_persisted_payload_and_metadata() {
        let dir = TempDir::new().unwrap();
        {
            let shard = Shard::new_empty("p1", dir.path(), CodecKind::None, Format::TagTree);
            shard.append(&doc(1, "Alice"), &["name".to_string()]).await.unwrap();
        }
        let reopened = Shard::open("p1", dir.path(), &["name".to_string()])
            .await
            .unwrap();
        let loaded: Vec<JsonDocument> = reopened.load_all().await.unwrap();
        assert_eq!(loaded, vec![doc(1, "Alice")]);
        assert_eq!(reopened.metadata().await.document_count, 1);
    }

    #[tokio::test]
    async fn raw_bytes_and_set_raw_bytes_support_compaction_style_merge() {
        let dir = TempDir::new().unwrap();
        let a = Shard::new_empty("a", dir.path(), CodecKind::None, Format::TagTree);
        a.append(&doc(1, "Alice"), &[]).await.unwrap();
        let b = Shard::new_empty("b", dir.path(), CodecKind::None, Format::TagTree);
        b.append(&doc(2, "Bob"), &[]).await.unwrap();

        let a_elements = serializer::decode_array(&a.raw_bytes().await.unwrap(), Format::TagTree).unwrap();
        let b_elements = serializer::decode_array(&b.raw_bytes().await.unwrap(), Format::TagTree).unwrap();
        let merged_body = serializer::encode_array(
            &[a_elements, b_elements].concat(),
            Format::TagTree,
        )
        .unwrap();

        a.set_raw_bytes(&merged_body, &[]).await.unwrap();
        let loaded: Vec<JsonDocument> = a.load_all().await.unwrap();
        assert_eq!(loaded, vec![doc(1, "Alice"), doc(2, "Bob")]);
        assert_eq!(a.metadata().await.document_count, 2);
    }
}
