//! Shard payload compression, pluggable per shard. The variant a shard
//! was created with is persisted in its header so a reader can decompress
//! after a process restart without being told which codec to use.

use crate::error::{DbError, DbResult};

/// The codec tag byte persisted in the shard header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    None = 0,
    General = 1,
}

impl CodecKind {
    pub fn from_tag(tag: u8) -> DbResult<Self> {
        match tag {
            0 => Ok(CodecKind::None),
            1 => Ok(CodecKind::General),
            other => Err(DbError::CodecFailure(format!("unknown codec tag {other}"))),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn codec(self) -> Box<dyn Codec> {
        match self {
            CodecKind::None => Box::new(NoneCodec),
            CodecKind::General => Box::new(Lz4Codec),
        }
    }
}

impl std::str::FromStr for CodecKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CodecKind::None),
            "general" => Ok(CodecKind::General),
            other => Err(DbError::CodecFailure(format!("unknown codec '{other}'"))),
        }
    }
}

/// Compression over opaque byte buffers.
pub trait Codec: Send + Sync {
    fn compress(&self, bytes: &[u8]) -> DbResult<Vec<u8>>;
    fn decompress(&self, bytes: &[u8]) -> DbResult<Vec<u8>>;
}

/// Identity codec: no compression.
pub struct NoneCodec;

impl Codec for NoneCodec {
    fn compress(&self, bytes: &[u8]) -> DbResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn decompress(&self, bytes: &[u8]) -> DbResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// General-purpose byte-stream compressor backed by `lz4_flex`.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn compress(&self, bytes: &[u8]) -> DbResult<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(bytes))
    }

    fn decompress(&self, bytes: &[u8]) -> DbResult<Vec<u8>> {
        lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| DbError::CodecFailure(format!("lz4 decompress failed: {e}")))
    }
}
