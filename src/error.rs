use thiserror::Error;

/// Errors produced by the storage and query engine.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("partition key '{0}' not found on document")]
    PartitionKeyNotFound(String),

    #[error("index key '{0}' not found on document")]
    IndexKeyNotFound(String),

    #[error("shard '{0}' not found")]
    ShardNotFound(String),

    #[error("shard '{0}' already exists")]
    ShardAlreadyExists(String),

    #[error("failed to persist shard '{0}': {1}")]
    ShardPersistFailure(String, String),

    #[error("failed to decode record: {0}")]
    DecodeFailure(String),

    #[error("failed to encode record: {0}")]
    EncodeFailure(String),

    #[error("codec failure: {0}")]
    CodecFailure(String),

    #[error("document not found")]
    DocumentNotFound,

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("collection '{0}' already exists")]
    CollectionAlreadyExists(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;
