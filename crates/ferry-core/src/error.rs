use std::path::PathBuf;

use crate::queue::QueueOperation;

/// Low-level storage errors (RocksDB, serialization). `Storage` methods only
/// fail with infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::RocksDb(err.into_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Raised when a value cannot be converted to or from its stored bytes.
#[derive(Debug, thiserror::Error)]
#[error("codec error: {0}")]
pub struct CodecError(pub String);

/// A queue name or message id that cannot be stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidName {
    #[error("name is empty")]
    Empty,

    #[error("name is {len} bytes, longer than the {max} byte maximum")]
    TooLong { len: usize, max: usize },

    #[error("name {0:?} contains control characters")]
    ControlCharacters(String),
}

/// A queue config rejected before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidConfig {
    #[error("visibility_timeout_ms must be greater than zero")]
    ZeroVisibilityTimeout,

    #[error("queue {0} cannot be its own dead-letter queue")]
    SelfDeadLetter(String),

    #[error("invalid dead_letter_queue: {0}")]
    DeadLetterQueueName(#[source] InvalidName),
}

/// A client config file that could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("error reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Text that names no queue operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown queue operation: {0}")]
pub struct UnknownOperation(pub String);

/// The targeted operation is switched off for the queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operation {operation} is disabled for queue {queue}")]
pub struct OperationDisabled {
    pub queue: String,
    pub operation: QueueOperation,
}

// --- Per-operation error types ---

#[derive(Debug, thiserror::Error)]
pub enum AddError {
    #[error(transparent)]
    Disabled(#[from] OperationDisabled),

    #[error("invalid message id: {0}")]
    InvalidId(#[source] InvalidName),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Disabled(#[from] OperationDisabled),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum AckError {
    #[error(transparent)]
    Disabled(#[from] OperationDisabled),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum NackError {
    #[error(transparent)]
    Disabled(#[from] OperationDisabled),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum RemoveError {
    #[error(transparent)]
    Disabled(#[from] OperationDisabled),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum MoveError {
    #[error(transparent)]
    Disabled(#[from] OperationDisabled),

    #[error("invalid destination: {0}")]
    InvalidDestination(#[source] InvalidName),

    #[error("cannot move messages of {0} into itself")]
    SameQueue(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] InvalidConfig),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Error for read-only lookups that decode stored values.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised while starting or stopping a queue client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid queue name: {0}")]
    InvalidQueueName(#[from] InvalidName),

    #[error("failed to spawn background thread: {0}")]
    ThreadSpawn(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
