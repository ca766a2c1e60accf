use crate::error::StorageResult;
use crate::message::MessageRecord;
use crate::queue::QueueConfig;

/// Secondary indexes over the messages column family. Each entry's value is the
/// message id it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// READY messages in poll order.
    Ready,
    /// DELAYED messages ordered by `available_at`.
    Delayed,
    /// UNACKNOWLEDGED messages ordered by `visibility_deadline`.
    Unacked,
    /// Messages with a TTL ordered by `expires_at`.
    Expiry,
}

/// An index entry returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub msg_id: String,
}

/// Represents a single operation in an atomic write batch.
#[derive(Debug)]
pub enum WriteBatchOp {
    PutMessage { key: Vec<u8>, value: Vec<u8> },
    DeleteMessage { key: Vec<u8> },
    PutIndex { index: Index, key: Vec<u8>, msg_id: String },
    DeleteIndex { index: Index, key: Vec<u8> },
    PutDedup { key: Vec<u8>, value: Vec<u8> },
    DeleteDedup { key: Vec<u8> },
    PutQueue { name: String, value: Vec<u8> },
    PutState { key: String, value: Vec<u8> },
    DeleteState { key: String },
    /// Add `delta` to the counter stored under `key` (missing counts as zero,
    /// the result is clamped at zero).
    IncrementCounter { key: String, delta: i64 },
}

/// A condition evaluated atomically with the batch it guards.
#[derive(Debug)]
pub enum Precondition {
    /// The stored message's revision equals `expected`; `None` requires absence.
    MessageRevision { key: Vec<u8>, expected: Option<u64> },
    /// The queue's stored config equals `expected`; `None` requires absence.
    QueueConfigIs {
        name: String,
        expected: Option<QueueConfig>,
    },
    /// The counter under `key` is strictly below `limit`.
    CounterBelow { key: String, limit: i64 },
    /// The dedup entry is missing or expired at `now_ns`.
    DedupVacant { key: Vec<u8>, now_ns: u64 },
}

/// Storage trait for all persistence operations. Implementations must be thread-safe
/// and must apply `write_batch_if` as one indivisible step with respect to every
/// other write, from any client.
pub trait Storage: Send + Sync {
    // --- Message operations ---

    /// Retrieve a message by its full key.
    fn get_message(&self, key: &[u8]) -> StorageResult<Option<MessageRecord>>;

    /// List messages whose keys start with the given prefix, in lexicographic order.
    fn list_messages(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, MessageRecord)>>;

    // --- Index operations ---

    /// Scan an index from `prefix` forward, stopping at the end of the prefix,
    /// at the first key greater than `up_to` (when given), or after `limit` entries.
    fn scan_index(
        &self,
        index: Index,
        prefix: &[u8],
        up_to: Option<&[u8]>,
        limit: usize,
    ) -> StorageResult<Vec<IndexEntry>>;

    /// Count index entries under `prefix`.
    fn count_index(&self, index: Index, prefix: &[u8]) -> StorageResult<u64>;

    // --- Dedup operations ---

    /// Retrieve a dedup entry's raw value.
    fn get_dedup(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// List dedup entries under `prefix`.
    fn list_dedup(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    // --- Queue operations ---

    /// Retrieve a queue config by name.
    fn get_queue(&self, name: &str) -> StorageResult<Option<QueueConfig>>;

    /// List all configured queue names with their configs.
    fn list_queues(&self) -> StorageResult<Vec<(String, QueueConfig)>>;

    // --- State operations ---

    /// Retrieve a state value by key.
    fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// List state entries whose keys start with `prefix`.
    fn list_state_by_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    // --- Batch operations ---

    /// Atomically apply a batch of write operations across column families.
    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()>;

    /// Atomically check every precondition and, only if all hold, apply the
    /// batch. Returns whether the batch was applied.
    fn write_batch_if(
        &self,
        checks: Vec<Precondition>,
        ops: Vec<WriteBatchOp>,
    ) -> StorageResult<bool>;

    /// Flush buffered writes to durable storage.
    fn flush(&self) -> StorageResult<()>;
}
