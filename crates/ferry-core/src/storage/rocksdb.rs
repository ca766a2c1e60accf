use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{StorageError, StorageResult};
use crate::message::MessageRecord;
use crate::queue::QueueConfig;
use crate::storage::keys;
use crate::storage::traits::{Index, IndexEntry, Precondition, Storage, WriteBatchOp};

const CF_MESSAGES: &str = "messages";
const CF_READY: &str = "ready";
const CF_DELAYED: &str = "delayed";
const CF_UNACKED: &str = "unacked";
const CF_EXPIRY: &str = "expiry";
const CF_DEDUP: &str = "dedup";
const CF_QUEUES: &str = "queues";
const CF_STATE: &str = "state";

/// All column family names (excluding `default` which RocksDB creates automatically).
const COLUMN_FAMILIES: &[&str] = &[
    CF_MESSAGES,
    CF_READY,
    CF_DELAYED,
    CF_UNACKED,
    CF_EXPIRY,
    CF_DEDUP,
    CF_QUEUES,
    CF_STATE,
];

type DB = DBWithThreadMode<MultiThreaded>;

fn index_cf(index: Index) -> &'static str {
    match index {
        Index::Ready => CF_READY,
        Index::Delayed => CF_DELAYED,
        Index::Unacked => CF_UNACKED,
        Index::Expiry => CF_EXPIRY,
    }
}

/// RocksDB-backed storage implementation.
///
/// Every write goes through `commit_lock`, which makes precondition evaluation
/// and batch application one step for all handles sharing this store.
pub struct RocksDbStorage {
    db: DB,
    commit_lock: Mutex<()>,
}

impl RocksDbStorage {
    /// Open or create a RocksDB database at the given path with all column families.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let cf_opts = Options::default();
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> StorageResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::RocksDb(format!("column family not found: {name}")))
    }

    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    fn read_counter(&self, key: &str) -> StorageResult<i64> {
        let cf = self.cf(CF_STATE)?;
        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(value) => keys::parse_counter_value(&value)
                .ok_or_else(|| StorageError::CorruptData(format!("counter {key}"))),
            None => Ok(0),
        }
    }

    fn check(&self, precondition: &Precondition) -> StorageResult<bool> {
        match precondition {
            Precondition::MessageRevision { key, expected } => {
                let current = self.get_message(key)?.map(|msg| msg.revision);
                Ok(current == *expected)
            }
            Precondition::QueueConfigIs { name, expected } => {
                Ok(self.get_queue(name)?.as_ref() == expected.as_ref())
            }
            Precondition::CounterBelow { key, limit } => Ok(self.read_counter(key)? < *limit),
            Precondition::DedupVacant { key, now_ns } => match self.get_dedup(key)? {
                Some(value) => {
                    let expires_at = keys::parse_dedup_value(&value)
                        .ok_or_else(|| StorageError::CorruptData("dedup entry".to_string()))?;
                    Ok(expires_at <= *now_ns)
                }
                None => Ok(true),
            },
        }
    }

    /// Build and write the batch. Caller must hold `commit_lock`.
    fn apply(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()> {
        let mut batch = WriteBatch::default();
        let mut counter_deltas: HashMap<String, i64> = HashMap::new();

        for op in ops {
            match op {
                WriteBatchOp::PutMessage { key, value } => {
                    batch.put_cf(&self.cf(CF_MESSAGES)?, &key, &value);
                }
                WriteBatchOp::DeleteMessage { key } => {
                    batch.delete_cf(&self.cf(CF_MESSAGES)?, &key);
                }
                WriteBatchOp::PutIndex { index, key, msg_id } => {
                    batch.put_cf(&self.cf(index_cf(index))?, &key, msg_id.as_bytes());
                }
                WriteBatchOp::DeleteIndex { index, key } => {
                    batch.delete_cf(&self.cf(index_cf(index))?, &key);
                }
                WriteBatchOp::PutDedup { key, value } => {
                    batch.put_cf(&self.cf(CF_DEDUP)?, &key, &value);
                }
                WriteBatchOp::DeleteDedup { key } => {
                    batch.delete_cf(&self.cf(CF_DEDUP)?, &key);
                }
                WriteBatchOp::PutQueue { name, value } => {
                    batch.put_cf(&self.cf(CF_QUEUES)?, name.as_bytes(), &value);
                }
                WriteBatchOp::PutState { key, value } => {
                    batch.put_cf(&self.cf(CF_STATE)?, key.as_bytes(), &value);
                }
                WriteBatchOp::DeleteState { key } => {
                    batch.delete_cf(&self.cf(CF_STATE)?, key.as_bytes());
                }
                WriteBatchOp::IncrementCounter { key, delta } => {
                    *counter_deltas.entry(key).or_insert(0) += delta;
                }
            }
        }

        for (key, delta) in counter_deltas {
            let next = (self.read_counter(&key)? + delta).max(0);
            batch.put_cf(
                &self.cf(CF_STATE)?,
                key.as_bytes(),
                keys::counter_value(next),
            );
        }

        self.db.write(batch)?;
        Ok(())
    }
}

impl Storage for RocksDbStorage {
    fn get_message(&self, key: &[u8]) -> StorageResult<Option<MessageRecord>> {
        let cf = self.cf(CF_MESSAGES)?;
        match self.db.get_cf(&cf, key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn list_messages(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, MessageRecord)>> {
        self.scan_prefix(CF_MESSAGES, prefix)?
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::from_slice(&value)?)))
            .collect()
    }

    fn scan_index(
        &self,
        index: Index,
        prefix: &[u8],
        up_to: Option<&[u8]>,
        limit: usize,
    ) -> StorageResult<Vec<IndexEntry>> {
        let cf = self.cf(index_cf(index))?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
        let mut results = Vec::new();
        for item in iter {
            if results.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if up_to.is_some_and(|bound| key.as_ref() > bound) {
                break;
            }
            let msg_id = String::from_utf8(value.to_vec())
                .map_err(|e| StorageError::CorruptData(format!("index value: {e}")))?;
            results.push(IndexEntry {
                key: key.to_vec(),
                msg_id,
            });
        }
        Ok(results)
    }

    fn count_index(&self, index: Index, prefix: &[u8]) -> StorageResult<u64> {
        let cf = self.cf(index_cf(index))?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
        let mut count = 0u64;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn get_dedup(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let cf = self.cf(CF_DEDUP)?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    fn list_dedup(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.scan_prefix(CF_DEDUP, prefix)
    }

    fn get_queue(&self, name: &str) -> StorageResult<Option<QueueConfig>> {
        let cf = self.cf(CF_QUEUES)?;
        match self.db.get_cf(&cf, name.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn list_queues(&self) -> StorageResult<Vec<(String, QueueConfig)>> {
        let cf = self.cf(CF_QUEUES)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::CorruptData(format!("queue name: {e}")))?;
            let config: QueueConfig = serde_json::from_slice(&value)?;
            results.push((name, config));
        }
        Ok(results)
    }

    fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let cf = self.cf(CF_STATE)?;
        Ok(self.db.get_cf(&cf, key.as_bytes())?)
    }

    fn list_state_by_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.scan_prefix(CF_STATE, prefix.as_bytes())?
            .into_iter()
            .map(|(key, value)| {
                let key = String::from_utf8(key)
                    .map_err(|e| StorageError::CorruptData(format!("state key: {e}")))?;
                Ok((key, value))
            })
            .collect()
    }

    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()> {
        let _guard = self
            .commit_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.apply(ops)
    }

    fn write_batch_if(
        &self,
        checks: Vec<Precondition>,
        ops: Vec<WriteBatchOp>,
    ) -> StorageResult<bool> {
        let _guard = self
            .commit_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for precondition in &checks {
            if !self.check(precondition)? {
                return Ok(false);
            }
        }
        self.apply(ops)?;
        Ok(true)
    }

    fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
