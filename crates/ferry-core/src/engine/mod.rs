pub mod args;
pub mod config;
pub mod events;
pub mod metrics;

mod ack;
mod add;
mod admin;
mod poll;
mod reaper;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{OperationDisabled, StorageError, StorageResult};
use crate::message::{MessageRecord, MessageState};
use crate::queue::{QueueConfig, QueueOperation};
use crate::storage::{keys, Index, Precondition, Storage, WriteBatchOp};

use self::config::ClientConfig;
use self::events::{EventNotifier, QueueEvent};
use self::metrics::Metrics;

pub use self::reaper::ReapStats;
pub(crate) use self::reaper::{ReaperLease, ReaperRegistry};

/// Per-queue wake-up signals for waiting polls in this process. Adds made by
/// other processes are picked up by the periodic recheck instead.
#[derive(Default)]
pub(crate) struct Wakers {
    inner: Mutex<HashMap<String, Arc<Notify>>>,
}

impl Wakers {
    pub(crate) fn get(&self, queue: &str) -> Arc<Notify> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(inner.entry(queue.to_string()).or_default())
    }

    pub(crate) fn wake(&self, queue: &str) {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(notify) = inner.get(queue) {
            notify.notify_waiters();
        }
    }

    /// Forget the waker of a queue nobody holds a handle on any more.
    pub(crate) fn remove(&self, queue: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.remove(queue);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, queue: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.contains_key(queue)
    }
}

/// Everything a queue engine needs, shared by all handles of one client and by
/// the client's reaper threads.
pub(crate) struct EngineContext {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) notifier: EventNotifier,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) wakers: Wakers,
    pub(crate) config: ClientConfig,
}

impl EngineContext {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        config: ClientConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, crate::error::ClientError> {
        let notifier = EventNotifier::new(config.events.channel_capacity, Arc::clone(&metrics))?;
        Ok(Self {
            storage,
            notifier,
            metrics,
            wakers: Wakers::default(),
            config,
        })
    }
}

/// Lifecycle operations for one named queue.
///
/// The engine keeps no message state between calls: every operation reads the
/// store, decides, and commits through a conditional batch that fails if any
/// other client touched the same message in between.
#[derive(Clone)]
pub(crate) struct QueueEngine {
    name: String,
    ctx: Arc<EngineContext>,
}

impl QueueEngine {
    pub(crate) fn new(name: impl Into<String>, ctx: Arc<EngineContext>) -> Self {
        Self {
            name: name.into(),
            ctx,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn context(&self) -> &EngineContext {
        &self.ctx
    }

    fn storage(&self) -> &dyn Storage {
        self.ctx.storage.as_ref()
    }

    fn publish(&self, event: QueueEvent) {
        self.ctx.notifier.publish(event);
    }

    /// The stored config, or the defaults when none was set.
    pub(crate) fn load_config(&self) -> StorageResult<QueueConfig> {
        Ok(self.storage().get_queue(&self.name)?.unwrap_or_default())
    }

    fn ensure_enabled<E>(&self, op: QueueOperation) -> Result<(), E>
    where
        E: From<OperationDisabled> + From<StorageError>,
    {
        let key = keys::disabled_op_key(&self.name, op);
        if self.storage().get_state(&key)?.is_some() {
            return Err(OperationDisabled {
                queue: self.name.clone(),
                operation: op,
            }
            .into());
        }
        Ok(())
    }

    fn load(&self, msg_id: &str) -> StorageResult<Option<MessageRecord>> {
        self.storage()
            .get_message(&keys::message_key(&self.name, msg_id))
    }

    /// Read the current size counter.
    fn read_size(&self) -> StorageResult<u64> {
        let key = keys::size_counter_key(&self.name);
        match self.storage().get_state(&key)? {
            Some(raw) => {
                let count = keys::parse_counter_value(&raw).ok_or_else(|| {
                    StorageError::CorruptData(format!("size counter for queue {}", self.name))
                })?;
                Ok(count.max(0) as u64)
            }
            None => Ok(0),
        }
    }

    /// Try to replace `current` with `next`. Returns the committed record, or
    /// `None` when the stored revision no longer matches `current`.
    fn transition(
        &self,
        current: &MessageRecord,
        mut next: MessageRecord,
    ) -> StorageResult<Option<MessageRecord>> {
        next.revision = current.revision + 1;
        let mut ops = index_removals(current);
        ops.extend(record_puts(&next)?);
        if !self
            .storage()
            .write_batch_if(vec![revision_check(current)], ops)?
        {
            debug!(queue = %self.name, msg_id = %current.id, "transition lost to a concurrent update");
            return Ok(None);
        }
        debug!(queue = %self.name, msg_id = %next.id, from = ?current.state, to = ?next.state, "message transitioned");
        Ok(Some(next))
    }

    /// Delete `current` if it is unchanged since it was read.
    fn delete_record(&self, current: &MessageRecord) -> StorageResult<bool> {
        let mut ops = record_deletes(current);
        ops.push(size_delta(&current.queue, -1));
        self.storage()
            .write_batch_if(vec![revision_check(current)], ops)
    }

    /// Delete a message regardless of its state, re-reading it when another
    /// client updates it first. Returns the deleted record.
    fn delete_any_state(&self, msg_id: &str) -> StorageResult<Option<MessageRecord>> {
        loop {
            let Some(current) = self.load(msg_id)? else {
                return Ok(None);
            };
            if self.delete_record(&current)? {
                return Ok(Some(current));
            }
        }
    }

    /// Load the records an index scan pointed at, skipping entries whose
    /// message vanished between the scan and the read.
    fn load_entries(&self, index: Index, entries: Vec<crate::storage::IndexEntry>) -> StorageResult<Vec<MessageRecord>> {
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.load(&entry.msg_id)? {
                Some(record) => records.push(record),
                None => warn!(queue = %self.name, msg_id = %entry.msg_id, ?index, "index entry without message"),
            }
        }
        Ok(records)
    }
}

/// The index entries a record owns in its current state.
fn index_entries(record: &MessageRecord) -> Vec<(Index, Vec<u8>)> {
    let queue = record.queue.as_str();
    let id = record.id.as_str();
    let mut entries = Vec::with_capacity(2);
    match record.state {
        MessageState::Ready => entries.push((
            Index::Ready,
            keys::ready_key(queue, record.priority, record.enqueued_at, id),
        )),
        MessageState::Delayed => entries.push((
            Index::Delayed,
            keys::timed_key(queue, record.available_at, id),
        )),
        MessageState::Unacknowledged => entries.push((
            Index::Unacked,
            keys::timed_key(queue, record.visibility_deadline.unwrap_or(0), id),
        )),
        MessageState::Dead => {}
    }
    if let Some(expires_at) = record.expires_at {
        entries.push((Index::Expiry, keys::timed_key(queue, expires_at, id)));
    }
    entries
}

fn index_removals(record: &MessageRecord) -> Vec<WriteBatchOp> {
    index_entries(record)
        .into_iter()
        .map(|(index, key)| WriteBatchOp::DeleteIndex { index, key })
        .collect()
}

/// Ops writing `record` and its index entries.
fn record_puts(record: &MessageRecord) -> StorageResult<Vec<WriteBatchOp>> {
    let mut ops = vec![WriteBatchOp::PutMessage {
        key: keys::message_key(&record.queue, &record.id),
        value: serde_json::to_vec(record)?,
    }];
    ops.extend(
        index_entries(record)
            .into_iter()
            .map(|(index, key)| WriteBatchOp::PutIndex {
                index,
                key,
                msg_id: record.id.clone(),
            }),
    );
    Ok(ops)
}

/// Ops deleting `record` and its index entries.
fn record_deletes(record: &MessageRecord) -> Vec<WriteBatchOp> {
    let mut ops = vec![WriteBatchOp::DeleteMessage {
        key: keys::message_key(&record.queue, &record.id),
    }];
    ops.extend(index_removals(record));
    ops
}

fn revision_check(record: &MessageRecord) -> Precondition {
    Precondition::MessageRevision {
        key: keys::message_key(&record.queue, &record.id),
        expected: Some(record.revision),
    }
}

fn absent_check(queue: &str, msg_id: &str) -> Precondition {
    Precondition::MessageRevision {
        key: keys::message_key(queue, msg_id),
        expected: None,
    }
}

fn size_delta(queue: &str, delta: i64) -> WriteBatchOp {
    WriteBatchOp::IncrementCounter {
        key: keys::size_counter_key(queue),
        delta,
    }
}
