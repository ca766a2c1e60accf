use super::*;

use crate::engine::args::{MoveArgs, MoveSelector};
use crate::engine::events::{EventDetail, EventKind, RemovalReason};
use crate::error::{ConfigError, MoveError, RemoveError};
use crate::message::ms_to_ns;
use crate::queue::validate_queue_name;

impl QueueEngine {
    // --- Remove / clear ---

    /// Delete messages in any state. Returns the number found and deleted.
    pub(crate) fn remove(&self, ids: &[String]) -> Result<usize, RemoveError> {
        self.ensure_enabled::<RemoveError>(QueueOperation::Remove)?;
        let mut removed = Vec::new();
        for id in ids {
            if let Some(record) = self.delete_any_state(id)? {
                removed.push(record.id);
            }
        }
        Ok(self.report_removed(removed, RemovalReason::Requested))
    }

    /// Delete every message of the queue. Returns whether anything was deleted.
    pub(crate) fn clear(&self) -> StorageResult<bool> {
        let prefix = keys::queue_prefix(&self.name);
        let mut removed = Vec::new();
        for (_, record) in self.storage().list_messages(&prefix)? {
            if let Some(record) = self.delete_any_state(&record.id)? {
                removed.push(record.id);
            }
        }
        Ok(self.report_removed(removed, RemovalReason::Cleared) > 0)
    }

    fn report_removed(&self, removed: Vec<String>, reason: RemovalReason) -> usize {
        let count = removed.len();
        if count > 0 {
            debug!(queue = %self.name, count, ?reason, "messages removed");
            self.ctx.metrics.record_removed(&self.name, count as u64);
            self.publish(
                QueueEvent::new(EventKind::Removed, &self.name, removed)
                    .with_detail(EventDetail::Removed(reason)),
            );
        }
        count
    }

    // --- Move ---

    /// Move messages to another queue as READY with a fresh delivery count.
    ///
    /// Each message is re-validated against the destination: its message
    /// size limit, size limit and dedup window, and that the id is free there.
    /// Messages failing validation stay where they are. Returns the number
    /// moved.
    pub(crate) fn move_messages(&self, args: &MoveArgs, now: u64) -> Result<usize, MoveError> {
        self.ensure_enabled::<MoveError>(QueueOperation::Move)?;
        let destination = args.destination.as_str();
        validate_queue_name(destination).map_err(MoveError::InvalidDestination)?;
        if destination == self.name {
            return Err(MoveError::SameQueue(self.name.clone()));
        }
        let dest_config = self
            .storage()
            .get_queue(destination)?
            .unwrap_or_default();

        let candidates = match &args.selector {
            MoveSelector::Ids(ids) => {
                let mut records = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(record) = self.load(id)? {
                        records.push(record);
                    }
                }
                records
            }
            MoveSelector::Count(count) => {
                let entries = self.storage().scan_index(
                    Index::Ready,
                    &keys::queue_prefix(&self.name),
                    None,
                    *count,
                )?;
                self.load_entries(Index::Ready, entries)?
            }
        };

        let mut moved = Vec::new();
        for record in candidates {
            if self.move_one(&record, destination, &dest_config, now)? {
                moved.push(record.id);
            }
        }

        if !moved.is_empty() {
            debug!(queue = %self.name, %destination, count = moved.len(), "messages moved");
            self.ctx.metrics.record_moved(&self.name, moved.len() as u64);
            self.ctx.wakers.wake(destination);
            self.publish(QueueEvent::new(EventKind::Added, destination, moved.clone()));
            self.publish(
                QueueEvent::new(EventKind::Removed, &self.name, moved.clone()).with_detail(
                    EventDetail::Removed(RemovalReason::Moved {
                        destination: destination.to_string(),
                    }),
                ),
            );
        }
        Ok(moved.len())
    }

    fn move_one(
        &self,
        current: &MessageRecord,
        destination: &str,
        dest_config: &QueueConfig,
        now: u64,
    ) -> StorageResult<bool> {
        if dest_config.message_size_limit > 0
            && current.payload.len() as u64 > dest_config.message_size_limit
        {
            debug!(queue = %self.name, msg_id = %current.id, %destination, "move skipped, message too large for destination");
            return Ok(false);
        }

        let dedup_key = current
            .dedup_key
            .clone()
            .filter(|_| dest_config.dedup_enabled());
        let moved = MessageRecord {
            queue: destination.to_string(),
            state: MessageState::Ready,
            delivery_count: 0,
            enqueued_at: now,
            available_at: now,
            visibility_deadline: None,
            dedup_key,
            revision: 0,
            ..current.clone()
        };

        let mut checks = vec![revision_check(current), absent_check(destination, &moved.id)];
        let mut ops = record_deletes(current);
        ops.push(size_delta(&self.name, -1));
        ops.extend(record_puts(&moved)?);
        ops.push(size_delta(destination, 1));
        if dest_config.size_limit > 0 {
            checks.push(Precondition::CounterBelow {
                key: keys::size_counter_key(destination),
                limit: i64::try_from(dest_config.size_limit).unwrap_or(i64::MAX),
            });
        }
        if let Some(dedup) = moved.dedup_key.as_deref() {
            let key = keys::dedup_key(destination, dedup);
            checks.push(Precondition::DedupVacant {
                key: key.clone(),
                now_ns: now,
            });
            ops.push(WriteBatchOp::PutDedup {
                key,
                value: keys::dedup_value(now.saturating_add(ms_to_ns(dest_config.dedup_window_ms))),
            });
        }

        let applied = self.storage().write_batch_if(checks, ops)?;
        if !applied {
            debug!(queue = %self.name, msg_id = %current.id, %destination, "move rejected by destination or lost to a concurrent update");
        }
        Ok(applied)
    }

    // --- Config ---

    /// Store `config`, replacing any existing one.
    ///
    /// The dead-letter back-references are derived from the config being
    /// replaced, so the write only applies while that config is still current.
    pub(crate) fn set_config(&self, config: QueueConfig) -> Result<(), ConfigError> {
        config.validate(&self.name)?;
        loop {
            let previous = self.storage().get_queue(&self.name)?;
            let ops = self.config_ops(previous.as_ref(), &config)?;
            let check = Precondition::QueueConfigIs {
                name: self.name.clone(),
                expected: previous,
            };
            if self.storage().write_batch_if(vec![check], ops)? {
                break;
            }
            debug!(queue = %self.name, "config changed concurrently, retrying");
        }
        self.report_config(config);
        Ok(())
    }

    /// Store `config` only if the queue has none yet. Returns whether it was
    /// stored; `false` is a normal outcome.
    pub(crate) fn set_config_if_absent(&self, config: QueueConfig) -> Result<bool, ConfigError> {
        config.validate(&self.name)?;
        let ops = self.config_ops(None, &config)?;
        let stored = self.storage().write_batch_if(
            vec![Precondition::QueueConfigIs {
                name: self.name.clone(),
                expected: None,
            }],
            ops,
        )?;
        if stored {
            self.report_config(config);
        } else {
            debug!(queue = %self.name, "config already present, keeping it");
        }
        Ok(stored)
    }

    /// The stored config, if one was set.
    pub(crate) fn stored_config(&self) -> StorageResult<Option<QueueConfig>> {
        self.storage().get_queue(&self.name)
    }

    fn config_ops(
        &self,
        previous: Option<&QueueConfig>,
        config: &QueueConfig,
    ) -> StorageResult<Vec<WriteBatchOp>> {
        let mut ops = vec![WriteBatchOp::PutQueue {
            name: self.name.clone(),
            value: serde_json::to_vec(config)?,
        }];
        let old_dlq = previous.and_then(|c| c.dead_letter_queue.as_deref());
        let new_dlq = config.dead_letter_queue.as_deref();
        if let Some(old) = old_dlq.filter(|old| Some(*old) != new_dlq) {
            ops.push(WriteBatchOp::DeleteState {
                key: keys::dlq_source_key(old, &self.name),
            });
        }
        if let Some(dlq) = new_dlq {
            ops.push(WriteBatchOp::PutState {
                key: keys::dlq_source_key(dlq, &self.name),
                value: Vec::new(),
            });
        }
        Ok(ops)
    }

    fn report_config(&self, config: QueueConfig) {
        info!(queue = %self.name, ?config, "queue config updated");
        self.publish(
            QueueEvent::new(EventKind::ConfigChanged, &self.name, Vec::new())
                .with_detail(EventDetail::Config(Box::new(config))),
        );
    }

    /// Names of the queues that route dead letters into this queue.
    pub(crate) fn dead_letter_queue_sources(&self) -> StorageResult<Vec<String>> {
        let prefix = keys::dlq_source_prefix(&self.name);
        Ok(self
            .storage()
            .list_state_by_prefix(&prefix)?
            .into_iter()
            .filter_map(|(key, _)| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    // --- Operation gating ---

    /// Disable `op`. Returns whether it was enabled before.
    pub(crate) fn disable_operation(&self, op: QueueOperation) -> StorageResult<bool> {
        if !self.is_operation_enabled(op)? {
            return Ok(false);
        }
        self.storage().write_batch(vec![WriteBatchOp::PutState {
            key: keys::disabled_op_key(&self.name, op),
            value: Vec::new(),
        }])?;
        info!(queue = %self.name, operation = %op, "operation disabled");
        self.publish(
            QueueEvent::new(EventKind::OperationDisabled, &self.name, Vec::new())
                .with_detail(EventDetail::Operation(op)),
        );
        Ok(true)
    }

    /// Enable `op`. Returns whether it was disabled before.
    pub(crate) fn enable_operation(&self, op: QueueOperation) -> StorageResult<bool> {
        if self.is_operation_enabled(op)? {
            return Ok(false);
        }
        self.storage().write_batch(vec![WriteBatchOp::DeleteState {
            key: keys::disabled_op_key(&self.name, op),
        }])?;
        info!(queue = %self.name, operation = %op, "operation enabled");
        self.publish(
            QueueEvent::new(EventKind::OperationEnabled, &self.name, Vec::new())
                .with_detail(EventDetail::Operation(op)),
        );
        Ok(true)
    }

    pub(crate) fn is_operation_enabled(&self, op: QueueOperation) -> StorageResult<bool> {
        Ok(self
            .storage()
            .get_state(&keys::disabled_op_key(&self.name, op))?
            .is_none())
    }

    pub(crate) fn disabled_operations(&self) -> StorageResult<Vec<QueueOperation>> {
        let prefix = keys::disabled_op_prefix(&self.name);
        let mut ops = Vec::new();
        for (key, _) in self.storage().list_state_by_prefix(&prefix)? {
            let Some(name) = key.strip_prefix(&prefix) else {
                continue;
            };
            match name.parse::<QueueOperation>() {
                Ok(op) => ops.push(op),
                Err(e) => warn!(queue = %self.name, error = %e, "ignoring unknown disabled operation"),
            }
        }
        ops.sort();
        Ok(ops)
    }

    // --- Reads ---

    /// READY + DELAYED + UNACKNOWLEDGED messages.
    pub(crate) fn size(&self) -> StorageResult<u64> {
        self.read_size()
    }

    pub(crate) fn count_delayed(&self) -> StorageResult<u64> {
        self.storage()
            .count_index(Index::Delayed, &keys::queue_prefix(&self.name))
    }

    pub(crate) fn count_unacknowledged(&self) -> StorageResult<u64> {
        self.storage()
            .count_index(Index::Unacked, &keys::queue_prefix(&self.name))
    }

    pub(crate) fn get(&self, id: &str) -> StorageResult<Option<MessageRecord>> {
        self.load(id)
    }

    /// Records for the ids that exist, in the order given.
    pub(crate) fn get_many(&self, ids: &[String]) -> StorageResult<Vec<MessageRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Number of the given ids present in the queue.
    pub(crate) fn contains_many(&self, ids: &[String]) -> StorageResult<usize> {
        let mut found = 0;
        for id in ids {
            if self.load(id)?.is_some() {
                found += 1;
            }
        }
        Ok(found)
    }

    /// READY messages in poll order.
    pub(crate) fn list_all(&self) -> StorageResult<Vec<MessageRecord>> {
        let entries = self.storage().scan_index(
            Index::Ready,
            &keys::queue_prefix(&self.name),
            None,
            usize::MAX,
        )?;
        self.load_entries(Index::Ready, entries)
    }
}
