use super::*;

use crate::engine::args::NewMessage;
use crate::engine::events::EventKind;
use crate::error::AddError;
use crate::message::ms_to_ns;

/// Conditional inserts are retried this many times when the reason for a
/// rejected batch disappears before it can be diagnosed.
const MAX_ADD_ATTEMPTS: usize = 8;

/// Why an add produced no message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suppressed {
    TooLarge,
    Duplicate,
    IdConflict,
    QueueFull,
}

impl Suppressed {
    fn as_str(self) -> &'static str {
        match self {
            Suppressed::TooLarge => "too_large",
            Suppressed::Duplicate => "duplicate",
            Suppressed::IdConflict => "id_conflict",
            Suppressed::QueueFull => "queue_full",
        }
    }
}

impl QueueEngine {
    /// Add one message. `Ok(None)` means the message was suppressed (too large,
    /// duplicate, id already present, or queue full), which is not an error.
    pub(crate) fn add(&self, msg: NewMessage, now: u64) -> Result<Option<MessageRecord>, AddError> {
        self.ensure_enabled::<AddError>(QueueOperation::Add)?;
        let config = self.load_config()?;
        self.insert_new(msg, &config, now)
    }

    /// Add several messages. Each entry is added on its own and gets its own
    /// result, `Ok(None)` for a suppressed message. A failed entry does not stop
    /// the ones after it.
    pub(crate) fn add_many(
        &self,
        msgs: Vec<NewMessage>,
        now: u64,
    ) -> Result<Vec<Result<Option<MessageRecord>, AddError>>, AddError> {
        self.ensure_enabled::<AddError>(QueueOperation::Add)?;
        let config = self.load_config()?;
        Ok(msgs
            .into_iter()
            .map(|msg| self.insert_new(msg, &config, now))
            .collect())
    }

    fn insert_new(
        &self,
        msg: NewMessage,
        config: &QueueConfig,
        now: u64,
    ) -> Result<Option<MessageRecord>, AddError> {
        if let Some(id) = msg.id.as_deref() {
            MessageRecord::validate_id(id).map_err(AddError::InvalidId)?;
        }
        if config.message_size_limit > 0 && msg.payload.len() as u64 > config.message_size_limit {
            return Ok(self.suppress(None, Suppressed::TooLarge));
        }

        let id = msg.id.unwrap_or_else(MessageRecord::new_id);
        let dedup_key = match msg.dedup {
            Some(mode) if config.dedup_enabled() => Some(mode.derive(&id, &msg.payload)),
            _ => None,
        };
        let delay_ns = u64::try_from(msg.delay.as_nanos()).unwrap_or(u64::MAX);
        let ttl_ns = match msg.ttl {
            Some(ttl) => u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX),
            None => ms_to_ns(config.message_ttl_ms),
        };

        let record = MessageRecord {
            id,
            queue: self.name.clone(),
            payload: msg.payload,
            headers: msg.headers,
            state: if delay_ns > 0 {
                MessageState::Delayed
            } else {
                MessageState::Ready
            },
            priority: msg.priority,
            delivery_count: 0,
            enqueued_at: now,
            available_at: now.saturating_add(delay_ns),
            visibility_deadline: None,
            expires_at: (ttl_ns > 0).then(|| now.saturating_add(ttl_ns)),
            dedup_key,
            delivery_limit: msg.delivery_limit,
            revision: 0,
        };

        let dedup_storage_key = record
            .dedup_key
            .as_deref()
            .map(|dedup| keys::dedup_key(&self.name, dedup));

        for _ in 0..MAX_ADD_ATTEMPTS {
            let mut checks = vec![absent_check(&self.name, &record.id)];
            if config.size_limit > 0 {
                checks.push(Precondition::CounterBelow {
                    key: keys::size_counter_key(&self.name),
                    limit: i64::try_from(config.size_limit).unwrap_or(i64::MAX),
                });
            }
            let mut ops = record_puts(&record)?;
            ops.push(size_delta(&self.name, 1));
            if let Some(key) = &dedup_storage_key {
                checks.push(Precondition::DedupVacant {
                    key: key.clone(),
                    now_ns: now,
                });
                ops.push(WriteBatchOp::PutDedup {
                    key: key.clone(),
                    value: keys::dedup_value(now.saturating_add(ms_to_ns(config.dedup_window_ms))),
                });
            }

            if self.storage().write_batch_if(checks, ops)? {
                debug!(queue = %self.name, msg_id = %record.id, state = ?record.state, "message added");
                self.ctx.metrics.record_added(&self.name);
                if record.state == MessageState::Ready {
                    self.ctx.wakers.wake(&self.name);
                }
                self.publish(QueueEvent::new(
                    EventKind::Added,
                    &self.name,
                    vec![record.id.clone()],
                ));
                return Ok(Some(record));
            }

            if let Some(reason) = self.diagnose_rejection(&record, dedup_storage_key.as_deref(), config, now)? {
                return Ok(self.suppress(Some(&record.id), reason));
            }
        }

        warn!(queue = %self.name, msg_id = %record.id, "add kept losing to concurrent writers");
        Ok(self.suppress(Some(&record.id), Suppressed::QueueFull))
    }

    /// Work out which precondition rejected an insert, checking in the order
    /// dedup, id, size. `None` when all of them hold again.
    fn diagnose_rejection(
        &self,
        record: &MessageRecord,
        dedup_key: Option<&[u8]>,
        config: &QueueConfig,
        now: u64,
    ) -> Result<Option<Suppressed>, AddError> {
        if let Some(key) = dedup_key {
            if let Some(raw) = self.storage().get_dedup(key)? {
                let expires_at = keys::parse_dedup_value(&raw)
                    .ok_or_else(|| StorageError::CorruptData("dedup entry".to_string()))?;
                if expires_at > now {
                    return Ok(Some(Suppressed::Duplicate));
                }
            }
        }
        if self.load(&record.id)?.is_some() {
            return Ok(Some(Suppressed::IdConflict));
        }
        if config.size_limit > 0 && self.read_size()? >= config.size_limit {
            return Ok(Some(Suppressed::QueueFull));
        }
        Ok(None)
    }

    fn suppress(&self, msg_id: Option<&str>, reason: Suppressed) -> Option<MessageRecord> {
        debug!(queue = %self.name, msg_id = msg_id.unwrap_or(""), reason = reason.as_str(), "add suppressed");
        self.ctx.metrics.record_suppressed(&self.name, reason.as_str());
        if reason == Suppressed::QueueFull {
            self.publish(QueueEvent::new(
                EventKind::Full,
                &self.name,
                msg_id.map(|id| vec![id.to_string()]).unwrap_or_default(),
            ));
        }
        None
    }
}
