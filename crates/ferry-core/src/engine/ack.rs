use super::*;

use crate::engine::args::{NackArgs, NackMode};
use crate::engine::events::{EventDetail, EventKind, NackOutcome, NackReason};
use crate::error::{AckError, NackError};

impl QueueEngine {
    /// Acknowledge messages, deleting every one that is currently
    /// UNACKNOWLEDGED. Unknown ids and messages in other states are skipped.
    /// Returns the number acknowledged.
    pub(crate) fn acknowledge(&self, ids: &[String]) -> Result<usize, AckError> {
        self.ensure_enabled::<AckError>(QueueOperation::Ack)?;

        let mut acked = Vec::new();
        for id in ids {
            let Some(current) = self.load(id)? else {
                continue;
            };
            if current.state != MessageState::Unacknowledged {
                debug!(queue = %self.name, msg_id = %id, state = ?current.state, "ack ignored, message not unacknowledged");
                continue;
            }
            if self.delete_record(&current)? {
                acked.push(current.id);
            }
        }

        if !acked.is_empty() {
            debug!(queue = %self.name, count = acked.len(), "messages acknowledged");
            self.ctx
                .metrics
                .record_acked(&self.name, acked.len() as u64);
            let count = acked.len();
            self.publish(QueueEvent::new(EventKind::Acknowledged, &self.name, acked));
            return Ok(count);
        }
        Ok(0)
    }

    /// Hand messages back. `Failed` redelivers after the delay until the
    /// delivery limit is reached; `Rejected` dead-letters at once. Ids that are
    /// not UNACKNOWLEDGED are skipped. Returns the number handled.
    pub(crate) fn negative_acknowledge(&self, args: &NackArgs, now: u64) -> Result<usize, NackError> {
        self.ensure_enabled::<NackError>(QueueOperation::Nack)?;
        let config = self.load_config()?;
        let reason = match args.mode {
            NackMode::Failed { .. } => NackReason::Failed,
            NackMode::Rejected => NackReason::Rejected,
        };

        let mut handled = 0;
        for id in &args.ids {
            let Some(current) = self.load(id)? else {
                continue;
            };
            if current.state != MessageState::Unacknowledged {
                debug!(queue = %self.name, msg_id = %id, state = ?current.state, "nack ignored, message not unacknowledged");
                continue;
            }

            let outcome = match args.mode {
                NackMode::Failed { delay } if !delivery_exhausted(&current, &config) => {
                    let delay_ns = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
                    self.redeliver(&current, now, delay_ns)?
                }
                _ => self.dead_letter(&current, &config, now)?,
            };
            if let Some(outcome) = outcome {
                handled += 1;
                self.report_nack(&current.id, reason, outcome);
            }
        }
        Ok(handled)
    }

    /// Return an UNACKNOWLEDGED message to READY, or to DELAYED when
    /// `delay_ns` is positive. The delivery count is left as it is.
    pub(super) fn redeliver(
        &self,
        current: &MessageRecord,
        now: u64,
        delay_ns: u64,
    ) -> StorageResult<Option<NackOutcome>> {
        let mut next = current.clone();
        next.visibility_deadline = None;
        let outcome = if delay_ns > 0 {
            next.state = MessageState::Delayed;
            next.available_at = now.saturating_add(delay_ns);
            NackOutcome::Delayed {
                available_at: next.available_at,
            }
        } else {
            next.state = MessageState::Ready;
            next.available_at = now;
            NackOutcome::Requeued
        };
        if self.transition(current, next)?.is_none() {
            return Ok(None);
        }
        if outcome == NackOutcome::Requeued {
            self.ctx.wakers.wake(&self.name);
        }
        Ok(Some(outcome))
    }

    /// Take a message out of this queue for good. With a dead-letter queue
    /// configured it is re-added there as READY with a fresh delivery count,
    /// ignoring the dead-letter queue's size limit; otherwise it is discarded.
    pub(super) fn dead_letter(
        &self,
        current: &MessageRecord,
        config: &QueueConfig,
        now: u64,
    ) -> StorageResult<Option<NackOutcome>> {
        let Some(dlq) = config.dead_letter_queue.as_deref() else {
            if !self.delete_record(current)? {
                return Ok(None);
            }
            warn!(queue = %self.name, msg_id = %current.id, "message exhausted its deliveries and no dead-letter queue is configured, discarding");
            self.ctx.metrics.record_dead_lettered(&self.name);
            return Ok(Some(NackOutcome::Discarded));
        };

        // Keep the id unless the dead-letter queue already holds one like it.
        let dlq_id = if self
            .storage()
            .get_message(&keys::message_key(dlq, &current.id))?
            .is_some()
        {
            MessageRecord::new_id()
        } else {
            current.id.clone()
        };
        let dead = MessageRecord {
            id: dlq_id,
            queue: dlq.to_string(),
            payload: current.payload.clone(),
            headers: current.headers.clone(),
            state: MessageState::Ready,
            priority: current.priority,
            delivery_count: 0,
            enqueued_at: now,
            available_at: now,
            visibility_deadline: None,
            expires_at: None,
            dedup_key: None,
            delivery_limit: None,
            revision: 0,
        };

        let checks = vec![revision_check(current), absent_check(dlq, &dead.id)];
        let mut ops = record_deletes(current);
        ops.push(size_delta(&self.name, -1));
        ops.extend(record_puts(&dead)?);
        ops.push(size_delta(dlq, 1));
        ops.push(WriteBatchOp::PutState {
            key: keys::dlq_source_key(dlq, &self.name),
            value: Vec::new(),
        });
        if !self.storage().write_batch_if(checks, ops)? {
            debug!(queue = %self.name, msg_id = %current.id, "dead-letter lost to a concurrent update");
            return Ok(None);
        }

        debug!(queue = %self.name, msg_id = %current.id, dead_letter_queue = %dlq, dlq_msg_id = %dead.id, "message dead-lettered");
        self.ctx.metrics.record_dead_lettered(&self.name);
        self.ctx.wakers.wake(dlq);
        self.publish(QueueEvent::new(EventKind::Added, dlq, vec![dead.id]));
        Ok(Some(NackOutcome::DeadLettered {
            dead_letter_queue: dlq.to_string(),
        }))
    }

    pub(super) fn report_nack(&self, msg_id: &str, reason: NackReason, outcome: NackOutcome) {
        let label = match &outcome {
            NackOutcome::Requeued => "requeued",
            NackOutcome::Delayed { .. } => "delayed",
            NackOutcome::DeadLettered { .. } => "dead_lettered",
            NackOutcome::Discarded => "discarded",
        };
        if reason != NackReason::VisibilityTimeout {
            self.ctx.metrics.record_nacked(&self.name, label);
        }
        self.publish(
            QueueEvent::new(
                EventKind::NegativelyAcknowledged,
                &self.name,
                vec![msg_id.to_string()],
            )
            .with_detail(EventDetail::Nack { reason, outcome }),
        );
    }
}

/// Whether the message used up its deliveries. A zero limit is unlimited.
pub(super) fn delivery_exhausted(record: &MessageRecord, config: &QueueConfig) -> bool {
    let limit = record.effective_delivery_limit(config.delivery_limit);
    limit > 0 && record.delivery_count >= limit
}
