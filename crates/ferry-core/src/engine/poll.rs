use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::*;

use crate::engine::args::PollArgs;
use crate::engine::events::EventKind;
use crate::error::PollError;
use crate::message::now_ns;

impl QueueEngine {
    /// Claim up to `max` READY messages in poll order, moving each to
    /// UNACKNOWLEDGED with a deadline of `now + visibility`.
    ///
    /// Due DELAYED messages are promoted first and expired messages met on the
    /// way are removed. Does not publish events; the caller reports what it
    /// finally hands out.
    pub(crate) fn claim(
        &self,
        max: usize,
        visibility: Duration,
        now: u64,
    ) -> Result<Vec<MessageRecord>, PollError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        self.promote_due(now, self.ctx.config.reaper.batch_size)?;

        let visibility_ns = u64::try_from(visibility.as_nanos()).unwrap_or(u64::MAX);
        let prefix = keys::queue_prefix(&self.name);
        let mut claimed = Vec::new();
        let mut attempted: HashSet<String> = HashSet::new();
        let mut expired = Vec::new();

        while claimed.len() < max {
            let limit = (max - claimed.len()) + attempted.len();
            let entries = self.storage().scan_index(Index::Ready, &prefix, None, limit)?;
            let exhausted = entries.len() < limit;
            let mut progressed = false;

            for entry in entries {
                if claimed.len() == max {
                    break;
                }
                if !attempted.insert(entry.msg_id.clone()) {
                    continue;
                }
                progressed = true;
                let Some(current) = self.load(&entry.msg_id)? else {
                    continue;
                };
                if current.state != MessageState::Ready {
                    continue;
                }
                if current.is_expired(now) {
                    if self.delete_record(&current)? {
                        expired.push(current.id);
                    }
                    continue;
                }

                let mut next = current.clone();
                next.state = MessageState::Unacknowledged;
                next.delivery_count = current.delivery_count.saturating_add(1);
                next.visibility_deadline = Some(now.saturating_add(visibility_ns));
                if let Some(committed) = self.transition(&current, next)? {
                    claimed.push(committed);
                }
            }

            if exhausted || !progressed {
                break;
            }
        }

        if !expired.is_empty() {
            self.report_expired(expired);
        }
        Ok(claimed)
    }

    /// Poll messages, waiting up to `args.wait` until `args.count` are held.
    ///
    /// Returns whatever was claimed when the count is reached or the wait
    /// elapses, possibly nothing. Dropping the future before it completes
    /// releases every message it had claimed.
    pub(crate) async fn poll(&self, args: PollArgs) -> Result<Vec<MessageRecord>, PollError> {
        self.ensure_enabled::<PollError>(QueueOperation::Poll)?;
        let config = self.load_config()?;
        let visibility = args.visibility.unwrap_or_else(|| config.visibility_timeout());
        let started = Instant::now();
        let waker = self.ctx.wakers.get(&self.name);
        let recheck = self.ctx.config.poll.recheck_interval();

        let mut guard = ClaimGuard::new(self);
        loop {
            // Registered before the store is read so an add racing with the
            // claim still wakes us.
            let notified = waker.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.drop_reclaimed(&mut guard.claimed)?;
            let batch = self.claim(args.count.saturating_sub(guard.claimed.len()), visibility, now_ns())?;
            guard.hold(batch);
            if guard.claimed.len() >= args.count || args.wait.is_zero() {
                break;
            }
            let remaining = args.wait.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(remaining.min(recheck)) => {}
            }
        }

        // A claim held past its deadline may have been reclaimed, and possibly
        // claimed again by someone else, while we waited.
        self.drop_reclaimed(&mut guard.claimed)?;
        let claimed = guard.disarm();
        if !claimed.is_empty() {
            self.ctx
                .metrics
                .record_polled(&self.name, claimed.len() as u64);
            self.publish(QueueEvent::new(
                EventKind::Polled,
                &self.name,
                claimed.iter().map(|record| record.id.clone()).collect(),
            ));
        }
        Ok(claimed)
    }

    /// Forget held claims whose stored record moved on since we claimed it.
    fn drop_reclaimed(&self, held: &mut Vec<MessageRecord>) -> StorageResult<()> {
        if held.is_empty() {
            return Ok(());
        }
        let mut kept = Vec::with_capacity(held.len());
        for record in held.drain(..) {
            match self.load(&record.id)? {
                Some(current) if current.revision == record.revision => kept.push(record),
                _ => debug!(queue = %self.name, msg_id = %record.id, "held claim was reclaimed"),
            }
        }
        *held = kept;
        Ok(())
    }

    /// Release claims that will not reach the caller. Failures are logged; the
    /// reaper returns those messages once their visibility timeout elapses.
    pub(crate) fn release_all(&self, claimed: &[MessageRecord]) {
        for record in claimed {
            if let Err(e) = self.release(record) {
                warn!(queue = %self.name, msg_id = %record.id, error = %e, "failed to release claimed message");
            }
        }
    }

    /// Undo a claim that was never handed out: back to READY with the delivery
    /// count restored. Skipped if the message changed since it was claimed.
    fn release(&self, claimed: &MessageRecord) -> StorageResult<bool> {
        let mut next = claimed.clone();
        next.state = MessageState::Ready;
        next.delivery_count = claimed.delivery_count.saturating_sub(1);
        next.visibility_deadline = None;
        let released = self.transition(claimed, next)?.is_some();
        if released {
            self.ctx.wakers.wake(&self.name);
        }
        Ok(released)
    }
}

/// Holds messages claimed by an in-flight poll and releases them if the poll
/// does not complete.
struct ClaimGuard<'a> {
    engine: &'a QueueEngine,
    claimed: Vec<MessageRecord>,
    armed: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(engine: &'a QueueEngine) -> Self {
        Self {
            engine,
            claimed: Vec::new(),
            armed: true,
        }
    }

    /// Add a claimed batch, replacing any older claim on the same message.
    fn hold(&mut self, batch: Vec<MessageRecord>) {
        for record in batch {
            match self.claimed.iter_mut().find(|held| held.id == record.id) {
                Some(held) => *held = record,
                None => self.claimed.push(record),
            }
        }
    }

    fn disarm(mut self) -> Vec<MessageRecord> {
        self.armed = false;
        std::mem::take(&mut self.claimed)
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || self.claimed.is_empty() {
            return;
        }
        debug!(queue = %self.engine.name, count = self.claimed.len(), "releasing messages of an abandoned poll");
        self.engine.release_all(&self.claimed);
    }
}
