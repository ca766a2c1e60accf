use std::thread;

use super::*;

use crate::engine::events::{EventDetail, EventKind, NackReason, RemovalReason};
use crate::error::ClientError;
use crate::message::now_ns;

/// What one reaper pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    /// DELAYED messages that became READY.
    pub promoted: u64,
    /// UNACKNOWLEDGED messages returned to READY after their visibility timeout.
    pub reclaimed: u64,
    /// Timed-out messages that had exhausted their deliveries.
    pub dead_lettered: u64,
    /// Messages removed because their TTL elapsed.
    pub expired: u64,
    /// Dedup entries past their window.
    pub dedup_pruned: u64,
}

impl QueueEngine {
    /// Run one reaper pass at `now`: promote due delayed messages, expire
    /// messages past their TTL, reclaim messages whose visibility deadline
    /// elapsed and prune stale dedup entries.
    ///
    /// Every step is a conditional transition, so reapers of several clients
    /// can run over the same queue; each message is handled by exactly one.
    pub(crate) fn reap(&self, now: u64) -> StorageResult<ReapStats> {
        let batch = self.ctx.config.reaper.batch_size.max(1);
        let mut stats = ReapStats {
            promoted: self.promote_due(now, batch)?,
            ..Default::default()
        };
        stats.expired = self.expire_due(now, batch)?;
        let (reclaimed, dead_lettered) = self.reclaim_expired(now, batch)?;
        stats.reclaimed = reclaimed;
        stats.dead_lettered = dead_lettered;
        stats.dedup_pruned = self.prune_dedup(now, batch)?;

        if stats != ReapStats::default() {
            debug!(queue = %self.name, ?stats, "reaper pass");
        }
        Ok(stats)
    }

    /// Move DELAYED messages whose `available_at` passed to READY.
    pub(super) fn promote_due(&self, now: u64, batch: usize) -> StorageResult<u64> {
        let entries = self.storage().scan_index(
            Index::Delayed,
            &keys::queue_prefix(&self.name),
            Some(&keys::timed_upper_bound(&self.name, now)),
            batch,
        )?;
        let mut promoted = 0;
        for current in self.load_entries(Index::Delayed, entries)? {
            if current.state != MessageState::Delayed || current.available_at > now {
                continue;
            }
            let mut next = current.clone();
            next.state = MessageState::Ready;
            if self.transition(&current, next)?.is_some() {
                promoted += 1;
            }
        }
        if promoted > 0 {
            self.ctx.wakers.wake(&self.name);
        }
        Ok(promoted)
    }

    /// Remove messages whose TTL elapsed, whatever their state.
    fn expire_due(&self, now: u64, batch: usize) -> StorageResult<u64> {
        let entries = self.storage().scan_index(
            Index::Expiry,
            &keys::queue_prefix(&self.name),
            Some(&keys::timed_upper_bound(&self.name, now)),
            batch,
        )?;
        let mut expired = Vec::new();
        for current in self.load_entries(Index::Expiry, entries)? {
            if current.is_expired(now) && self.delete_record(&current)? {
                expired.push(current.id);
            }
        }
        let count = expired.len() as u64;
        if count > 0 {
            self.report_expired(expired);
        }
        Ok(count)
    }

    pub(super) fn report_expired(&self, expired: Vec<String>) {
        self.ctx
            .metrics
            .record_expired(&self.name, expired.len() as u64);
        debug!(queue = %self.name, count = expired.len(), "messages expired");
        self.publish(
            QueueEvent::new(EventKind::Removed, &self.name, expired)
                .with_detail(EventDetail::Removed(RemovalReason::Expired)),
        );
    }

    /// Return timed-out UNACKNOWLEDGED messages to READY, or dead-letter them
    /// when their deliveries are exhausted. Returns (reclaimed, dead-lettered).
    fn reclaim_expired(&self, now: u64, batch: usize) -> StorageResult<(u64, u64)> {
        let entries = self.storage().scan_index(
            Index::Unacked,
            &keys::queue_prefix(&self.name),
            Some(&keys::timed_upper_bound(&self.name, now)),
            batch,
        )?;
        if entries.is_empty() {
            return Ok((0, 0));
        }

        let config = self.load_config()?;
        let mut reclaimed = 0;
        let mut dead_lettered = 0;
        for current in self.load_entries(Index::Unacked, entries)? {
            // An ack, nack or another reaper may have handled it since the scan.
            let due = current.state == MessageState::Unacknowledged
                && current.visibility_deadline.is_some_and(|deadline| deadline <= now);
            if !due {
                continue;
            }

            let exhausted = super::ack::delivery_exhausted(&current, &config);
            let outcome = if exhausted {
                self.dead_letter(&current, &config, now)?
            } else {
                self.redeliver(&current, now, 0)?
            };
            let Some(outcome) = outcome else {
                continue;
            };
            if exhausted {
                dead_lettered += 1;
            } else {
                reclaimed += 1;
                self.ctx.metrics.record_reclaimed(&self.name);
            }
            debug!(queue = %self.name, msg_id = %current.id, delivery_count = current.delivery_count, ?outcome, "visibility timeout elapsed");
            self.report_nack(&current.id, NackReason::VisibilityTimeout, outcome);
        }
        Ok((reclaimed, dead_lettered))
    }

    /// Delete dedup entries whose window closed.
    fn prune_dedup(&self, now: u64, batch: usize) -> StorageResult<u64> {
        let mut pruned = 0;
        for (key, value) in self
            .storage()
            .list_dedup(&keys::queue_prefix(&self.name))?
            .into_iter()
            .take(batch)
        {
            let Some(expires_at) = keys::parse_dedup_value(&value) else {
                warn!(queue = %self.name, "corrupt dedup entry, removing");
                self.storage()
                    .write_batch(vec![WriteBatchOp::DeleteDedup { key }])?;
                continue;
            };
            if expires_at > now {
                continue;
            }
            // A concurrent add may have refreshed the entry since it was listed.
            let applied = self.storage().write_batch_if(
                vec![Precondition::DedupVacant {
                    key: key.clone(),
                    now_ns: now,
                }],
                vec![WriteBatchOp::DeleteDedup { key }],
            )?;
            if applied {
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

/// Running reaper threads, one per queue name, shared by every handle of a
/// client. A reaper starts with the first handle for its queue and stops when
/// the last one is dropped.
pub(crate) struct ReaperRegistry {
    ctx: Arc<EngineContext>,
    reapers: Mutex<HashMap<String, ReaperEntry>>,
}

struct ReaperEntry {
    handles: usize,
    command_tx: crossbeam_channel::Sender<ReaperCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

enum ReaperCommand {
    Shutdown,
}

impl ReaperRegistry {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            reapers: Mutex::default(),
        }
    }

    /// Take a reference on the reaper of `queue`, starting it if needed.
    pub(crate) fn acquire(self: &Arc<Self>, queue: &str) -> Result<ReaperLease, ClientError> {
        let mut reapers = self.reapers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = reapers.get_mut(queue) {
            entry.handles += 1;
        } else {
            let entry = self.spawn(queue)?;
            reapers.insert(queue.to_string(), entry);
        }
        Ok(ReaperLease {
            registry: Arc::clone(self),
            queue: queue.to_string(),
        })
    }

    fn spawn(&self, queue: &str) -> Result<ReaperEntry, ClientError> {
        let (command_tx, command_rx) = crossbeam_channel::bounded::<ReaperCommand>(1);
        let engine = QueueEngine::new(queue, Arc::clone(&self.ctx));
        let interval = self.ctx.config.reaper.interval();

        let thread = thread::Builder::new()
            .name(format!("ferry-reaper-{queue}"))
            .spawn(move || run_reaper(engine, command_rx, interval))
            .map_err(|e| ClientError::ThreadSpawn(e.to_string()))?;

        info!(%queue, interval_ms = interval.as_millis() as u64, "reaper started");
        Ok(ReaperEntry {
            handles: 1,
            command_tx,
            thread: Some(thread),
        })
    }

    fn release(&self, queue: &str) {
        let entry = {
            let mut reapers = self.reapers.lock().unwrap_or_else(|p| p.into_inner());
            let Some(entry) = reapers.get_mut(queue) else {
                return;
            };
            entry.handles -= 1;
            if entry.handles > 0 {
                return;
            }
            // Under the registry lock so a concurrent acquire starts from a
            // fresh waker.
            self.ctx.wakers.remove(queue);
            reapers.remove(queue)
        };
        if let Some(entry) = entry {
            stop(queue, entry);
        }
    }

    /// Stop every reaper regardless of outstanding handles.
    pub(crate) fn shutdown_all(&self) {
        let entries: Vec<(String, ReaperEntry)> = {
            let mut reapers = self.reapers.lock().unwrap_or_else(|p| p.into_inner());
            reapers.drain().collect()
        };
        for (queue, entry) in entries {
            stop(&queue, entry);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self, queue: &str) -> bool {
        self.reapers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(queue)
    }
}

fn stop(queue: &str, mut entry: ReaperEntry) {
    let _ = entry.command_tx.send(ReaperCommand::Shutdown);
    if let Some(handle) = entry.thread.take() {
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
    info!(%queue, "reaper stopped");
}

fn run_reaper(
    engine: QueueEngine,
    command_rx: crossbeam_channel::Receiver<ReaperCommand>,
    interval: std::time::Duration,
) {
    loop {
        match command_rx.recv_timeout(interval) {
            Ok(ReaperCommand::Shutdown) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                break;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if let Err(e) = engine.reap(now_ns()) {
                    warn!(queue = %engine.name(), error = %e, "reaper pass failed");
                }
            }
        }
    }
}

/// Keeps the reaper of one queue alive while held.
pub(crate) struct ReaperLease {
    registry: Arc<ReaperRegistry>,
    queue: String,
}

impl Drop for ReaperLease {
    fn drop(&mut self) {
        self.registry.release(&self.queue);
    }
}
