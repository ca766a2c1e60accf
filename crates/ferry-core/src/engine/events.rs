use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::thread;

use tracing::{debug, warn};

use crate::engine::metrics::Metrics;
use crate::error::ClientError;
use crate::queue::{QueueConfig, QueueOperation};

/// Outcome reported by a listener. Errors are logged and counted, never
/// propagated to the operation that produced the event.
pub type ListenerResult = Result<(), String>;

type Listener = Arc<dyn Fn(&QueueEvent) -> ListenerResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Polled,
    Acknowledged,
    NegativelyAcknowledged,
    Removed,
    ConfigChanged,
    OperationDisabled,
    OperationEnabled,
    /// An add was rejected because the queue reached its size limit.
    Full,
}

/// Why a message came back from a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    Failed,
    Rejected,
    /// Raised by the reaper when the visibility deadline elapsed.
    VisibilityTimeout,
}

/// Where a negatively acknowledged message went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    Delayed { available_at: u64 },
    DeadLettered { dead_letter_queue: String },
    /// Dead-lettered without a configured dead-letter queue.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    Requested,
    Cleared,
    Expired,
    Moved { destination: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventDetail {
    None,
    Nack {
        reason: NackReason,
        outcome: NackOutcome,
    },
    Removed(RemovalReason),
    Operation(QueueOperation),
    Config(Box<QueueConfig>),
}

/// A lifecycle event for one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEvent {
    pub kind: EventKind,
    pub queue: String,
    pub message_ids: Vec<String>,
    pub detail: EventDetail,
}

impl QueueEvent {
    pub fn new(kind: EventKind, queue: &str, message_ids: Vec<String>) -> Self {
        Self {
            kind,
            queue: queue.to_string(),
            message_ids,
            detail: EventDetail::None,
        }
    }

    pub fn with_detail(mut self, detail: EventDetail) -> Self {
        self.detail = detail;
        self
    }
}

struct ListenerEntry {
    id: String,
    kinds: HashSet<EventKind>,
    callback: Listener,
}

impl ListenerEntry {
    fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

type ListenerMap = RwLock<HashMap<String, Vec<ListenerEntry>>>;

/// Dispatches events to listeners on a dedicated thread.
///
/// Events are queued after the transition that produced them committed and are
/// delivered in publish order, so listeners of one queue observe transitions in
/// the order this process committed them.
pub struct EventNotifier {
    tx: Option<crossbeam_channel::Sender<QueueEvent>>,
    listeners: Arc<ListenerMap>,
    dispatcher: Option<thread::JoinHandle<()>>,
    metrics: Arc<Metrics>,
}

impl EventNotifier {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Result<Self, ClientError> {
        let (tx, rx) = crossbeam_channel::bounded::<QueueEvent>(capacity.max(1));
        let listeners: Arc<ListenerMap> = Arc::default();

        let dispatch_listeners = Arc::clone(&listeners);
        let dispatch_metrics = Arc::clone(&metrics);
        let dispatcher = thread::Builder::new()
            .name("ferry-events".to_string())
            .spawn(move || {
                // Exits once every sender is dropped.
                for event in rx {
                    dispatch(&dispatch_listeners, &dispatch_metrics, &event);
                }
            })
            .map_err(|e| ClientError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            tx: Some(tx),
            listeners,
            dispatcher: Some(dispatcher),
            metrics,
        })
    }

    /// Register a listener for `queue`. An empty `kinds` slice subscribes to
    /// every event kind. Returns the listener id.
    pub fn add_listener<F>(&self, queue: &str, kinds: &[EventKind], callback: F) -> String
    where
        F: Fn(&QueueEvent) -> ListenerResult + Send + Sync + 'static,
    {
        let id = uuid::Uuid::new_v4().to_string();
        let entry = ListenerEntry {
            id: id.clone(),
            kinds: kinds.iter().copied().collect(),
            callback: Arc::new(callback),
        };
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(queue.to_string())
            .or_default()
            .push(entry);
        debug!(%queue, listener_id = %id, "listener registered");
        id
    }

    /// Remove a listener. Returns whether it was registered on `queue`.
    pub fn remove_listener(&self, queue: &str, id: &str) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(entries) = listeners.get_mut(queue) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(queue);
        }
        removed
    }

    /// Queue an event for dispatch. Never blocks: when the dispatcher is
    /// saturated the event is dropped and counted as a listener failure.
    pub fn publish(&self, event: QueueEvent) {
        if !self.has_listeners(&event.queue) {
            return;
        }
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            let event = e.into_inner();
            warn!(queue = %event.queue, kind = ?event.kind, "event channel full, dropping event");
            self.metrics.record_listener_failure(&event.queue);
        }
    }

    fn has_listeners(&self, queue: &str) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(queue)
            .is_some_and(|entries| !entries.is_empty())
    }
}

impl Drop for EventNotifier {
    fn drop(&mut self) {
        // Closing the channel lets the dispatcher drain what is queued and exit.
        self.tx.take();
        if let Some(handle) = self.dispatcher.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn dispatch(listeners: &ListenerMap, metrics: &Metrics, event: &QueueEvent) {
    let targets: Vec<(String, Listener)> = {
        let listeners = listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match listeners.get(&event.queue) {
            Some(entries) => entries
                .iter()
                .filter(|entry| entry.accepts(event.kind))
                .map(|entry| (entry.id.clone(), Arc::clone(&entry.callback)))
                .collect(),
            None => return,
        }
    };

    for (listener_id, callback) in targets {
        match catch_unwind(AssertUnwindSafe(|| callback(event))) {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                warn!(queue = %event.queue, %listener_id, kind = ?event.kind, error = %message, "listener failed");
                metrics.record_listener_failure(&event.queue);
            }
            Err(_) => {
                warn!(queue = %event.queue, %listener_id, kind = ?event.kind, "listener panicked");
                metrics.record_listener_failure(&event.queue);
            }
        }
    }
}
