use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::InvalidName;

/// Longest accepted producer-supplied message id, in bytes.
pub const MAX_MESSAGE_ID_LEN: usize = 1024;

/// Lifecycle state of a message within its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Ready,
    Delayed,
    Unacknowledged,
    /// Exhausted its deliveries. Dead messages are never stored in their source
    /// queue; the state is only reported on the message handed back to callers.
    Dead,
}

/// Stored representation of a message. The payload is already encoded by the
/// caller's codec and treated as opaque bytes.
///
/// All timestamps are nanoseconds since the unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub queue: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, Value>,
    pub state: MessageState,
    pub priority: i32,
    pub delivery_count: u32,
    pub enqueued_at: u64,
    pub available_at: u64,
    pub visibility_deadline: Option<u64>,
    pub expires_at: Option<u64>,
    pub dedup_key: Option<String>,
    /// Overrides the queue's delivery limit for this message.
    pub delivery_limit: Option<u32>,
    /// Bumped on every write; compare-and-transition checks it.
    pub revision: u64,
}

impl MessageRecord {
    /// Generate a new UUIDv7 message ID.
    pub fn new_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Check a producer-supplied id before it becomes part of a storage key.
    pub fn validate_id(id: &str) -> Result<(), InvalidName> {
        if id.is_empty() {
            return Err(InvalidName::Empty);
        }
        if id.len() > MAX_MESSAGE_ID_LEN {
            return Err(InvalidName::TooLong {
                len: id.len(),
                max: MAX_MESSAGE_ID_LEN,
            });
        }
        Ok(())
    }

    pub fn is_expired(&self, now_ns: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ns)
    }

    /// Delivery limit in effect, given the queue default. Zero means unlimited.
    pub fn effective_delivery_limit(&self, queue_default: u32) -> u32 {
        self.delivery_limit.unwrap_or(queue_default)
    }
}

/// A decoded message as handed to producers and consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<V> {
    pub id: String,
    pub value: V,
    pub headers: HashMap<String, Value>,
    pub state: MessageState,
    pub priority: i32,
    pub delivery_count: u32,
    pub enqueued_at: u64,
    pub available_at: u64,
    pub visibility_deadline: Option<u64>,
    pub expires_at: Option<u64>,
    pub dedup_key: Option<String>,
}

impl<V> Message<V> {
    pub(crate) fn from_record(record: MessageRecord, value: V) -> Self {
        Self {
            id: record.id,
            value,
            headers: record.headers,
            state: record.state,
            priority: record.priority,
            delivery_count: record.delivery_count,
            enqueued_at: record.enqueued_at,
            available_at: record.available_at,
            visibility_deadline: record.visibility_deadline,
            expires_at: record.expires_at,
            dedup_key: record.dedup_key,
        }
    }
}

/// Wall-clock time in nanoseconds. All clients compare deadlines against this
/// clock, so hosts sharing a queue are expected to be time-synchronized.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Convert a millisecond duration to nanoseconds without overflow.
pub(crate) fn ms_to_ns(ms: u64) -> u64 {
    ms.saturating_mul(1_000_000)
}
