use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InvalidConfig, InvalidName, UnknownOperation};

/// Longest accepted queue name, in bytes.
pub const MAX_QUEUE_NAME_LEN: usize = 255;

/// Check a queue name before it becomes part of a storage key.
pub fn validate_queue_name(name: &str) -> Result<(), InvalidName> {
    if name.is_empty() {
        return Err(InvalidName::Empty);
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(InvalidName::TooLong {
            len: name.len(),
            max: MAX_QUEUE_NAME_LEN,
        });
    }
    if name.chars().any(char::is_control) {
        return Err(InvalidName::ControlCharacters(name.to_string()));
    }
    Ok(())
}

/// Per-queue configuration stored in the `queues` column family.
///
/// A zero limit means "unbounded" / "disabled" for every numeric field except
/// `visibility_timeout_ms`, which must be positive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of ready + delayed + unacknowledged messages.
    pub size_limit: u64,
    /// Maximum encoded payload size in bytes.
    pub message_size_limit: u64,
    /// Expiration measured from creation.
    pub message_ttl_ms: u64,
    pub visibility_timeout_ms: u64,
    /// Deliveries allowed before a message is dead-lettered.
    pub delivery_limit: u32,
    pub dedup_window_ms: u64,
    pub dead_letter_queue: Option<String>,
}

impl QueueConfig {
    /// Default visibility timeout: 30 seconds.
    pub const DEFAULT_VISIBILITY_TIMEOUT_MS: u64 = 30_000;

    /// Default delivery limit before dead-lettering.
    pub const DEFAULT_DELIVERY_LIMIT: u32 = 10;

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn dedup_enabled(&self) -> bool {
        self.dedup_window_ms > 0
    }

    /// Check the config before it is stored for `queue`.
    pub fn validate(&self, queue: &str) -> Result<(), InvalidConfig> {
        if self.visibility_timeout_ms == 0 {
            return Err(InvalidConfig::ZeroVisibilityTimeout);
        }
        let Some(dlq) = self.dead_letter_queue.as_deref() else {
            return Ok(());
        };
        validate_queue_name(dlq).map_err(InvalidConfig::DeadLetterQueueName)?;
        if dlq == queue {
            return Err(InvalidConfig::SelfDeadLetter(queue.to_string()));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            size_limit: 0,
            message_size_limit: 0,
            message_ttl_ms: 0,
            visibility_timeout_ms: Self::DEFAULT_VISIBILITY_TIMEOUT_MS,
            delivery_limit: Self::DEFAULT_DELIVERY_LIMIT,
            dedup_window_ms: 0,
            dead_letter_queue: None,
        }
    }
}

/// Operations that can be disabled independently on a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOperation {
    Add,
    Poll,
    Ack,
    Nack,
    Remove,
    Move,
}

impl QueueOperation {
    pub const ALL: [QueueOperation; 6] = [
        QueueOperation::Add,
        QueueOperation::Poll,
        QueueOperation::Ack,
        QueueOperation::Nack,
        QueueOperation::Remove,
        QueueOperation::Move,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Add => "add",
            QueueOperation::Poll => "poll",
            QueueOperation::Ack => "ack",
            QueueOperation::Nack => "nack",
            QueueOperation::Remove => "remove",
            QueueOperation::Move => "move",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOperation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueOperation::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}
