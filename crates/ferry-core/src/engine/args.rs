use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// How the dedup key of a new message is derived. Dedup only applies when the
/// queue's `dedup_window_ms` is positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dedup {
    /// Use the message id.
    ById,
    /// Use the SHA-256 of the encoded payload.
    ByHash,
    /// Use a caller-supplied key.
    ByKey(String),
}

impl Dedup {
    pub(crate) fn derive(&self, msg_id: &str, payload: &[u8]) -> String {
        match self {
            Dedup::ById => format!("id:{msg_id}"),
            Dedup::ByHash => format!("hash:{:x}", Sha256::digest(payload)),
            Dedup::ByKey(key) => format!("key:{key}"),
        }
    }
}

/// Parameters for adding one message.
#[derive(Debug, Clone)]
pub struct AddArgs<V> {
    pub value: V,
    /// Producer-supplied id; generated when absent.
    pub id: Option<String>,
    pub headers: HashMap<String, Value>,
    pub priority: i32,
    pub delay: Duration,
    pub dedup: Option<Dedup>,
    /// Overrides the queue's message TTL.
    pub ttl: Option<Duration>,
    /// Overrides the queue's delivery limit.
    pub delivery_limit: Option<u32>,
}

impl<V> AddArgs<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            id: None,
            headers: HashMap::new(),
            priority: 0,
            delay: Duration::ZERO,
            dedup: None,
            ttl: None,
            delivery_limit: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn dedup(mut self, dedup: Dedup) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn delivery_limit(mut self, limit: u32) -> Self {
        self.delivery_limit = Some(limit);
        self
    }

    /// Swap the value for its encoded payload, handing the value back.
    pub(crate) fn into_parts(self, payload: Vec<u8>) -> (NewMessage, V) {
        let msg = NewMessage {
            id: self.id,
            payload,
            headers: self.headers,
            priority: self.priority,
            delay: self.delay,
            dedup: self.dedup,
            ttl: self.ttl,
            delivery_limit: self.delivery_limit,
        };
        (msg, self.value)
    }
}

/// An add request with the payload already encoded.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, Value>,
    pub priority: i32,
    pub delay: Duration,
    pub dedup: Option<Dedup>,
    pub ttl: Option<Duration>,
    pub delivery_limit: Option<u32>,
}

impl NewMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        AddArgs::new(()).into_parts(payload.into()).0
    }
}

/// Parameters for a poll.
#[derive(Debug, Clone)]
pub struct PollArgs {
    /// Maximum number of messages to return.
    pub count: usize,
    /// How long to wait for `count` messages. Zero returns immediately.
    pub wait: Duration,
    /// Overrides the queue's visibility timeout for the polled messages.
    pub visibility: Option<Duration>,
}

impl PollArgs {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            wait: Duration::ZERO,
            visibility: None,
        }
    }

    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn visibility(mut self, visibility: Duration) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

impl Default for PollArgs {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Why a consumer gives a message back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackMode {
    /// Processing failed; redeliver after `delay` unless the delivery limit is
    /// reached.
    Failed { delay: Duration },
    /// The message is unprocessable; dead-letter it immediately.
    Rejected,
}

/// Parameters for a negative acknowledgement.
#[derive(Debug, Clone)]
pub struct NackArgs {
    pub ids: Vec<String>,
    pub mode: NackMode,
}

impl NackArgs {
    pub fn failed<I, S>(ids: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            mode: NackMode::Failed { delay },
        }
    }

    pub fn rejected<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            mode: NackMode::Rejected,
        }
    }
}

/// Which messages a move takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveSelector {
    /// Specific messages, in any state.
    Ids(Vec<String>),
    /// The first `n` READY messages in poll order.
    Count(usize),
}

/// Parameters for moving messages to another queue.
#[derive(Debug, Clone)]
pub struct MoveArgs {
    pub destination: String,
    pub selector: MoveSelector,
}

impl MoveArgs {
    pub fn ids<I, S>(destination: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            destination: destination.into(),
            selector: MoveSelector::Ids(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn count(destination: impl Into<String>, count: usize) -> Self {
        Self {
            destination: destination.into(),
            selector: MoveSelector::Count(count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keys_are_namespaced_by_mode() {
        let by_id = Dedup::ById.derive("m1", b"x");
        let by_key = Dedup::ByKey("m1".to_string()).derive("other", b"x");
        assert_ne!(by_id, by_key);
    }

    #[test]
    fn hash_dedup_depends_only_on_payload() {
        let a = Dedup::ByHash.derive("m1", b"payload");
        let b = Dedup::ByHash.derive("m2", b"payload");
        let c = Dedup::ByHash.derive("m1", b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), "hash:".len() + 64);
    }

    #[test]
    fn add_args_builder_sets_fields() {
        let args = AddArgs::new("x")
            .id("order-1")
            .priority(5)
            .delay(Duration::from_secs(1))
            .header("tenant", "acme")
            .dedup(Dedup::ById);
        assert_eq!(args.id.as_deref(), Some("order-1"));
        assert_eq!(args.priority, 5);
        assert_eq!(args.headers["tenant"], Value::from("acme"));
        assert_eq!(args.dedup, Some(Dedup::ById));
    }
}
