//! Key encoding for RocksDB column families.
//!
//! All numeric values use big-endian encoding for correct lexicographic ordering.
//! Composite keys use `:` (0x3A) as separator.
//! Variable-length strings are length-prefixed with a big-endian u32.

use crate::queue::QueueOperation;

const SEPARATOR: u8 = b':';

/// Encode a u64 as 8 big-endian bytes.
fn encode_u64(val: u64) -> [u8; 8] {
    val.to_be_bytes()
}

/// Encode a priority so that higher priorities sort first.
///
/// Flipping the sign bit maps i32 onto u32 preserving order; inverting the
/// result reverses it.
fn encode_priority(priority: i32) -> [u8; 4] {
    (!((priority as u32) ^ 0x8000_0000)).to_be_bytes()
}

/// Encode a variable-length string with a 4-byte big-endian length prefix.
///
/// The whole string is kept: two keys are equal only if their strings are.
fn encode_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    let mut buf = Vec::with_capacity(4 + bytes.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    buf
}

/// Prefix shared by every key that belongs to one queue.
pub fn queue_prefix(queue: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + queue.len() + 1);
    prefix.extend_from_slice(&encode_string(queue));
    prefix.push(SEPARATOR);
    prefix
}

/// Build a message key: `{queue}:{msg_id}`
pub fn message_key(queue: &str, msg_id: &str) -> Vec<u8> {
    let mut key = queue_prefix(queue);
    key.extend_from_slice(&encode_string(msg_id));
    key
}

/// Build a ready index key: `{queue}:{inverted_priority}:{enqueued_at_ns}:{msg_id}`
///
/// Iterating a queue's prefix yields messages in poll order: highest priority
/// first, then oldest enqueue time, then id.
pub fn ready_key(queue: &str, priority: i32, enqueued_at_ns: u64, msg_id: &str) -> Vec<u8> {
    let mut key = queue_prefix(queue);
    key.extend_from_slice(&encode_priority(priority));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_u64(enqueued_at_ns));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_string(msg_id));
    key
}

/// Build a timestamp-ordered index key: `{queue}:{ts_ns}:{msg_id}`
///
/// Used by the delayed (`available_at`), unacked (`visibility_deadline`) and
/// expiry (`expires_at`) indexes.
pub fn timed_key(queue: &str, ts_ns: u64, msg_id: &str) -> Vec<u8> {
    let mut key = queue_prefix(queue);
    key.extend_from_slice(&encode_u64(ts_ns));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_string(msg_id));
    key
}

/// Upper bound covering every timed key of `queue` with a timestamp <= `now_ns`.
///
/// The timestamp is followed by `:` (0x3A) in real keys, so appending 0xFF sorts
/// after any key at exactly `now_ns` and before any key at `now_ns + 1`.
pub fn timed_upper_bound(queue: &str, now_ns: u64) -> Vec<u8> {
    let mut key = queue_prefix(queue);
    key.extend_from_slice(&encode_u64(now_ns));
    key.push(0xFF);
    key
}

/// Build a dedup key: `{queue}:{dedup_key}`
pub fn dedup_key(queue: &str, dedup: &str) -> Vec<u8> {
    let mut key = queue_prefix(queue);
    key.extend_from_slice(&encode_string(dedup));
    key
}

/// Encode a dedup entry value (expiry timestamp).
pub fn dedup_value(expires_at_ns: u64) -> Vec<u8> {
    encode_u64(expires_at_ns).to_vec()
}

/// Decode a dedup entry value.
pub fn parse_dedup_value(value: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Encode a counter stored in the state column family.
pub fn counter_value(val: i64) -> Vec<u8> {
    val.to_be_bytes().to_vec()
}

/// Decode a counter stored in the state column family.
pub fn parse_counter_value(value: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}

// --- State column family keys ---
//
// State keys embed the queue name with its length so that a queue named `a`
// never matches the prefix of a queue named `a:b`.

fn scoped(kind: &str, queue: &str) -> String {
    format!("{kind}:{}:{queue}:", queue.len())
}

/// Counter of ready + delayed + unacknowledged messages.
pub fn size_counter_key(queue: &str) -> String {
    format!("{}size", scoped("queue", queue))
}

/// Marker present while `op` is disabled on `queue`.
pub fn disabled_op_key(queue: &str, op: QueueOperation) -> String {
    format!("{}{op}", disabled_op_prefix(queue))
}

pub fn disabled_op_prefix(queue: &str) -> String {
    scoped("disabled_op", queue)
}

/// Back-reference from a dead-letter queue to a queue that routes into it.
pub fn dlq_source_key(dlq: &str, source: &str) -> String {
    format!("{}{source}", dlq_source_prefix(dlq))
}

pub fn dlq_source_prefix(dlq: &str) -> String {
    scoped("dlq_source", dlq)
}
