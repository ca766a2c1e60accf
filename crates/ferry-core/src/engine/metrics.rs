use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

/// OTel counters for queue operations. Created once per client and shared by
/// every queue handle, the reaper threads and the event dispatcher.
pub struct Metrics {
    pub messages_added: Counter<u64>,
    pub adds_suppressed: Counter<u64>,
    pub messages_polled: Counter<u64>,
    pub messages_acked: Counter<u64>,
    pub messages_nacked: Counter<u64>,
    pub messages_dead_lettered: Counter<u64>,
    pub messages_reclaimed: Counter<u64>,
    pub messages_expired: Counter<u64>,
    pub messages_moved: Counter<u64>,
    pub messages_removed: Counter<u64>,
    pub listener_failures: Counter<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn queue_attr(queue: &str) -> KeyValue {
    KeyValue::new("queue", queue.to_string())
}

impl Metrics {
    /// Create metrics from the global meter provider. Without a configured
    /// provider the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("ferry");
        Self::from_meter(&meter)
    }

    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            messages_added: meter
                .u64_counter("ferry.messages.added")
                .with_description("Messages accepted by add")
                .build(),
            adds_suppressed: meter
                .u64_counter("ferry.messages.suppressed")
                .with_description("Adds that produced no message, by reason")
                .build(),
            messages_polled: meter
                .u64_counter("ferry.messages.polled")
                .with_description("Messages handed to consumers")
                .build(),
            messages_acked: meter
                .u64_counter("ferry.messages.acked")
                .with_description("Messages acknowledged")
                .build(),
            messages_nacked: meter
                .u64_counter("ferry.messages.nacked")
                .with_description("Messages negatively acknowledged, by outcome")
                .build(),
            messages_dead_lettered: meter
                .u64_counter("ferry.messages.dead_lettered")
                .with_description("Messages routed to a dead-letter queue or discarded")
                .build(),
            messages_reclaimed: meter
                .u64_counter("ferry.messages.reclaimed")
                .with_description("Unacknowledged messages reclaimed after their visibility timeout")
                .build(),
            messages_expired: meter
                .u64_counter("ferry.messages.expired")
                .with_description("Messages removed after their TTL elapsed")
                .build(),
            messages_moved: meter
                .u64_counter("ferry.messages.moved")
                .with_description("Messages moved out of a queue")
                .build(),
            messages_removed: meter
                .u64_counter("ferry.messages.removed")
                .with_description("Messages removed by request or clear")
                .build(),
            listener_failures: meter
                .u64_counter("ferry.events.listener_failures")
                .with_description("Listener errors, panics and dropped events")
                .build(),
        }
    }

    pub fn record_added(&self, queue: &str) {
        self.messages_added.add(1, &[queue_attr(queue)]);
    }

    pub fn record_suppressed(&self, queue: &str, reason: &'static str) {
        self.adds_suppressed
            .add(1, &[queue_attr(queue), KeyValue::new("reason", reason)]);
    }

    pub fn record_polled(&self, queue: &str, count: u64) {
        if count > 0 {
            self.messages_polled.add(count, &[queue_attr(queue)]);
        }
    }

    pub fn record_acked(&self, queue: &str, count: u64) {
        if count > 0 {
            self.messages_acked.add(count, &[queue_attr(queue)]);
        }
    }

    pub fn record_nacked(&self, queue: &str, outcome: &'static str) {
        self.messages_nacked
            .add(1, &[queue_attr(queue), KeyValue::new("outcome", outcome)]);
    }

    pub fn record_dead_lettered(&self, queue: &str) {
        self.messages_dead_lettered.add(1, &[queue_attr(queue)]);
    }

    pub fn record_reclaimed(&self, queue: &str) {
        self.messages_reclaimed.add(1, &[queue_attr(queue)]);
    }

    pub fn record_expired(&self, queue: &str, count: u64) {
        if count > 0 {
            self.messages_expired.add(count, &[queue_attr(queue)]);
        }
    }

    pub fn record_moved(&self, queue: &str, count: u64) {
        if count > 0 {
            self.messages_moved.add(count, &[queue_attr(queue)]);
        }
    }

    pub fn record_removed(&self, queue: &str, count: u64) {
        if count > 0 {
            self.messages_removed.add(count, &[queue_attr(queue)]);
        }
    }

    pub fn record_listener_failure(&self, queue: &str) {
        self.listener_failures.add(1, &[queue_attr(queue)]);
    }
}
