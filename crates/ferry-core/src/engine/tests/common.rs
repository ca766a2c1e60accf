use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use opentelemetry::metrics::MeterProvider as _;

use crate::engine::metrics::test_harness::MetricTestHarness;
use crate::storage::IndexEntry;

/// A fixed base time for deterministic tests.
pub(super) const T0: u64 = 1_700_000_000_000_000_000;
pub(super) const SEC: u64 = 1_000_000_000;

pub(super) const VISIBILITY: Duration = Duration::from_secs(30);

pub(super) fn test_setup() -> (Arc<EngineContext>, tempfile::TempDir) {
    test_setup_with_config(ClientConfig::default())
}

pub(super) fn test_setup_with_config(
    config: ClientConfig,
) -> (Arc<EngineContext>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
    let ctx = EngineContext::new(storage, config, Arc::new(Metrics::new())).unwrap();
    (Arc::new(ctx), dir)
}

/// Context whose metrics report to an in-memory exporter.
pub(super) fn test_setup_with_metrics() -> (Arc<EngineContext>, MetricTestHarness, tempfile::TempDir)
{
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
    let harness = MetricTestHarness::new();
    let metrics = Metrics::from_meter(&harness.meter_provider.meter("ferry-engine-test"));
    let ctx = EngineContext::new(storage, ClientConfig::default(), Arc::new(metrics)).unwrap();
    (Arc::new(ctx), harness, dir)
}

/// Context over a store that can be told to fail a write.
pub(super) fn test_setup_with_failures() -> (Arc<EngineContext>, Arc<FailingStorage>, tempfile::TempDir)
{
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FailingStorage {
        inner: RocksDbStorage::open(dir.path()).unwrap(),
        countdown: AtomicUsize::new(0),
        failures: AtomicUsize::new(0),
    });
    let ctx = EngineContext::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        ClientConfig::default(),
        Arc::new(Metrics::new()),
    )
    .unwrap();
    (Arc::new(ctx), storage, dir)
}

/// RocksDB storage whose n-th write, once armed, fails without applying
/// anything, as a store that went away mid-operation would.
pub(super) struct FailingStorage {
    inner: RocksDbStorage,
    /// Writes left until the failing one; zero when disarmed.
    countdown: AtomicUsize,
    failures: AtomicUsize,
}

impl FailingStorage {
    /// Fail the `nth` write from now (1-based), conditional or not.
    pub(super) fn fail_write(&self, nth: usize) {
        self.countdown.store(nth, Ordering::SeqCst);
    }

    pub(super) fn disarm(&self) {
        self.countdown.store(0, Ordering::SeqCst);
    }

    /// How many writes were failed so far.
    pub(super) fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn tick(&self) -> StorageResult<()> {
        let previous = self
            .countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if previous == Ok(1) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::RocksDb("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl Storage for FailingStorage {
    fn get_message(&self, key: &[u8]) -> StorageResult<Option<MessageRecord>> {
        self.inner.get_message(key)
    }

    fn list_messages(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, MessageRecord)>> {
        self.inner.list_messages(prefix)
    }

    fn scan_index(
        &self,
        index: Index,
        prefix: &[u8],
        up_to: Option<&[u8]>,
        limit: usize,
    ) -> StorageResult<Vec<IndexEntry>> {
        self.inner.scan_index(index, prefix, up_to, limit)
    }

    fn count_index(&self, index: Index, prefix: &[u8]) -> StorageResult<u64> {
        self.inner.count_index(index, prefix)
    }

    fn get_dedup(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get_dedup(key)
    }

    fn list_dedup(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.list_dedup(prefix)
    }

    fn get_queue(&self, name: &str) -> StorageResult<Option<QueueConfig>> {
        self.inner.get_queue(name)
    }

    fn list_queues(&self) -> StorageResult<Vec<(String, QueueConfig)>> {
        self.inner.list_queues()
    }

    fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get_state(key)
    }

    fn list_state_by_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.inner.list_state_by_prefix(prefix)
    }

    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()> {
        self.tick()?;
        self.inner.write_batch(ops)
    }

    fn write_batch_if(
        &self,
        checks: Vec<Precondition>,
        ops: Vec<WriteBatchOp>,
    ) -> StorageResult<bool> {
        self.tick()?;
        self.inner.write_batch_if(checks, ops)
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.flush()
    }
}

/// A second client over the same store, as another process would have.
pub(super) fn second_context(ctx: &Arc<EngineContext>) -> Arc<EngineContext> {
    let ctx = EngineContext::new(
        Arc::clone(&ctx.storage),
        ClientConfig::default(),
        Arc::new(Metrics::new()),
    )
    .unwrap();
    Arc::new(ctx)
}

pub(super) fn queue(ctx: &Arc<EngineContext>, name: &str) -> QueueEngine {
    QueueEngine::new(name, Arc::clone(ctx))
}

pub(super) fn msg(payload: &str) -> NewMessage {
    NewMessage::new(payload.as_bytes().to_vec())
}

pub(super) fn add(q: &QueueEngine, payload: &str, now: u64) -> MessageRecord {
    q.add(msg(payload), now)
        .unwrap()
        .expect("message should be added")
}

pub(super) fn claim_one(q: &QueueEngine, now: u64) -> MessageRecord {
    q.claim(1, VISIBILITY, now)
        .unwrap()
        .pop()
        .expect("a message should be ready")
}

pub(super) fn payload(record: &MessageRecord) -> String {
    String::from_utf8(record.payload.clone()).unwrap()
}

pub(super) fn configure(q: &QueueEngine, config: QueueConfig) {
    q.set_config(config).unwrap();
}

/// Every stored message is in exactly one state index and counted once.
pub(super) fn assert_state_exclusive(q: &QueueEngine) {
    let prefix = keys::queue_prefix(q.name());
    let storage = q.context().storage.as_ref();
    let stored = storage.list_messages(&prefix).unwrap();
    let ready = storage.count_index(Index::Ready, &prefix).unwrap();
    let delayed = storage.count_index(Index::Delayed, &prefix).unwrap();
    let unacked = storage.count_index(Index::Unacked, &prefix).unwrap();

    assert_eq!(ready + delayed + unacked, stored.len() as u64);
    assert_eq!(q.size().unwrap(), stored.len() as u64);
    for (_, record) in &stored {
        let expected = [
            (Index::Ready, record.state == MessageState::Ready),
            (Index::Delayed, record.state == MessageState::Delayed),
            (Index::Unacked, record.state == MessageState::Unacknowledged),
        ];
        for (index, present) in expected {
            let found = storage
                .scan_index(index, &prefix, None, usize::MAX)
                .unwrap()
                .iter()
                .any(|entry| entry.msg_id == record.id);
            assert_eq!(found, present, "{index:?} entry for {} in state {:?}", record.id, record.state);
        }
    }
}

/// Record every event published for `queue`.
pub(super) fn record_events(ctx: &Arc<EngineContext>, queue: &str) -> Arc<Mutex<Vec<QueueEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    ctx.notifier.add_listener(queue, &[], move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    events
}

pub(super) fn wait_for(predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
