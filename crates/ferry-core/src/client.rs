use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::codec::{Codec, JsonCodec};
use crate::engine::args::{AddArgs, MoveArgs, NackArgs, PollArgs};
use crate::engine::config::ClientConfig;
use crate::engine::events::{EventKind, ListenerResult, QueueEvent};
use crate::engine::metrics::Metrics;
use crate::engine::{EngineContext, QueueEngine, ReapStats, ReaperLease, ReaperRegistry};
use crate::error::{
    AckError, AddError, ClientError, ConfigError, MoveError, NackError, PollError, ReadError,
    RemoveError, StorageError,
};
use crate::message::{now_ns, Message, MessageRecord};
use crate::queue::{validate_queue_name, QueueConfig, QueueOperation};
use crate::storage::{RocksDbStorage, Storage};

/// Entry point: owns the shared engine context and the reaper threads, and
/// hands out typed queue handles.
pub struct QueueClient {
    ctx: Arc<EngineContext>,
    reapers: Arc<ReaperRegistry>,
}

impl QueueClient {
    /// Create a client over an existing store.
    pub fn new(storage: Arc<dyn Storage>, config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_metrics(storage, config, Arc::new(Metrics::new()))
    }

    /// Open the RocksDB store under `config.storage.data_dir` and create a
    /// client over it.
    pub fn open(config: ClientConfig) -> Result<Self, ClientError> {
        let storage = Arc::new(RocksDbStorage::open(&config.storage.data_dir)?);
        Self::new(storage, config)
    }

    pub(crate) fn with_metrics(
        storage: Arc<dyn Storage>,
        config: ClientConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ClientError> {
        let ctx = Arc::new(EngineContext::new(storage, config, metrics)?);
        let reapers = Arc::new(ReaperRegistry::new(Arc::clone(&ctx)));
        info!("queue client started");
        Ok(Self { ctx, reapers })
    }

    /// Open a handle on `name`. The first handle for a name starts its reaper.
    pub fn queue<V, C: Codec<V>>(
        &self,
        name: &str,
        codec: C,
    ) -> Result<ReliableQueue<V, C>, ClientError> {
        validate_queue_name(name)?;
        let lease = self.reapers.acquire(name)?;
        Ok(ReliableQueue {
            engine: QueueEngine::new(name, Arc::clone(&self.ctx)),
            codec: Arc::new(codec),
            _lease: Arc::new(lease),
            _value: PhantomData,
        })
    }

    /// Open a handle whose values are stored as JSON.
    pub fn json_queue<V>(&self, name: &str) -> Result<ReliableQueue<V, JsonCodec>, ClientError>
    where
        V: Serialize + DeserializeOwned,
    {
        self.queue(name, JsonCodec)
    }

    /// Names of every queue with a stored config.
    pub fn list_queues(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .ctx
            .storage
            .list_queues()?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Stop all reapers and flush the store. Outstanding handles keep working
    /// but no longer have a reaper running on their behalf.
    #[tracing::instrument(skip_all)]
    pub fn shutdown(self) -> Result<(), ClientError> {
        self.reapers.shutdown_all();
        self.ctx.storage.flush()?;
        info!("queue client shut down");
        Ok(())
    }
}

/// A typed handle on one queue. Cheap to clone; clones share the reaper
/// reference, which is released when the last clone is dropped.
pub struct ReliableQueue<V, C> {
    engine: QueueEngine,
    codec: Arc<C>,
    _lease: Arc<ReaperLease>,
    _value: PhantomData<fn() -> V>,
}

impl<V, C> Clone for ReliableQueue<V, C> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            codec: Arc::clone(&self.codec),
            _lease: Arc::clone(&self._lease),
            _value: PhantomData,
        }
    }
}

impl<V, C: Codec<V>> ReliableQueue<V, C> {
    pub fn name(&self) -> &str {
        self.engine.name()
    }

    fn decode(&self, record: MessageRecord) -> Result<Message<V>, crate::error::CodecError> {
        let value = self.codec.decode(&record.payload)?;
        Ok(Message::from_record(record, value))
    }

    fn decode_all(&self, records: Vec<MessageRecord>) -> Result<Vec<Message<V>>, crate::error::CodecError> {
        records.into_iter().map(|record| self.decode(record)).collect()
    }

    // --- Producer side ---

    /// Add a message. `Ok(None)` when it was suppressed: too large, a
    /// duplicate within the dedup window, an id already present, or the queue
    /// is full.
    #[tracing::instrument(skip_all, fields(queue = %self.name()))]
    pub fn add(&self, args: AddArgs<V>) -> Result<Option<Message<V>>, AddError> {
        let payload = self.codec.encode(&args.value)?;
        let (msg, value) = args.into_parts(payload);
        let record = self.engine.add(msg, now_ns())?;
        Ok(record.map(|record| Message::from_record(record, value)))
    }

    /// Add a plain value with default arguments.
    pub fn add_value(&self, value: V) -> Result<Option<Message<V>>, AddError> {
        self.add(AddArgs::new(value))
    }

    /// Add several messages, each on its own. Every value is encoded before
    /// anything is written, so the outer error means nothing was added. The
    /// inner results line up with `args`: a suppressed message is `Ok(None)`
    /// and a failed write does not hide the entries committed around it.
    #[tracing::instrument(skip_all, fields(queue = %self.name(), count = args.len()))]
    pub fn add_many(
        &self,
        args: Vec<AddArgs<V>>,
    ) -> Result<Vec<Result<Option<Message<V>>, AddError>>, AddError> {
        let mut msgs = Vec::with_capacity(args.len());
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let payload = self.codec.encode(&arg.value)?;
            let (msg, value) = arg.into_parts(payload);
            msgs.push(msg);
            values.push(value);
        }
        let results = self.engine.add_many(msgs, now_ns())?;
        Ok(results
            .into_iter()
            .zip(values)
            .map(|(result, value)| {
                result.map(|record| record.map(|record| Message::from_record(record, value)))
            })
            .collect())
    }

    // --- Consumer side ---

    /// Poll messages. With a non-zero wait the call suspends until
    /// `args.count` messages are held or the wait elapses, and returns what it
    /// has, possibly nothing.
    #[tracing::instrument(skip_all, fields(queue = %self.name(), count = args.count))]
    pub async fn poll(&self, args: PollArgs) -> Result<Vec<Message<V>>, PollError> {
        let records = self.engine.poll(args).await?;
        let values = records
            .iter()
            .map(|record| self.codec.decode(&record.payload))
            .collect::<Result<Vec<V>, _>>();
        match values {
            Ok(values) => Ok(records
                .into_iter()
                .zip(values)
                .map(|(record, value)| Message::from_record(record, value))
                .collect()),
            Err(e) => {
                warn!(error = %e, count = records.len(), "releasing polled messages that failed to decode");
                self.engine.release_all(&records);
                Err(e.into())
            }
        }
    }

    /// Poll a single message without waiting.
    pub async fn poll_one(&self) -> Result<Option<Message<V>>, PollError> {
        Ok(self.poll(PollArgs::new(1)).await?.into_iter().next())
    }

    /// Acknowledge one message. Returns whether it was unacknowledged and is
    /// now gone; unknown ids are not an error.
    #[tracing::instrument(skip_all, fields(queue = %self.name(), msg_id = %id))]
    pub fn acknowledge(&self, id: &str) -> Result<bool, AckError> {
        Ok(self.engine.acknowledge(&[id.to_string()])? == 1)
    }

    #[tracing::instrument(skip_all, fields(queue = %self.name(), count = ids.len()))]
    pub fn acknowledge_many(&self, ids: &[String]) -> Result<usize, AckError> {
        self.engine.acknowledge(ids)
    }

    #[tracing::instrument(skip_all, fields(queue = %self.name(), count = args.ids.len()))]
    pub fn negative_acknowledge(&self, args: NackArgs) -> Result<usize, NackError> {
        self.engine.negative_acknowledge(&args, now_ns())
    }

    // --- Removal and migration ---

    #[tracing::instrument(skip_all, fields(queue = %self.name(), msg_id = %id))]
    pub fn remove(&self, id: &str) -> Result<bool, RemoveError> {
        Ok(self.engine.remove(&[id.to_string()])? == 1)
    }

    #[tracing::instrument(skip_all, fields(queue = %self.name(), count = ids.len()))]
    pub fn remove_many(&self, ids: &[String]) -> Result<usize, RemoveError> {
        self.engine.remove(ids)
    }

    /// Delete every message. Returns whether anything was deleted.
    #[tracing::instrument(skip_all, fields(queue = %self.name()))]
    pub fn clear(&self) -> Result<bool, StorageError> {
        self.engine.clear()
    }

    /// Move messages to another queue. Returns the number moved.
    #[tracing::instrument(skip_all, fields(queue = %self.name(), destination = %args.destination))]
    pub fn move_to(&self, args: MoveArgs) -> Result<usize, MoveError> {
        self.engine.move_messages(&args, now_ns())
    }

    // --- Reads ---

    pub fn size(&self) -> Result<u64, StorageError> {
        self.engine.size()
    }

    pub fn count_delayed(&self) -> Result<u64, StorageError> {
        self.engine.count_delayed()
    }

    pub fn count_unacknowledged(&self) -> Result<u64, StorageError> {
        self.engine.count_unacknowledged()
    }

    pub fn contains(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.engine.contains_many(&[id.to_string()])? == 1)
    }

    /// How many of `ids` are in the queue.
    pub fn contains_many(&self, ids: &[String]) -> Result<usize, StorageError> {
        self.engine.contains_many(ids)
    }

    pub fn get(&self, id: &str) -> Result<Option<Message<V>>, ReadError> {
        match self.engine.get(id)? {
            Some(record) => Ok(Some(self.decode(record)?)),
            None => Ok(None),
        }
    }

    pub fn get_many(&self, ids: &[String]) -> Result<Vec<Message<V>>, ReadError> {
        Ok(self.decode_all(self.engine.get_many(ids)?)?)
    }

    /// READY messages in the order poll would return them.
    pub fn list_all(&self) -> Result<Vec<Message<V>>, ReadError> {
        Ok(self.decode_all(self.engine.list_all()?)?)
    }

    // --- Configuration and gating ---

    #[tracing::instrument(skip_all, fields(queue = %self.name()))]
    pub fn set_config(&self, config: QueueConfig) -> Result<(), ConfigError> {
        self.engine.set_config(config)
    }

    /// Store `config` unless one exists. Returns whether it was stored.
    #[tracing::instrument(skip_all, fields(queue = %self.name()))]
    pub fn set_config_if_absent(&self, config: QueueConfig) -> Result<bool, ConfigError> {
        self.engine.set_config_if_absent(config)
    }

    /// The stored config, or `None` when the queue runs on defaults.
    pub fn config(&self) -> Result<Option<QueueConfig>, StorageError> {
        self.engine.stored_config()
    }

    pub fn dead_letter_queue_sources(&self) -> Result<Vec<String>, StorageError> {
        self.engine.dead_letter_queue_sources()
    }

    #[tracing::instrument(skip_all, fields(queue = %self.name(), operation = %op))]
    pub fn disable_operation(&self, op: QueueOperation) -> Result<bool, StorageError> {
        self.engine.disable_operation(op)
    }

    #[tracing::instrument(skip_all, fields(queue = %self.name(), operation = %op))]
    pub fn enable_operation(&self, op: QueueOperation) -> Result<bool, StorageError> {
        self.engine.enable_operation(op)
    }

    pub fn is_operation_enabled(&self, op: QueueOperation) -> Result<bool, StorageError> {
        self.engine.is_operation_enabled(op)
    }

    pub fn disabled_operations(&self) -> Result<Vec<QueueOperation>, StorageError> {
        self.engine.disabled_operations()
    }

    // --- Events ---

    /// Register a listener for this queue's events. An empty `kinds` slice
    /// subscribes to every kind. Listeners run on the client's dispatcher
    /// thread and must not block.
    pub fn add_listener<F>(&self, kinds: &[EventKind], listener: F) -> String
    where
        F: Fn(&QueueEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.engine
            .context()
            .notifier
            .add_listener(self.name(), kinds, listener)
    }

    pub fn remove_listener(&self, listener_id: &str) -> bool {
        self.engine
            .context()
            .notifier
            .remove_listener(self.name(), listener_id)
    }

    // --- Maintenance ---

    /// Run one reaper pass now, on the calling thread.
    #[tracing::instrument(skip_all, fields(queue = %self.name()))]
    pub fn reap_now(&self) -> Result<ReapStats, StorageError> {
        self.engine.reap(now_ns())
    }
}
