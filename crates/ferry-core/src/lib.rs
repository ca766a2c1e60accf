pub mod client;
pub mod codec;
pub mod engine;
pub mod error;
pub mod message;
pub mod queue;
pub mod storage;
pub mod telemetry;

pub use client::{QueueClient, ReliableQueue};
pub use codec::{BytesCodec, Codec, JsonCodec, StringCodec};
pub use engine::args::{AddArgs, Dedup, MoveArgs, MoveSelector, NackArgs, NackMode, PollArgs};
pub use engine::config::ClientConfig;
pub use engine::events::{
    EventDetail, EventKind, ListenerResult, NackOutcome, NackReason, QueueEvent, RemovalReason,
};
pub use engine::ReapStats;
pub use error::{
    AckError, AddError, ClientError, CodecError, ConfigError, ConfigFileError, InvalidConfig,
    InvalidName, MoveError, NackError, OperationDisabled, PollError, ReadError, RemoveError,
    StorageError, StorageResult, UnknownOperation,
};
pub use message::{Message, MessageState};
pub use queue::{QueueConfig, QueueOperation};
pub use storage::{RocksDbStorage, Storage};
