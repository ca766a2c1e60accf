use super::*;
use crate::engine::args::{Dedup, MoveArgs, NackArgs, NewMessage, PollArgs};
use crate::engine::events::{EventDetail, EventKind, NackOutcome, NackReason, RemovalReason};
use crate::error::{
    AckError, AddError, InvalidConfig, InvalidName, MoveError, NackError, PollError, RemoveError,
};
use crate::storage::RocksDbStorage;
use std::time::Duration;

mod common;
use common::*;

mod add;
mod dedup;
mod reaper;
