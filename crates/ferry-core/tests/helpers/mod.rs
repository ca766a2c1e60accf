#![allow(dead_code)]

use std::path::Path;
use std::time::{Duration, Instant};

use ferry_core::engine::config::ReaperConfig;
use ferry_core::{ClientConfig, QueueClient};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u32,
    pub item: String,
}

impl Order {
    pub fn new(id: u32, item: &str) -> Self {
        Self {
            id,
            item: item.to_string(),
        }
    }
}

/// Client config pointed at `dir` with a fast reaper so timeouts resolve
/// within a test.
pub fn config(dir: &Path) -> ClientConfig {
    let mut config = ClientConfig {
        reaper: ReaperConfig {
            interval_ms: 20,
            ..Default::default()
        },
        ..Default::default()
    };
    config.storage.data_dir = dir.to_string_lossy().into_owned();
    config
}

/// A client over a fresh data directory. Keep the directory alive for the
/// duration of the test.
pub fn client() -> (QueueClient, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let client = QueueClient::open(config(dir.path())).expect("open client");
    (client, dir)
}

/// Poll `predicate` until it holds, failing the test after `timeout`.
pub async fn eventually(timeout: Duration, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
