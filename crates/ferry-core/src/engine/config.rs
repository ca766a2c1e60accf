use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigFileError;

/// Top-level client configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub reaper: ReaperConfig,
    pub poll: PollConfig,
    pub events: EventsConfig,
    pub storage: StorageConfig,
}

/// Redelivery reaper configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Pause between two reaper passes over a queue.
    pub interval_ms: u64,
    /// Maximum entries examined per index in one pass.
    pub batch_size: usize,
}

/// Blocking poll configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// A waiting poll re-checks the store at least this often, so it also sees
    /// messages added by other processes.
    pub recheck_interval_ms: u64,
}

/// Event notifier configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

/// Local storage location, used by binaries that open their own store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl ClientConfig {
    /// Parse a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl PollConfig {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms.max(1))
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            batch_size: 256,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            recheck_interval_ms: 100,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}
