use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_WATCHER_THREAD_PREFIX;
use crate::Error;
use crate::Result;

/// Settings shared by every per-file version watcher
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Watcher threads are named `<prefix>-<file>`
    ///
    /// **Default**: "snapwatch-watcher"
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Upper bound on how long `stop()` waits for the watcher thread to
    /// acknowledge it has stopped
    ///
    /// The wait is interrupted explicitly on stop, so this only matters when
    /// a dispatch cycle is slow to finish.
    ///
    /// **Default**: 5000
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: default_thread_name_prefix(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "watcher.thread_name_prefix must not be empty".into(),
            )));
        }

        if self.stop_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watcher.stop_timeout_ms must be greater than 0".into(),
            )));
        }

        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn default_thread_name_prefix() -> String {
    DEFAULT_WATCHER_THREAD_PREFIX.to_string()
}

const fn default_stop_timeout_ms() -> u64 {
    5000
}
