use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::constants::DEFAULT_WRITER_THREAD_NAME;
use crate::constants::MAX_WORKER_THREADS;
use crate::Error;
use crate::Result;

/// Worker pool backing async write transactions
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on write transactions running at the same time
    ///
    /// Range: 1-512
    /// **Default**: 4
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// **Default**: "snapwatch-writer"
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// How long `shutdown()` waits for running work before abandoning it
    ///
    /// **Default**: 5000
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 || self.worker_threads > MAX_WORKER_THREADS {
            return Err(Error::Config(ConfigError::Message(format!(
                "scheduler.worker_threads must be within 1..={}, got {}",
                MAX_WORKER_THREADS, self.worker_threads
            ))));
        }

        if self.thread_name.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "scheduler.thread_name must not be empty".into(),
            )));
        }

        if self.shutdown_timeout_ms == 0 {
            warn!("scheduler.shutdown_timeout_ms is 0, running writes will be abandoned on shutdown");
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

const fn default_worker_threads() -> usize {
    4
}

fn default_thread_name() -> String {
    DEFAULT_WRITER_THREAD_NAME.to_string()
}

const fn default_shutdown_timeout_ms() -> u64 {
    5000
}
