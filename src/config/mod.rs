//! Configuration of the notification pipeline.
//!
//! Loaded hierarchically, later sources overriding earlier ones:
//! - Default values as code base
//! - Configuration file named by `CONFIG_PATH`
//! - Environment variables prefixed with `SNAPWATCH__`
mod scheduler;
mod storage;
mod watcher;
pub use scheduler::*;
pub use storage::*;
pub use watcher::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_PATH_ENV;
use crate::constants::ENV_PREFIX;
use crate::constants::ENV_SEPARATOR;
use crate::Result;

/// Main configuration container
#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NotifyConfig {
    /// Per-file version watchers
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Worker pool for async write transactions
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// In-memory storage engine
    #[serde(default)]
    pub storage: MemStorageConfig,
}

impl Debug for NotifyConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("watcher", &self.watcher)
            .field("scheduler", &self.scheduler)
            .field("storage", &self.storage)
            .finish()
    }
}

impl NotifyConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers must call [`NotifyConfig::validate`] once all overrides are
    /// applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("SNAPWATCH__SCHEDULER__WORKER_THREADS", "8");
    /// let cfg = NotifyConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies overrides from the file at `path`, then the environment again.
    ///
    /// Does not validate.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance
    pub fn validate(self) -> Result<Self> {
        self.watcher.validate()?;
        self.scheduler.validate()?;
        self.storage.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .ignore_empty(true)
        .try_parsing(true)
}
