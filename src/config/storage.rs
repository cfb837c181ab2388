use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// In-memory storage engine settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemStorageConfig {
    /// Number of committed versions kept diffable per file.
    ///
    /// A watcher whose last delivered version falls out of this window skips
    /// one dispatch cycle with a stale version.
    ///
    /// **Default**: 16
    #[serde(default = "default_retained_versions")]
    pub retained_versions: usize,
}

impl Default for MemStorageConfig {
    fn default() -> Self {
        Self {
            retained_versions: default_retained_versions(),
        }
    }
}

impl MemStorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retained_versions == 0 {
            return Err(Error::Config(ConfigError::Message(
                "storage.retained_versions must be at least 1".into(),
            )));
        }
        Ok(())
    }
}

const fn default_retained_versions() -> usize {
    16
}
