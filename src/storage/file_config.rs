use std::fmt::Debug;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::ENCRYPTION_KEY_LENGTH;
use crate::ConfigurationError;

/// How committed data reaches durable media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Durability {
    #[default]
    Full,
    MemOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OpenMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// Identity of one physical transactional file.
///
/// Two configs naming the same `path` address the same watched file; the
/// watcher opened for it is shared by every observable inside that file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedFileConfig {
    pub path: String,
    #[serde(default)]
    pub mode: OpenMode,
    #[serde(default)]
    pub durability: Durability,
    #[serde(default)]
    pub encryption_key: Option<Vec<u8>>,
}

impl Debug for WatchedFileConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchedFileConfig")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("durability", &self.durability)
            .field("encrypted", &self.encryption_key.is_some())
            .finish()
    }
}

impl WatchedFileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: OpenMode::default(),
            durability: Durability::default(),
            encryption_key: None,
        }
    }

    pub fn with_durability(
        mut self,
        durability: Durability,
    ) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_mode(
        mut self,
        mode: OpenMode,
    ) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_encryption_key(
        mut self,
        key: Vec<u8>,
    ) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Checks the identity, mode and key before anything is opened
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        if self.path.trim().is_empty() {
            return Err(ConfigurationError::EmptyPath);
        }

        if let Some(key) = &self.encryption_key {
            if key.len() != ENCRYPTION_KEY_LENGTH {
                return Err(ConfigurationError::InvalidKeyLength {
                    expected: ENCRYPTION_KEY_LENGTH,
                    actual: key.len(),
                });
            }
        }

        if self.mode == OpenMode::ReadOnly && self.durability == Durability::MemOnly {
            return Err(ConfigurationError::Invalid(format!(
                "{}: an in-memory file cannot be opened read-only",
                self.path
            )));
        }

        Ok(())
    }
}
