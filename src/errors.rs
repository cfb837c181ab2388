//! Change-Notification Error Hierarchy
//!
//! Errors are grouped by the component that raises them. Per-listener and
//! per-observable failures are contained where they happen; only open-time
//! configuration problems and affinity violations reach the caller.

use config::ConfigError;

use crate::ContextId;
use crate::ObservableKey;
use crate::VersionId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid file identity, mode or encryption key at open time
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// add/remove/dispatch attempted from a foreign execution context
    #[error(transparent)]
    ThreadAffinity(#[from] ThreadAffinityError),

    /// Diff requested against a version the engine no longer retains
    #[error(transparent)]
    StaleVersion(#[from] StaleVersionError),

    /// Storage collaborator failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Async write scheduling failures
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The execution context no longer accepts posted work
    #[error("Execution context {0} is closed")]
    ContextClosed(ContextId),

    /// Dedicated thread could not be started
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Failure reported by user code (write work, listener body)
    #[error("{0}")]
    User(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("File path must not be empty")]
    EmptyPath,

    #[error("Encryption key must be {expected} bytes, received {actual} bytes")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("File {path} is already open with a different encryption key")]
    KeyMismatch { path: String },

    /// Same path watched again with another open mode or durability
    #[error("File {path} is already open with a different {field}")]
    IdentityMismatch { path: String, field: &'static str },

    #[error("Invalid watched file configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Operation must run on execution context {expected}, but was invoked from {actual:?}")]
pub struct ThreadAffinityError {
    pub expected: ContextId,
    /// `None` when the calling thread is not bound to any context
    pub actual: Option<ContextId>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Version {from} is no longer retained (oldest retained: {oldest_retained}), cannot diff to {to}")]
pub struct StaleVersionError {
    pub from: VersionId,
    pub to: VersionId,
    pub oldest_retained: VersionId,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Operation on a handle after `close()`
    #[error("Storage handle for {0} is closed")]
    Closed(String),

    /// begin_read while a read is already active
    #[error("A read transaction is already active")]
    ReadActive,

    /// end_read without a matching begin_read
    #[error("No read transaction is active")]
    NoActiveRead,

    /// Version beyond the newest committed version
    #[error("Version {0} has not been committed")]
    UnknownVersion(VersionId),

    /// Raw diff violates positional invariants
    #[error("Malformed raw diff for {key}: {reason}")]
    MalformedDiff { key: ObservableKey, reason: String },

    /// Raw diff kind does not match the observable kind
    #[error("Raw diff kind does not match observable {0}")]
    KindMismatch(ObservableKey),

    /// Table or column absent from the schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// Engine-specific failure
    #[error("Storage engine error: {0}")]
    Engine(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler has been shut down")]
    ShutDown,

    #[error("Failed to build worker runtime: {0}")]
    RuntimeBuild(#[from] std::io::Error),
}
