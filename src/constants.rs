// -
// Storage

/// Required length of a file encryption key, in bytes
pub(crate) const ENCRYPTION_KEY_LENGTH: usize = 64;

// -
// Watcher

pub(crate) const DEFAULT_WATCHER_THREAD_PREFIX: &str = "snapwatch-watcher";

// -
// Scheduler

pub(crate) const DEFAULT_WRITER_THREAD_NAME: &str = "snapwatch-writer";

/// Upper bound accepted for `scheduler.worker_threads`
pub(crate) const MAX_WORKER_THREADS: usize = 512;

// -
// Config

/// Environment variable prefix, e.g. `SNAPWATCH__WATCHER__STOP_TIMEOUT_MS`
pub(crate) const ENV_PREFIX: &str = "SNAPWATCH";
pub(crate) const ENV_SEPARATOR: &str = "__";
pub(crate) const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
