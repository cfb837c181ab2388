//! Change notifications for snapshot-versioned transactional storage.
//!
//! Each observed file gets a dedicated watcher thread. The watcher blocks
//! until a commit lands, pins the newest snapshot, diffs every observed
//! object, list and set against the version its listeners last saw, and
//! posts the result into the execution context each listener was registered
//! from. Writes can be pushed off the caller's thread with
//! [`AsyncTaskScheduler`].

mod config;
mod constants;
mod core;
mod errors;
mod metrics;
mod storage;

pub use core::*;

pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use storage::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
