//! Per-file version watcher.

mod version_watcher;


pub use version_watcher::*;
