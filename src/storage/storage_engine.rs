//! Boundary consumed from the transactional storage engine.
//!
//! The notification core treats the engine as a black box that can block until
//! a new commit is available, pin the newest snapshot and describe the
//! low-level difference between two snapshots. Everything else (file format,
//! MVCC internals, durability) stays on the other side of these traits.

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::ObservableKey;
use crate::Result;
use crate::VersionId;
use crate::WatchedFileConfig;

/// Opens watched files
#[cfg_attr(test, automock)]
pub trait StorageEngine: Send + Sync + 'static {
    /// Opens `file`, surfacing invalid identity/mode/key as
    /// [`crate::ConfigurationError`].
    fn open(
        &self,
        file: &WatchedFileConfig,
    ) -> Result<Box<dyn StorageHandle>>;
}

/// Exclusive handle to one open file.
///
/// Exactly one owner (the file's watcher) holds it and calls `close` once on
/// every exit path.
#[cfg_attr(test, automock)]
pub trait StorageHandle: Send {
    /// Blocks until a commit newer than the last read snapshot exists, or a
    /// wake is requested (`true`), or waiting has been disabled (`false`).
    fn wait_for_change(&self) -> bool;

    /// Cross-thread control over the blocking wait
    fn wait_control(&self) -> Arc<dyn WaitControl>;

    /// Starts a read transaction on the newest committed snapshot
    fn begin_read(&mut self) -> Result<VersionId>;

    fn end_read(&mut self) -> Result<()>;

    /// Lets the engine retire snapshots older than `version`.
    ///
    /// The first read pins its snapshot; the pin only moves forward through
    /// this call and is dropped on close.
    fn release_before(
        &mut self,
        version: VersionId,
    );

    fn close(&mut self) -> Result<()>;

    /// Low-level difference of `key` between two retained snapshots.
    ///
    /// Fails with [`crate::StaleVersionError`] when `from` is no longer
    /// retained, which cannot happen for versions at or after this handle's pin.
    fn raw_diff(
        &self,
        key: &ObservableKey,
        from: VersionId,
        to: VersionId,
    ) -> Result<RawDiff>;
}

/// Interrupt path for a handle blocked in `wait_for_change`.
///
/// Usable from any thread while the handle itself stays with its owner.
#[cfg_attr(test, automock)]
pub trait WaitControl: Send + Sync {
    /// Disabling unblocks a pending wait, which then returns `false`
    fn set_wait_enabled(
        &self,
        enabled: bool,
    );

    /// Unblocks a pending wait with `true` even if nothing was committed
    fn wake(&self);
}

/// Index diff as produced by the engine, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawDiff {
    /// Column-level dirty flags for one row
    Object {
        existed_before: bool,
        exists_after: bool,
        changed_columns: Vec<usize>,
        column_names: Vec<String>,
    },
    Collection(RawCollectionDiff),
    Set {
        inserted: usize,
        deleted: usize,
    },
    Database,
}

/// Positional diff of an ordered collection.
///
/// `deletions` and move sources are pre-change positions; `insertions`,
/// `modifications` and move destinations are post-change positions. Engines
/// may report a move's endpoints in the deletion/insertion sets or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCollectionDiff {
    pub old_len: usize,
    pub new_len: usize,
    pub insertions: Vec<usize>,
    pub deletions: Vec<usize>,
    pub modifications: Vec<usize>,
    pub moves: Vec<(usize, usize)>,
}
