use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Condvar;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use super::diff_list;
use super::diff_row;
use super::diff_set;
use super::MemSnapshot;
use super::WriteTransaction;
use crate::ConfigurationError;
use crate::MemStorageConfig;
use crate::ObservableKey;
use crate::OpenMode;
use crate::RawDiff;
use crate::Result;
use crate::StaleVersionError;
use crate::StorageEngine;
use crate::StorageError;
use crate::StorageHandle;
use crate::VersionId;
use crate::WaitControl;
use crate::WatchedFileConfig;

/// Commit chain of one file
#[derive(Debug)]
struct VersionChain {
    latest: VersionId,
    /// Newest last. Longer than the retention window only while a pin holds
    /// older snapshots.
    retained: VecDeque<(VersionId, Arc<MemSnapshot>)>,
    /// Oldest version each open handle may still diff from, by handle id
    pins: HashMap<u64, VersionId>,
}

impl VersionChain {
    /// Retires snapshots beyond `window`, never one at or after the oldest pin
    fn trim(
        &mut self,
        window: usize,
    ) {
        let floor = self.pins.values().min().copied();
        while self.retained.len() > window {
            let oldest = self.retained.front().map(|(v, _)| *v);
            match (oldest, floor) {
                (Some(oldest), Some(floor)) if oldest >= floor => break,
                (None, _) => break,
                _ => {
                    self.retained.pop_front();
                }
            }
        }
    }

    fn snapshot(
        &self,
        version: VersionId,
    ) -> Option<Arc<MemSnapshot>> {
        if version.is_empty() {
            return Some(Arc::new(MemSnapshot::default()));
        }
        self.retained.iter().find(|(v, _)| *v == version).map(|(_, s)| s.clone())
    }

    fn latest_snapshot(&self) -> Arc<MemSnapshot> {
        self.retained
            .back()
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| Arc::new(MemSnapshot::default()))
    }

    fn oldest_retained(&self) -> VersionId {
        self.retained.front().map(|(v, _)| *v).unwrap_or(self.latest)
    }
}

#[derive(Debug)]
struct MemFile {
    path: String,
    encryption_key: Option<Vec<u8>>,
    chain: Mutex<VersionChain>,
    committed: Condvar,
    next_handle: AtomicU64,
}

impl MemFile {
    fn new(
        path: &str,
        encryption_key: Option<Vec<u8>>,
    ) -> Self {
        Self {
            path: path.to_string(),
            encryption_key,
            chain: Mutex::new(VersionChain {
                latest: VersionId::EMPTY,
                retained: VecDeque::new(),
                pins: HashMap::new(),
            }),
            committed: Condvar::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    fn notify_waiters(&self) {
        // Taken so a waiter between its flag check and `wait` cannot miss it
        let _chain = self.chain.lock();
        self.committed.notify_all();
    }
}

/// In-process transactional store with MVCC-style numbered snapshots.
///
/// Each `write` commits one new version. The last `retained_versions`
/// snapshots of every file stay diffable, and so does every snapshot at or
/// after the oldest one an open handle has pinned.
#[derive(Debug)]
pub struct MemStorage {
    files: DashMap<String, Arc<MemFile>>,
    config: MemStorageConfig,
}

impl MemStorage {
    pub fn new(config: MemStorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            files: DashMap::new(),
            config,
        })
    }

    /// Runs `f` as one write transaction on the file at `path` and commits it
    /// as a new version.
    ///
    /// Nothing is committed when `f` fails. A missing file is created without
    /// an encryption key; use [`MemStorage::write_file`] to create an
    /// encrypted one.
    pub fn write<F>(
        &self,
        path: &str,
        f: F,
    ) -> Result<VersionId>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<()>,
    {
        let file = self.file_or_create(path, None);
        self.commit(&file, f)
    }

    /// Like [`MemStorage::write`], but creates a missing file with the
    /// identity in `file` and rejects a key that differs from the one the
    /// file was created with.
    pub fn write_file<F>(
        &self,
        file: &WatchedFileConfig,
        f: F,
    ) -> Result<VersionId>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<()>,
    {
        file.validate()?;
        let shared = self.file_or_create(&file.path, file.encryption_key.clone());
        if shared.encryption_key != file.encryption_key {
            return Err(ConfigurationError::KeyMismatch {
                path: file.path.clone(),
            }
            .into());
        }
        self.commit(&shared, f)
    }

    fn commit<F>(
        &self,
        file: &MemFile,
        f: F,
    ) -> Result<VersionId>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<()>,
    {
        let version = {
            let mut chain = file.chain.lock();
            let mut next = (*chain.latest_snapshot()).clone();
            f(&mut WriteTransaction { snapshot: &mut next })?;

            let version = chain.latest.next();
            chain.latest = version;
            chain.retained.push_back((version, Arc::new(next)));
            chain.trim(self.config.retained_versions);
            version
        };

        trace!(path = %file.path, %version, "Committed");
        file.notify_waiters();
        Ok(version)
    }

    /// Snapshots of `path` that are currently diffable
    pub fn retained_count(
        &self,
        path: &str,
    ) -> usize {
        self.files.get(path).map(|f| f.chain.lock().retained.len()).unwrap_or(0)
    }

    /// Newest committed version of `path`, [`VersionId::EMPTY`] before the
    /// first commit
    pub fn latest_version(
        &self,
        path: &str,
    ) -> VersionId {
        self.files
            .get(path)
            .map(|f| f.chain.lock().latest)
            .unwrap_or(VersionId::EMPTY)
    }

    /// Newest committed snapshot of `path`
    pub fn snapshot(
        &self,
        path: &str,
    ) -> Arc<MemSnapshot> {
        self.files
            .get(path)
            .map(|f| f.chain.lock().latest_snapshot())
            .unwrap_or_default()
    }

    pub fn retention(&self) -> usize {
        self.config.retained_versions
    }

    fn file_or_create(
        &self,
        path: &str,
        encryption_key: Option<Vec<u8>>,
    ) -> Arc<MemFile> {
        self.files
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(MemFile::new(path, encryption_key)))
            .clone()
    }
}

impl StorageEngine for MemStorage {
    fn open(
        &self,
        file: &WatchedFileConfig,
    ) -> Result<Box<dyn StorageHandle>> {
        file.validate()?;

        if file.mode == OpenMode::ReadOnly && !self.files.contains_key(&file.path) {
            return Err(ConfigurationError::Invalid(format!("read-only file {} does not exist", file.path)).into());
        }

        let shared = self.file_or_create(&file.path, file.encryption_key.clone());
        if shared.encryption_key != file.encryption_key {
            return Err(ConfigurationError::KeyMismatch {
                path: file.path.clone(),
            }
            .into());
        }

        debug!(path = %file.path, mode = ?file.mode, durability = ?file.durability, "Opened in-memory file");
        Ok(Box::new(MemHandle {
            id: shared.next_handle.fetch_add(1, Ordering::Relaxed),
            control: Arc::new(MemWaitControl {
                file: shared.clone(),
                enabled: AtomicBool::new(true),
                woken: AtomicBool::new(false),
            }),
            file: shared,
            last_read: VersionId::EMPTY,
            reading: false,
            closed: false,
        }))
    }
}

struct MemWaitControl {
    file: Arc<MemFile>,
    enabled: AtomicBool,
    woken: AtomicBool,
}

impl WaitControl for MemWaitControl {
    fn set_wait_enabled(
        &self,
        enabled: bool,
    ) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.file.notify_waiters();
    }

    fn wake(&self) {
        self.woken.store(true, Ordering::SeqCst);
        self.file.notify_waiters();
    }
}

/// Read handle on one in-memory file
pub struct MemHandle {
    id: u64,
    file: Arc<MemFile>,
    control: Arc<MemWaitControl>,
    /// Version pinned by the last read transaction
    last_read: VersionId,
    reading: bool,
    closed: bool,
}

impl MemHandle {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::Closed(self.file.path.clone()).into());
        }
        Ok(())
    }
}

impl StorageHandle for MemHandle {
    fn wait_for_change(&self) -> bool {
        let mut chain = self.file.chain.lock();
        loop {
            if self.closed || !self.control.enabled.load(Ordering::SeqCst) {
                return false;
            }
            if self.control.woken.swap(false, Ordering::SeqCst) || chain.latest > self.last_read {
                return true;
            }
            self.file.committed.wait(&mut chain);
        }
    }

    fn wait_control(&self) -> Arc<dyn WaitControl> {
        self.control.clone()
    }

    fn begin_read(&mut self) -> Result<VersionId> {
        self.ensure_open()?;
        if self.reading {
            return Err(StorageError::ReadActive.into());
        }
        let mut chain = self.file.chain.lock();
        self.last_read = chain.latest;
        chain.pins.entry(self.id).or_insert(self.last_read);
        drop(chain);
        self.reading = true;
        Ok(self.last_read)
    }

    fn end_read(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.reading {
            return Err(StorageError::NoActiveRead.into());
        }
        self.reading = false;
        Ok(())
    }

    fn release_before(
        &mut self,
        version: VersionId,
    ) {
        if self.closed {
            return;
        }
        let mut chain = self.file.chain.lock();
        if let Some(pin) = chain.pins.get_mut(&self.id) {
            *pin = (*pin).max(version);
        }
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.file.chain.lock().pins.remove(&self.id);
        self.closed = true;
        self.reading = false;
        self.control.set_wait_enabled(false);
        debug!(path = %self.file.path, "Closed in-memory file");
        Ok(())
    }

    fn raw_diff(
        &self,
        key: &ObservableKey,
        from: VersionId,
        to: VersionId,
    ) -> Result<RawDiff> {
        self.ensure_open()?;

        let (before, after) = {
            let chain = self.file.chain.lock();
            if to > chain.latest {
                return Err(StorageError::UnknownVersion(to).into());
            }
            let stale = || StaleVersionError {
                from,
                to,
                oldest_retained: chain.oldest_retained(),
            };
            let before = chain.snapshot(from).ok_or_else(stale)?;
            let after = chain.snapshot(to).ok_or_else(stale)?;
            (before, after)
        };

        Ok(match key {
            ObservableKey::Object { table, row } => {
                let old_row = before.row(table, *row);
                let new_row = after.row(table, *row);
                let column_names = after
                    .columns(table)
                    .or_else(|| before.columns(table))
                    .map(|c| c.to_vec())
                    .unwrap_or_default();
                RawDiff::Object {
                    existed_before: old_row.is_some(),
                    exists_after: new_row.is_some(),
                    changed_columns: diff_row(old_row, new_row),
                    column_names,
                }
            }
            ObservableKey::OrderedCollection { path } => {
                let empty = Vec::new();
                let old = before.lists.get(path).unwrap_or(&empty);
                let new = after.lists.get(path).unwrap_or(&empty);
                RawDiff::Collection(diff_list(old, new))
            }
            ObservableKey::Set { path } => {
                let (inserted, deleted) = diff_set(before.sets.get(path), after.sets.get(path));
                RawDiff::Set { inserted, deleted }
            }
            ObservableKey::Database => RawDiff::Database,
        })
    }
}

impl Drop for MemHandle {
    fn drop(&mut self) {
        self.file.chain.lock().pins.remove(&self.id);
    }
}

impl std::fmt::Debug for MemHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemHandle")
            .field("id", &self.id)
            .field("path", &self.file.path)
            .field("last_read", &self.last_read)
            .field("closed", &self.closed)
            .finish()
    }
}
