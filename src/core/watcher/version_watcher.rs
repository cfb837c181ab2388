use std::collections::BTreeMap;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::core::registry::Registration;
use crate::metrics::STALE_VERSION_SKIPS;
use crate::metrics::WATCHER_CYCLES;
use crate::ChangeNotification;
use crate::ChangeSetComputer;
use crate::Error;
use crate::ListenerRegistry;
use crate::ObservableKey;
use crate::Result;
use crate::StorageEngine;
use crate::StorageError;
use crate::StorageHandle;
use crate::VersionId;
use crate::WaitControl;
use crate::WatchedFileConfig;
use crate::WatcherConfig;

/// Phase of a watcher loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WatcherState {
    /// Blocked in the storage wait for a new commit
    Waiting = 0,
    /// Pinning the newest snapshot
    Advancing = 1,
    /// Diffing observables and handing notifications to the registry
    Dispatching = 2,
    Stopped = 3,
}

impl WatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WatcherState::Waiting,
            1 => WatcherState::Advancing,
            2 => WatcherState::Dispatching,
            _ => WatcherState::Stopped,
        }
    }
}

/// Background loop turning commits of one file into notifications.
///
/// One watcher per open file. It owns the file's storage handle exclusively
/// and closes it exactly once when the loop ends.
pub struct VersionWatcher;

impl VersionWatcher {
    /// Opens `file` and starts its watcher thread.
    ///
    /// Open and the first snapshot advance happen on the caller's thread, so
    /// an invalid file identity surfaces here as a configuration error.
    pub fn start(
        engine: &dyn StorageEngine,
        file: &WatchedFileConfig,
        registry: Arc<ListenerRegistry>,
        config: &WatcherConfig,
    ) -> Result<WatcherHandle> {
        file.validate()?;

        let mut handle = engine.open(file).inspect_err(|e| {
            error!(path = %file.path, "Failed to open watched file: {}", e);
        })?;

        let version = match advance(handle.as_mut()) {
            Ok(version) => version,
            Err(e) => {
                error!(path = %file.path, "Failed to pin initial snapshot: {}", e);
                if let Err(close_err) = handle.close() {
                    error!(path = %file.path, "Failed to close watched file: {}", close_err);
                }
                return Err(e);
            }
        };
        registry.acknowledge(version);

        let control = handle.wait_control();
        registry.attach_waker(control.clone());

        let state = Arc::new(AtomicU8::new(WatcherState::Waiting as u8));
        let (stopped_tx, stopped_rx) = bounded(1);

        let watch_loop = WatchLoop {
            path: file.path.clone(),
            handle,
            registry,
            computer: ChangeSetComputer::new(),
            state: state.clone(),
            stopped: stopped_tx,
        };

        let thread = std::thread::Builder::new()
            .name(thread_name(&config.thread_name_prefix, &file.path))
            .spawn(move || watch_loop.run())
            .map_err(Error::Spawn)?;

        debug!(path = %file.path, %version, "Version watcher started");

        Ok(WatcherHandle {
            path: file.path.clone(),
            control,
            state,
            stopped: stopped_rx,
            thread: Mutex::new(Some(thread)),
            stop_timeout: config.stop_timeout(),
        })
    }
}

fn thread_name(
    prefix: &str,
    path: &str,
) -> String {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    format!("{prefix}-{file_name}")
}

/// Open and immediately close a read transaction, fixing the newest commit as
/// the visible version
fn advance(handle: &mut dyn StorageHandle) -> Result<VersionId> {
    let version = handle.begin_read()?;
    handle.end_read()?;
    Ok(version)
}

struct WatchLoop {
    path: String,
    handle: Box<dyn StorageHandle>,
    registry: Arc<ListenerRegistry>,
    computer: ChangeSetComputer,
    state: Arc<AtomicU8>,
    stopped: Sender<()>,
}

impl WatchLoop {
    fn run(mut self) {
        loop {
            self.set_state(WatcherState::Waiting);
            if !self.handle.wait_for_change() {
                debug!(path = %self.path, "Wait disabled, leaving watch loop");
                break;
            }

            self.set_state(WatcherState::Advancing);
            let version = match advance(self.handle.as_mut()) {
                Ok(version) => version,
                Err(e) => {
                    error!(path = %self.path, "Failed to advance read snapshot: {}", e);
                    break;
                }
            };
            WATCHER_CYCLES.inc();
            self.registry.acknowledge(version);

            self.set_state(WatcherState::Dispatching);
            self.dispatch(version);

            // Every live baseline is now at or after this version
            let floor = self.registry.oldest_baseline().unwrap_or(version);
            self.handle.release_before(floor.min(version));
        }

        if let Err(e) = self.handle.close() {
            error!(path = %self.path, "Failed to close watched file: {}", e);
        }
        self.set_state(WatcherState::Stopped);
        let _ = self.stopped.send(());
        debug!(path = %self.path, "Version watcher stopped");
    }

    fn set_state(
        &self,
        state: WatcherState,
    ) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// One dispatch cycle against version `to`.
    ///
    /// Registrations of an observable are grouped by the version they last
    /// saw, so each distinct diff is computed once and every commit since
    /// that version is folded into it.
    fn dispatch(
        &self,
        to: VersionId,
    ) {
        for (observable, registrations) in self.registry.snapshot() {
            let mut groups: BTreeMap<(VersionId, bool), Vec<Arc<Registration>>> = BTreeMap::new();
            for registration in registrations.into_iter().filter(|r| r.is_active()) {
                let initial = registration.wants_initial();
                let from = registration.baseline();
                if !initial && from >= to {
                    continue;
                }
                groups.entry((from, initial)).or_default().push(registration);
            }

            for ((from, initial), group) in groups {
                self.dispatch_group(&observable, from, to, initial, &group);
            }
        }
    }

    fn dispatch_group(
        &self,
        observable: &ObservableKey,
        from: VersionId,
        to: VersionId,
        initial: bool,
        group: &[Arc<Registration>],
    ) {
        let result = self.computer.diff(self.handle.as_ref(), observable, from, to);

        for registration in group {
            registration.advance_to(to);
            if initial {
                registration.initial_delivered();
            }
        }

        let change = match result {
            Ok(change) => change,
            Err(e @ Error::StaleVersion(_)) | Err(e @ Error::Storage(StorageError::MalformedDiff { .. })) => {
                warn!(path = %self.path, %observable, %from, %to, "Skipping observable for this cycle: {}", e);
                STALE_VERSION_SKIPS.inc();
                return;
            }
            Err(e) => {
                error!(path = %self.path, %observable, %from, %to, "Diff failed: {}", e);
                return;
            }
        };

        if change.is_empty() && !initial {
            trace!(path = %self.path, %observable, %from, %to, "Empty change suppressed");
            return;
        }

        trace!(path = %self.path, %observable, %from, %to, initial, listeners = group.len(), "Dispatching change");
        let notification = ChangeNotification {
            observable: observable.clone(),
            from,
            to,
            initial,
            change,
        };
        for registration in group {
            self.registry.deliver(registration, notification.clone());
        }
    }
}

/// Owner-side handle of a running watcher
pub struct WatcherHandle {
    path: String,
    control: Arc<dyn WaitControl>,
    state: Arc<AtomicU8>,
    stopped: Receiver<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
    stop_timeout: Duration,
}

impl WatcherHandle {
    /// Disables the storage wait, which interrupts a blocked watcher, and
    /// waits up to the configured timeout for the loop to exit.
    ///
    /// Returns whether the watcher is known to have stopped. Calling it again
    /// is a no-op.
    pub fn stop(&self) -> bool {
        self.control.set_wait_enabled(false);

        let Some(thread) = self.thread.lock().take() else {
            return !self.is_running();
        };

        if thread.thread().id() == std::thread::current().id() {
            // Called from inside the loop; it exits once this cycle ends
            return false;
        }

        match self.stopped.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!(path = %self.path, "Version watcher thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    path = %self.path,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Version watcher did not stop in time, detaching"
                );
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() != WatcherState::Stopped
    }

    pub fn state(&self) -> WatcherState {
        WatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}
