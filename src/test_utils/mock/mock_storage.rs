use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::unbounded;
use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::storage::MockStorageEngine;
use crate::storage::MockStorageHandle;
use crate::storage::MockWaitControl;
use crate::StorageError;
use crate::StorageHandle;
use crate::VersionId;
use crate::WaitControl;

/// Test-side control over a mocked handle's blocking wait
pub struct WatchGate {
    sender: Sender<bool>,
    closes: Arc<AtomicUsize>,
    released: Arc<Mutex<Vec<VersionId>>>,
}

impl WatchGate {
    /// Releases the watcher's wait as if a commit happened
    pub fn commit(&self) {
        let _ = self.sender.send(true);
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Versions passed to `release_before`, in call order
    pub fn released(&self) -> Vec<VersionId> {
        self.released.lock().clone()
    }
}

/// Builds a [`MockStorageHandle`] whose wait blocks until the test releases
/// it through the returned [`WatchGate`], or the wait is disabled.
pub struct MockHandleBuilder {
    versions: Vec<VersionId>,
    failing_read: Option<usize>,
    fail_close: bool,
}

impl MockHandleBuilder {
    /// `versions` are returned by successive `begin_read` calls; the last
    /// one repeats
    pub fn new(versions: impl IntoIterator<Item = VersionId>) -> Self {
        Self {
            versions: versions.into_iter().collect(),
            failing_read: None,
            fail_close: false,
        }
    }

    /// The `n`th `begin_read` (zero based) fails
    pub fn fail_read(
        mut self,
        n: usize,
    ) -> Self {
        self.failing_read = Some(n);
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn build(self) -> (MockStorageHandle, WatchGate) {
        let (sender, receiver) = unbounded::<bool>();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut handle = MockStorageHandle::new();

        handle.expect_wait_for_change().returning(move || receiver.recv().unwrap_or(false));

        let control_sender = sender.clone();
        handle.expect_wait_control().returning(move || {
            let mut control = MockWaitControl::new();
            let disable = control_sender.clone();
            control.expect_set_wait_enabled().returning(move |enabled| {
                if !enabled {
                    let _ = disable.send(false);
                }
            });
            let wake = control_sender.clone();
            control.expect_wake().returning(move || {
                let _ = wake.send(true);
            });
            Arc::new(control) as Arc<dyn WaitControl>
        });

        let versions = self.versions;
        let failing_read = self.failing_read;
        let mut reads = 0usize;
        handle.expect_begin_read().returning(move || {
            let n = reads;
            reads += 1;
            if failing_read == Some(n) {
                return Err(StorageError::Engine("read failed".into()).into());
            }
            Ok(versions
                .get(n)
                .or_else(|| versions.last())
                .copied()
                .unwrap_or(VersionId::EMPTY))
        });
        handle.expect_end_read().returning(|| Ok(()));

        let released = Arc::new(Mutex::new(Vec::new()));
        let release_log = released.clone();
        handle
            .expect_release_before()
            .returning(move |version| release_log.lock().push(version));

        let fail_close = self.fail_close;
        let counter = closes.clone();
        handle.expect_close().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            if fail_close {
                Err(StorageError::Engine("close failed".into()).into())
            } else {
                Ok(())
            }
        });

        (
            handle,
            WatchGate {
                sender,
                closes,
                released,
            },
        )
    }
}

/// Engine whose single `open` hands out `handle`
pub fn mock_engine(handle: MockStorageHandle) -> MockStorageEngine {
    let mut engine = MockStorageEngine::new();
    engine
        .expect_open()
        .return_once(move |_| Ok(Box::new(handle) as Box<dyn StorageHandle>));
    engine
}
