use std::collections::VecDeque;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use super::bind_current_thread;
use super::current_context;
use super::ContextId;
use super::ExecutionContext;
use super::Task;
use crate::Error;
use crate::Result;

/// Context driven by its owner thread.
///
/// Posted work waits in a queue until the owner calls
/// [`ManualContext::run_pending`]; suitable for embedding into an existing
/// cooperative loop.
pub struct ManualContext {
    id: ContextId,
    queue: Mutex<VecDeque<Task>>,
    closed: AtomicBool,
}

impl ManualContext {
    /// Creates a context owned by, and bound to, the calling thread
    pub fn attach() -> Arc<Self> {
        let id = ContextId::next();
        bind_current_thread(Some(id));
        Arc::new(Self {
            id,
            queue: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Runs every queued task on the owner thread, returning how many ran
    pub fn run_pending(&self) -> Result<usize> {
        self.check_affinity()?;

        let mut executed = 0;
        loop {
            let Some(task) = self.queue.lock().pop_front() else {
                break;
            };
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!(context = %self.id, "Task panicked on manual context");
            }
            executed += 1;
        }
        Ok(executed)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Rejects further posts and unbinds the owner thread
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.queue.lock().clear();
        if current_context() == Some(self.id) {
            bind_current_thread(None);
        }
    }
}

impl ExecutionContext for ManualContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn post(
        &self,
        task: Task,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ContextClosed(self.id));
        }
        self.queue.lock().push_back(task);
        Ok(())
    }
}

impl Drop for ManualContext {
    fn drop(&mut self) {
        if current_context() == Some(self.id) {
            bind_current_thread(None);
        }
    }
}

impl std::fmt::Debug for ManualContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ManualContext")
            .field("id", &self.id)
            .field("pending", &self.pending_count())
            .finish()
    }
}
