use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;

use super::bind_current_thread;
use super::ContextId;
use super::ExecutionContext;
use super::Task;
use crate::Error;
use crate::Result;

/// Dedicated thread running a FIFO message loop.
///
/// Behaves like a UI event loop: everything posted runs on the loop thread,
/// one task at a time, in posting order.
pub struct LooperContext {
    id: ContextId,
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LooperContext {
    pub fn spawn(name: &str) -> Result<Arc<Self>> {
        let id = ContextId::next();
        let (sender, receiver) = unbounded::<Task>();

        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                bind_current_thread(Some(id));
                debug!(context = %id, name = %thread_name, "Looper started");

                for task in receiver.iter() {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!(context = %id, "Task panicked on looper");
                    }
                }

                bind_current_thread(None);
                debug!(context = %id, "Looper stopped");
            })
            .map_err(Error::Spawn)?;

        Ok(Arc::new(Self {
            id,
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` on the loop and waits for its result
    pub fn invoke<R, F>(
        &self,
        f: F,
    ) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }

        let (tx, rx) = bounded(1);
        self.post(Box::new(move || {
            let _ = tx.send(f());
        }))?;
        rx.recv().map_err(|_| Error::ContextClosed(self.id))
    }

    /// Stops accepting work; already queued tasks still run.
    ///
    /// Waits for the loop thread unless called from the loop itself.
    pub fn quit(&self) {
        self.sender.lock().take();

        if self.is_current() {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!(context = %self.id, "Looper thread panicked");
            }
        }
    }
}

impl ExecutionContext for LooperContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn post(
        &self,
        task: Task,
    ) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(Error::ContextClosed(self.id))?;
        sender.send(task).map_err(|_| Error::ContextClosed(self.id))
    }
}

impl Drop for LooperContext {
    fn drop(&mut self) {
        self.quit();
    }
}

impl std::fmt::Debug for LooperContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LooperContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
