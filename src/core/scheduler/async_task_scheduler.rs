use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::core::registry::panic_message;
use crate::metrics::ASYNC_TASKS;
use crate::Error;
use crate::ExecutionContext;
use crate::Result;
use crate::SchedulerConfig;
use crate::SchedulerError;

type WriteWork = Box<dyn FnOnce(&CancellationToken) -> Result<()> + Send + 'static>;
type CompletionCallback = Box<dyn FnOnce(TaskOutcome) + Send + 'static>;

/// How a write transaction ended
#[derive(Debug)]
pub enum TaskOutcome {
    Completed,
    /// The work returned an error or panicked
    Failed(Error),
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }

    fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed(_) => "failed",
        }
    }
}

enum Completion {
    Direct(CompletionCallback),
    InContext {
        context: Weak<dyn ExecutionContext>,
        callback: CompletionCallback,
    },
}

/// A write transaction plus what to do once it ends.
///
/// Listeners are never called from here: a successful commit reaches them
/// through the watcher of the written file.
pub struct WriteRequest {
    work: WriteWork,
    completion: Option<Completion>,
}

impl WriteRequest {
    /// `work` receives a token that is cancelled when the task is cancelled or
    /// the scheduler shuts down; long running work may poll it to stop early.
    ///
    /// It runs on a blocking worker with the scheduler's runtime entered, so
    /// `tokio::runtime::Handle::current()` is available to it.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> Result<()> + Send + 'static,
    {
        Self {
            work: Box::new(work),
            completion: None,
        }
    }

    /// Calls `f` on the worker thread once the work ends
    pub fn on_complete<F>(
        mut self,
        f: F,
    ) -> Self
    where
        F: FnOnce(TaskOutcome) + Send + 'static,
    {
        self.completion = Some(Completion::Direct(Box::new(f)));
        self
    }

    /// Posts `f` into `context` once the work ends.
    ///
    /// The outcome is dropped if the context is gone by then.
    pub fn on_complete_in<F>(
        mut self,
        context: &Arc<dyn ExecutionContext>,
        f: F,
    ) -> Self
    where
        F: FnOnce(TaskOutcome) + Send + 'static,
    {
        self.completion = Some(Completion::InContext {
            context: Arc::downgrade(context),
            callback: Box::new(f),
        });
        self
    }
}

impl std::fmt::Debug for WriteRequest {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WriteRequest")
            .field("has_completion", &self.completion.is_some())
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Finished = 2,
    /// Cancelled before it started; the work never ran
    Cancelled = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Finished,
            _ => TaskState::Cancelled,
        }
    }
}

struct TaskShared {
    id: u64,
    state: AtomicU8,
    cancel_requested: AtomicBool,
    token: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TaskShared {
    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(
        &self,
        from: TaskState,
        to: TaskState,
    ) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns whether the task was withdrawn before it started
    fn cancel(&self) -> bool {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.token.cancel();

        if !self.transition(TaskState::Pending, TaskState::Cancelled) {
            return false;
        }
        if let Some(join) = self.join.lock().take() {
            // Keeps a queued blocking task from being started at all
            join.abort();
        }
        ASYNC_TASKS.with_label_values(&["cancelled"]).inc();
        true
    }
}

/// Reference to one submitted write transaction
#[derive(Clone)]
pub struct AsyncTransactionHandle {
    shared: Arc<TaskShared>,
}

impl AsyncTransactionHandle {
    /// Requests cancellation.
    ///
    /// A task that has not started is withdrawn and never runs. A running
    /// task only sees its token cancelled and may still complete, and its
    /// completion callback may still fire. Returns whether the task was
    /// withdrawn.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Whether cancellation was requested, regardless of its effect
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::SeqCst)
    }

    /// Whether the task has settled, either by running to the end or by being
    /// withdrawn before start
    pub fn is_finished(&self) -> bool {
        matches!(self.shared.state(), TaskState::Finished | TaskState::Cancelled)
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }
}

impl std::fmt::Debug for AsyncTransactionHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("AsyncTransactionHandle")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .field("cancel_requested", &self.is_cancelled())
            .finish()
    }
}

/// Shared worker pool for async write transactions.
///
/// Tasks run on the blocking pool of a dedicated tokio runtime, which is
/// capped at `worker_threads`; submissions beyond that wait in the pool's
/// queue until a worker frees up.
pub struct AsyncTaskScheduler {
    runtime: Mutex<Option<Runtime>>,
    tasks: Arc<DashMap<u64, Arc<TaskShared>>>,
    next_id: AtomicU64,
    config: SchedulerConfig,
}

impl AsyncTaskScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()
            .map_err(SchedulerError::RuntimeBuild)?;

        info!(
            worker_threads = config.worker_threads,
            thread_name = %config.thread_name,
            "Async task scheduler started"
        );

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            tasks: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        })
    }

    /// Queues `request` and returns immediately.
    ///
    /// Fails with [`SchedulerError::ShutDown`] after [`Self::shutdown`].
    pub fn submit(
        &self,
        request: WriteRequest,
    ) -> Result<AsyncTransactionHandle> {
        let runtime = self.runtime.lock();
        let Some(runtime) = runtime.as_ref() else {
            return Err(SchedulerError::ShutDown.into());
        };

        // Tasks withdrawn through their handle never reach the worker
        self.tasks.retain(|_, task| task.state() != TaskState::Cancelled);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(TaskShared {
            id,
            state: AtomicU8::new(TaskState::Pending as u8),
            cancel_requested: AtomicBool::new(false),
            token: CancellationToken::new(),
            join: Mutex::new(None),
        });
        self.tasks.insert(id, shared.clone());

        let task = shared.clone();
        let tasks = self.tasks.clone();
        let join = runtime.spawn_blocking(move || {
            run_task(&task, request);
            tasks.remove(&task.id);
        });

        // A cancel that won the race already moved the task out of Pending;
        // the worker skips it in that case
        if shared.state() == TaskState::Pending {
            *shared.join.lock() = Some(join);
        }

        trace!(task_id = id, "Write task submitted");
        Ok(AsyncTransactionHandle { shared })
    }

    pub fn cancel(
        &self,
        handle: &AsyncTransactionHandle,
    ) -> bool {
        let withdrawn = handle.cancel();
        if withdrawn {
            self.tasks.remove(&handle.id());
        }
        debug!(task_id = handle.id(), withdrawn, "Write task cancelled");
        withdrawn
    }

    pub fn is_cancelled(
        &self,
        handle: &AsyncTransactionHandle,
    ) -> bool {
        handle.is_cancelled()
    }

    /// Tasks submitted and not yet settled
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.state(), TaskState::Pending | TaskState::Running))
            .count()
    }

    pub fn is_shut_down(&self) -> bool {
        self.runtime.lock().is_none()
    }

    /// Withdraws every task that has not started, signals running ones, and
    /// waits up to `shutdown_timeout_ms` for them to end.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };

        let mut withdrawn = 0;
        for entry in self.tasks.iter() {
            if entry.value().cancel() {
                withdrawn += 1;
            }
        }
        self.tasks.retain(|_, task| task.state() == TaskState::Running);

        let running = self.tasks.len();
        info!(withdrawn, running, "Shutting down async task scheduler");

        if tokio::runtime::Handle::try_current().is_ok() {
            warn!("Scheduler shut down from within an async context, running writes are detached");
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(self.config.shutdown_timeout());
        }
    }
}

impl Drop for AsyncTaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AsyncTaskScheduler {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("AsyncTaskScheduler")
            .field("worker_threads", &self.config.worker_threads)
            .field("active_tasks", &self.active_tasks())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn run_task(
    task: &TaskShared,
    request: WriteRequest,
) {
    if !task.transition(TaskState::Pending, TaskState::Running) {
        trace!(task_id = task.id, "Skipping withdrawn write task");
        return;
    }

    let WriteRequest { work, completion } = request;
    let token = task.token.clone();
    let outcome = match catch_unwind(AssertUnwindSafe(move || work(&token))) {
        Ok(Ok(())) => TaskOutcome::Completed,
        Ok(Err(e)) => {
            warn!(task_id = task.id, "Write task failed: {}", e);
            TaskOutcome::Failed(e)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(task_id = task.id, "Write task panicked: {}", message);
            TaskOutcome::Failed(Error::User(message))
        }
    };

    task.state.store(TaskState::Finished as u8, Ordering::Release);
    ASYNC_TASKS.with_label_values(&[outcome.label()]).inc();
    trace!(task_id = task.id, outcome = outcome.label(), "Write task finished");

    match completion {
        None => {}
        Some(Completion::Direct(callback)) => {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || callback(outcome))) {
                error!(
                    task_id = task.id,
                    "Completion callback panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        Some(Completion::InContext { context, callback }) => {
            let Some(context) = context.upgrade() else {
                debug!(task_id = task.id, "Completion context dropped, outcome discarded");
                return;
            };
            if let Err(e) = context.post(Box::new(move || callback(outcome))) {
                warn!(task_id = task.id, context = %context.id(), "Failed to post completion: {}", e);
            }
        }
    }
}
