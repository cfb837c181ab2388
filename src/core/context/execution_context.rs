use std::cell::Cell;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::Result;
use crate::ThreadAffinityError;

/// Process-unique identity of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// Context the calling thread is bound to, if any
pub fn current_context() -> Option<ContextId> {
    CURRENT_CONTEXT.with(|c| c.get())
}

/// Binds the calling thread to `id`, returning the previous binding
pub(crate) fn bind_current_thread(id: Option<ContextId>) -> Option<ContextId> {
    CURRENT_CONTEXT.with(|c| c.replace(id))
}

/// Unit of work posted into a context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A thread or cooperative loop that listeners are bound to.
///
/// Work for a context is either run inline (when the caller already runs on
/// it) or posted and executed later by the context itself, in FIFO order.
pub trait ExecutionContext: Send + Sync {
    fn id(&self) -> ContextId;

    /// Enqueues `task`; fails with [`crate::Error::ContextClosed`] once the
    /// context no longer runs work.
    fn post(
        &self,
        task: Task,
    ) -> Result<()>;

    fn is_current(&self) -> bool {
        current_context() == Some(self.id())
    }

    fn check_affinity(&self) -> std::result::Result<(), ThreadAffinityError> {
        let actual = current_context();
        if actual == Some(self.id()) {
            Ok(())
        } else {
            Err(ThreadAffinityError {
                expected: self.id(),
                actual,
            })
        }
    }
}

/// Value that may only be used on the context it was bound to.
///
/// Every access from any other context fails fast with
/// [`ThreadAffinityError`].
pub struct ContextBound<T> {
    owner: ContextId,
    value: T,
}

impl<T> ContextBound<T> {
    pub fn new(
        owner: ContextId,
        value: T,
    ) -> Self {
        Self { owner, value }
    }

    /// Binds `value` to the calling thread's context
    pub fn bind_current(value: T) -> Option<Self> {
        current_context().map(|owner| Self { owner, value })
    }

    pub fn owner(&self) -> ContextId {
        self.owner
    }

    pub fn get(&self) -> std::result::Result<&T, ThreadAffinityError> {
        self.check()?;
        Ok(&self.value)
    }

    pub fn into_inner(self) -> std::result::Result<T, ThreadAffinityError> {
        self.check()?;
        Ok(self.value)
    }

    fn check(&self) -> std::result::Result<(), ThreadAffinityError> {
        let actual = current_context();
        if actual == Some(self.owner) {
            Ok(())
        } else {
            Err(ThreadAffinityError {
                expected: self.owner,
                actual,
            })
        }
    }
}

impl<T> fmt::Debug for ContextBound<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ContextBound").field("owner", &self.owner).finish_non_exhaustive()
    }
}
