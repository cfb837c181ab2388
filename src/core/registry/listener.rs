use std::any::Any;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::error;

use crate::ChangeNotification;
use crate::ContextId;
use crate::ObservableKey;

/// Error a listener body may report instead of panicking
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
pub type ListenerResult = std::result::Result<(), ListenerError>;

type Callback = dyn Fn(&ChangeNotification) -> ListenerResult + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Change callback with a stable identity.
///
/// Clones share the identity, so the clone passed to `remove` matches the one
/// passed to `add`.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Arc<Callback>,
}

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&ChangeNotification) -> ListenerResult + Send + Sync + 'static,
    {
        static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(callback),
        }
    }

    /// Listener whose body cannot report an error
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&ChangeNotification) + Send + Sync + 'static,
    {
        Self::new(move |notification| {
            callback(notification);
            Ok(())
        })
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn call(
        &self,
        notification: &ChangeNotification,
    ) -> ListenerResult {
        (self.callback)(notification)
    }
}

impl PartialEq for Listener {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Per-registration options of `observe`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserveOptions {
    /// Deliver the current state, as a diff from the empty snapshot, right
    /// after registering
    #[serde(default)]
    pub deliver_initial_state: bool,
}

impl ObserveOptions {
    pub fn initial_state() -> Self {
        Self {
            deliver_initial_state: true,
        }
    }
}

/// Failure raised inside a listener body.
///
/// Never propagated into the watcher; handed to the registry's fault hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFault {
    pub listener: ListenerId,
    pub observable: ObservableKey,
    pub context: ContextId,
    pub message: String,
    /// The body panicked rather than returning an error
    pub panicked: bool,
}

/// Side channel for listener faults
pub struct FaultHook(Box<dyn Fn(&ListenerFault) + Send + Sync>);

impl FaultHook {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&ListenerFault) + Send + Sync + 'static,
    {
        Self(Box::new(hook))
    }

    pub(crate) fn report(
        &self,
        fault: &ListenerFault,
    ) {
        (self.0)(fault)
    }
}

impl Default for FaultHook {
    fn default() -> Self {
        Self::new(|fault| {
            error!(
                listener = %fault.listener,
                observable = %fault.observable,
                context = %fault.context,
                panicked = fault.panicked,
                "Listener fault: {}",
                fault.message
            );
        })
    }
}

impl fmt::Debug for FaultHook {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("FaultHook")
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with a non-string payload".to_string()
    }
}
