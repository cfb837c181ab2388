//! Per-file registry of listener registrations.
//!
//! Registrations are grouped by observable and kept in registration order.
//! Each one is bound to the execution context it was added from; the registry
//! only keeps a weak reference to that context and posts deliveries into it.

use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::panic_message;
use super::FaultHook;
use super::Listener;
use super::ListenerFault;
use super::ObserveOptions;
use crate::current_context;
use crate::metrics::LISTENER_FAULTS;
use crate::metrics::NOTIFICATIONS_DELIVERED;
use crate::ChangeNotification;
use crate::ContextBound;
use crate::ContextId;
use crate::ExecutionContext;
use crate::ObservableKey;
use crate::Result;
use crate::ThreadAffinityError;
use crate::VersionId;
use crate::WaitControl;

/// One listener bound to one observable on one context
pub(crate) struct Registration {
    observable: ObservableKey,
    listener: ContextBound<Listener>,
    listener_id: super::ListenerId,
    context_id: ContextId,
    context: Weak<dyn ExecutionContext>,
    /// Last version delivered (or skipped) for this registration
    baseline: AtomicU64,
    pending_initial: AtomicBool,
    active: AtomicBool,
}

impl Registration {
    pub(crate) fn observable(&self) -> &ObservableKey {
        &self.observable
    }

    pub(crate) fn baseline(&self) -> VersionId {
        VersionId(self.baseline.load(Ordering::Acquire))
    }

    pub(crate) fn advance_to(
        &self,
        version: VersionId,
    ) {
        self.baseline.fetch_max(version.0, Ordering::AcqRel);
    }

    pub(crate) fn wants_initial(&self) -> bool {
        self.pending_initial.load(Ordering::Acquire)
    }

    pub(crate) fn initial_delivered(&self) {
        self.pending_initial.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

type EmptyHook = Arc<dyn Fn() + Send + Sync>;

pub struct ListenerRegistry {
    /// File the registry belongs to, for logs
    file: String,
    registrations: DashMap<ObservableKey, Vec<Arc<Registration>>>,
    /// Newest version the file's watcher has made visible
    acknowledged: AtomicU64,
    fault_hook: ArcSwap<FaultHook>,
    waker: Mutex<Option<Arc<dyn WaitControl>>>,
    /// Called when pruning removes the last registration
    empty_hook: Mutex<Option<EmptyHook>>,
}

impl ListenerRegistry {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            registrations: DashMap::new(),
            acknowledged: AtomicU64::new(VersionId::EMPTY.0),
            fault_hook: ArcSwap::from_pointee(FaultHook::default()),
            waker: Mutex::new(None),
            empty_hook: Mutex::new(None),
        }
    }

    /// Registers `listener` for `observable` on `context`.
    ///
    /// Must be called from `context`; otherwise nothing is registered and
    /// [`ThreadAffinityError`] is returned. Adding a listener that `context`
    /// already registered for the observable is a no-op; the same listener
    /// added from another context gets its own registration.
    pub fn add(
        &self,
        observable: ObservableKey,
        context: &Arc<dyn ExecutionContext>,
        listener: Listener,
        options: ObserveOptions,
    ) -> Result<()> {
        context.check_affinity()?;

        let mut entry = self.registrations.entry(observable.clone()).or_default();
        let context_id = context.id();
        if entry
            .iter()
            .any(|r| r.listener_id == listener.id() && r.context_id == context_id && r.is_active())
        {
            trace!(file = %self.file, observable = %observable, listener = %listener.id(), "Listener already registered");
            return Ok(());
        }

        let baseline = if options.deliver_initial_state {
            VersionId::EMPTY
        } else {
            self.acknowledged_version()
        };

        let listener_id = listener.id();
        entry.push(Arc::new(Registration {
            observable: observable.clone(),
            listener: ContextBound::new(context_id, listener),
            listener_id,
            context_id,
            context: Arc::downgrade(context),
            baseline: AtomicU64::new(baseline.0),
            pending_initial: AtomicBool::new(options.deliver_initial_state),
            active: AtomicBool::new(true),
        }));
        drop(entry);

        debug!(
            file = %self.file,
            observable = %observable,
            listener = %listener_id,
            context = %context_id,
            %baseline,
            "Listener registered"
        );

        if options.deliver_initial_state {
            self.wake_watcher();
        }
        Ok(())
    }

    /// Unregisters `listener` from `observable`.
    ///
    /// Only the registration `context` holds is removed. Removing a listener
    /// that is not registered anywhere is a no-op; removing one registered
    /// only from other contexts fails and leaves those registrations alone.
    pub fn remove(
        &self,
        observable: &ObservableKey,
        context: &Arc<dyn ExecutionContext>,
        listener: &Listener,
    ) -> Result<()> {
        context.check_affinity()?;

        let Some(mut entry) = self.registrations.get_mut(observable) else {
            return Ok(());
        };
        let context_id = context.id();
        let held = entry
            .iter()
            .position(|r| r.listener_id == listener.id() && r.context_id == context_id);
        match held {
            Some(position) => entry.remove(position).deactivate(),
            None => {
                let foreign = entry.iter().find(|r| r.listener_id == listener.id());
                return match foreign {
                    Some(owner) => Err(ThreadAffinityError {
                        expected: owner.context_id,
                        actual: current_context(),
                    }
                    .into()),
                    None => Ok(()),
                };
            }
        }
        drop(entry);

        self.registrations.remove_if(observable, |_, regs| regs.is_empty());
        debug!(file = %self.file, observable = %observable, listener = %listener.id(), "Listener removed");
        Ok(())
    }

    /// Unregisters every listener `context` holds on `observable`. Idempotent.
    pub fn remove_all(
        &self,
        observable: &ObservableKey,
        context: &Arc<dyn ExecutionContext>,
    ) -> Result<()> {
        context.check_affinity()?;

        let context_id = context.id();
        self.registrations.remove_if_mut(observable, |_, regs| {
            regs.retain(|r| {
                let keep = r.context_id != context_id;
                if !keep {
                    r.deactivate();
                }
                keep
            });
            regs.is_empty()
        });
        Ok(())
    }

    /// Delivers `notification` to every listener of its observable, in
    /// registration order, each on its own context.
    pub fn dispatch(
        &self,
        notification: ChangeNotification,
    ) {
        for registration in self.registrations_for(&notification.observable) {
            self.deliver(&registration, notification.clone());
        }
    }

    /// Schedules delivery of `notification` to one registration.
    ///
    /// Runs inline when the caller is already on the registration's context,
    /// otherwise posts into it.
    pub(crate) fn deliver(
        &self,
        registration: &Arc<Registration>,
        notification: ChangeNotification,
    ) {
        if !registration.is_active() {
            return;
        }

        let Some(context) = registration.context.upgrade() else {
            debug!(
                file = %self.file,
                context = %registration.context_id,
                "Context dropped, pruning registration"
            );
            self.prune(registration);
            return;
        };

        let target = registration.clone();
        let hook = self.fault_hook.load_full();
        let task = move || invoke(&target, &notification, &hook);

        if context.is_current() {
            task();
        } else if let Err(e) = context.post(Box::new(task)) {
            warn!(file = %self.file, context = %registration.context_id, "Delivery failed: {}", e);
            self.prune(registration);
        }
    }

    /// Observables with at least one registration, with their registrations
    pub(crate) fn snapshot(&self) -> Vec<(ObservableKey, Vec<Arc<Registration>>)> {
        self.registrations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub(crate) fn registrations_for(
        &self,
        observable: &ObservableKey,
    ) -> Vec<Arc<Registration>> {
        self.registrations
            .get(observable)
            .map(|regs| regs.value().clone())
            .unwrap_or_default()
    }

    /// Records the version the watcher has made visible
    pub(crate) fn acknowledge(
        &self,
        version: VersionId,
    ) {
        self.acknowledged.fetch_max(version.0, Ordering::AcqRel);
    }

    pub fn acknowledged_version(&self) -> VersionId {
        VersionId(self.acknowledged.load(Ordering::Acquire))
    }

    /// Oldest version an active registration will next be diffed from.
    ///
    /// Registrations waiting for their initial state diff from the synthetic
    /// empty version and do not count.
    pub(crate) fn oldest_baseline(&self) -> Option<VersionId> {
        self.registrations
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| r.is_active() && !r.wants_initial())
                    .map(|r| r.baseline())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .min()
    }

    /// Interrupt path used to request an initial-state delivery
    pub(crate) fn attach_waker(
        &self,
        waker: Arc<dyn WaitControl>,
    ) {
        *self.waker.lock() = Some(waker);
    }

    fn wake_watcher(&self) {
        if let Some(waker) = self.waker.lock().as_ref() {
            waker.wake();
        }
    }

    /// Installs `hook`, run when a dropped or closed context takes the last
    /// registration with it. Explicit removals do not trigger it.
    pub(crate) fn set_empty_hook<F>(
        &self,
        hook: F,
    ) where
        F: Fn() + Send + Sync + 'static,
    {
        *self.empty_hook.lock() = Some(Arc::new(hook));
    }

    /// Replaces the side channel that receives listener faults
    pub fn set_fault_hook(
        &self,
        hook: FaultHook,
    ) {
        self.fault_hook.store(Arc::new(hook));
    }

    pub fn listener_count(
        &self,
        observable: &ObservableKey,
    ) -> usize {
        self.registrations.get(observable).map(|r| r.len()).unwrap_or(0)
    }

    pub fn observable_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    fn prune(
        &self,
        registration: &Arc<Registration>,
    ) {
        registration.deactivate();
        self.registrations.remove_if_mut(registration.observable(), |_, regs| {
            regs.retain(|r| !Arc::ptr_eq(r, registration));
            regs.is_empty()
        });

        if self.registrations.is_empty() {
            let hook = self.empty_hook.lock().clone();
            if let Some(hook) = hook {
                debug!(file = %self.file, "Last registration pruned");
                hook();
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("file", &self.file)
            .field("observables", &self.registrations.len())
            .field("acknowledged", &self.acknowledged_version())
            .finish_non_exhaustive()
    }
}

/// Runs one listener body on its context, isolating its failure
fn invoke(
    registration: &Registration,
    notification: &ChangeNotification,
    hook: &FaultHook,
) {
    // Removed after the delivery was posted
    if !registration.is_active() {
        return;
    }

    let listener = match registration.listener.get() {
        Ok(listener) => listener,
        Err(e) => {
            error!(observable = %registration.observable, "Refusing off-context delivery: {}", e);
            return;
        }
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| listener.call(notification)));
    let (message, panicked) = match outcome {
        Ok(Ok(())) => {
            NOTIFICATIONS_DELIVERED
                .with_label_values(&[notification.change.kind().as_str()])
                .inc();
            return;
        }
        Ok(Err(e)) => (e.to_string(), false),
        Err(payload) => (panic_message(payload.as_ref()), true),
    };

    LISTENER_FAULTS.inc();
    hook.report(&ListenerFault {
        listener: registration.listener_id,
        observable: registration.observable.clone(),
        context: registration.context_id,
        message,
        panicked,
    });
}
