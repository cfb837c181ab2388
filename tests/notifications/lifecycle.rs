//! Registration lifecycle: thread affinity, teardown and fault isolation.

use std::sync::Arc;

use parking_lot::Mutex;
use snapwatch::Error;
use snapwatch::ExecutionContext;
use snapwatch::FaultHook;
use snapwatch::Listener;
use snapwatch::ListenerFault;
use snapwatch::LooperContext;
use snapwatch::ManualContext;
use snapwatch::ObservableKey;
use snapwatch::ObserveOptions;
use snapwatch::RowId;
use snapwatch::WatchedFileConfig;
use tracing_test::traced_test;

use crate::common::recording_listener;
use crate::common::wait_until;
use crate::common::TestContext;
use crate::common::WAIT_TIMEOUT;

fn person() -> ObservableKey {
    ObservableKey::object("Person", RowId(1))
}

#[test]
#[traced_test]
fn remove_from_another_context_fails_and_keeps_the_registration() {
    const PATH: &str = "mem://lifecycle/affinity";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let (listener, received) = recording_listener();

    ctx.center
        .observe(&WatchedFileConfig::new(PATH), person(), &context, listener.clone(), ObserveOptions::default())
        .unwrap();

    let looper = LooperContext::spawn("lifecycle-foreign").unwrap();
    let foreign: Arc<dyn ExecutionContext> = looper.clone();
    let center = ctx.center.clone();
    let foreign_listener = listener.clone();
    let result = looper
        .invoke(move || center.remove(PATH, &person(), &foreign, &foreign_listener))
        .unwrap();
    looper.quit();

    match result {
        Err(Error::ThreadAffinity(e)) => {
            assert_eq!(e.expected, owner.id());
            assert_eq!(e.actual, Some(looper.id()));
        }
        other => panic!("expected a thread affinity error, got {other:?}"),
    }
    assert!(ctx.center.is_watching(PATH));
    assert_eq!(ctx.center.registry(PATH).unwrap().listener_count(&person()), 1);

    ctx.storage
        .write(PATH, |tx| tx.set_field("Person", RowId(1), "age", 31))
        .unwrap();
    assert!(wait_until(WAIT_TIMEOUT, || owner.pending_count() == 1));
    owner.run_pending().unwrap();
    assert_eq!(received.lock().len(), 1);
}

#[test]
#[traced_test]
fn teardown_twice_is_a_no_op() {
    const PATH: &str = "mem://lifecycle/teardown";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let file = WatchedFileConfig::new(PATH);
    let first = Listener::from_fn(|_| {});
    let second = Listener::from_fn(|_| {});

    ctx.center
        .observe(&file, person(), &context, first.clone(), ObserveOptions::default())
        .unwrap();
    ctx.center
        .observe(&file, person(), &context, second.clone(), ObserveOptions::default())
        .unwrap();

    ctx.center.remove(PATH, &person(), &context, &first).unwrap();
    ctx.center.remove(PATH, &person(), &context, &first).unwrap();
    assert_eq!(ctx.center.registry(PATH).unwrap().listener_count(&person()), 1);

    ctx.center.remove_all(PATH, &person(), &context).unwrap();
    ctx.center.remove_all(PATH, &person(), &context).unwrap();
    ctx.center.remove(PATH, &person(), &context, &second).unwrap();
    assert!(!ctx.center.is_watching(PATH));
}

#[test]
#[traced_test]
fn removed_listener_is_not_called_for_a_delivery_already_posted() {
    const PATH: &str = "mem://lifecycle/posted";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let (removed, removed_received) = recording_listener();
    let (kept, kept_received) = recording_listener();
    let file = WatchedFileConfig::new(PATH);

    ctx.center
        .observe(&file, person(), &context, removed.clone(), ObserveOptions::default())
        .unwrap();
    ctx.center
        .observe(&file, person(), &context, kept, ObserveOptions::default())
        .unwrap();

    ctx.storage
        .write(PATH, |tx| tx.set_field("Person", RowId(1), "name", "Bea"))
        .unwrap();
    assert!(wait_until(WAIT_TIMEOUT, || owner.pending_count() == 2));

    ctx.center.remove(PATH, &person(), &context, &removed).unwrap();
    owner.run_pending().unwrap();

    assert!(removed_received.lock().is_empty());
    assert_eq!(kept_received.lock().len(), 1);
}

#[test]
#[traced_test]
fn failing_listener_is_reported_and_others_still_run() {
    const PATH: &str = "mem://lifecycle/fault";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let file = WatchedFileConfig::new(PATH);
    let (after, after_received) = recording_listener();

    ctx.center
        .observe(
            &file,
            person(),
            &context,
            Listener::from_fn(|_| panic!("listener bug")),
            ObserveOptions::default(),
        )
        .unwrap();
    ctx.center
        .observe(&file, person(), &context, after, ObserveOptions::default())
        .unwrap();

    let faults: Arc<Mutex<Vec<ListenerFault>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = faults.clone();
    ctx.center
        .registry(PATH)
        .unwrap()
        .set_fault_hook(FaultHook::new(move |fault| sink.lock().push(fault.clone())));

    ctx.storage
        .write(PATH, |tx| tx.set_field("Person", RowId(1), "age", 50))
        .unwrap();
    assert!(wait_until(WAIT_TIMEOUT, || owner.pending_count() == 2));
    owner.run_pending().unwrap();

    let faults = faults.lock();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].panicked);
    assert!(faults[0].message.contains("listener bug"));
    assert_eq!(after_received.lock().len(), 1);
}
