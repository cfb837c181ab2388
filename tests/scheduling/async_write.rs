//! Async writes reach listeners through the watcher, never directly.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use snapwatch::AsyncTaskScheduler;
use snapwatch::ExecutionContext;
use snapwatch::ManualContext;
use snapwatch::ObservableKey;
use snapwatch::ObserveOptions;
use snapwatch::RowId;
use snapwatch::SchedulerConfig;
use snapwatch::TaskState;
use snapwatch::WatchedFileConfig;
use snapwatch::WriteRequest;
use tracing_test::traced_test;

use crate::common::recording_listener;
use crate::common::wait_until;
use crate::common::TestContext;
use crate::common::WAIT_TIMEOUT;

fn person() -> ObservableKey {
    ObservableKey::object("Person", RowId(1))
}

fn scheduler(worker_threads: usize) -> AsyncTaskScheduler {
    AsyncTaskScheduler::new(SchedulerConfig {
        worker_threads,
        ..SchedulerConfig::default()
    })
    .unwrap()
}

#[test]
#[traced_test]
fn committed_async_write_notifies_listeners_through_the_watcher() {
    const PATH: &str = "mem://async/commit";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let scheduler = scheduler(2);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let (listener, received) = recording_listener();
    ctx.center
        .observe(&WatchedFileConfig::new(PATH), person(), &context, listener, ObserveOptions::default())
        .unwrap();

    let storage = ctx.storage.clone();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    let handle = scheduler
        .submit(
            WriteRequest::new(move |_| {
                storage
                    .write(PATH, |tx| tx.set_field("Person", RowId(1), "age", 44))
                    .map(|_| ())
            })
            .on_complete_in(&context, move |outcome| sink.lock().push(outcome.is_completed())),
        )
        .unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || {
        owner.run_pending().unwrap();
        !received.lock().is_empty() && !outcomes.lock().is_empty()
    }));

    assert_eq!(handle.state(), TaskState::Finished);
    assert_eq!(*outcomes.lock(), vec![true]);
    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert!(received[0].change.as_object().unwrap().is_field_changed("age"));
}

#[test]
#[traced_test]
fn write_cancelled_before_start_never_commits() {
    const PATH: &str = "mem://async/cancel";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let before = ctx.storage.latest_version(PATH);
    let scheduler = scheduler(1);

    let (release_tx, release_rx) = bounded::<()>(1);
    let (started_tx, started_rx) = bounded::<()>(1);
    let blocker = scheduler
        .submit(WriteRequest::new(move |_| {
            let _ = started_tx.send(());
            let _ = release_rx.recv_timeout(WAIT_TIMEOUT);
            Ok(())
        }))
        .unwrap();
    started_rx.recv_timeout(WAIT_TIMEOUT).unwrap();

    let storage = ctx.storage.clone();
    let callback_fired = Arc::new(AtomicBool::new(false));
    let fired = callback_fired.clone();
    let queued = scheduler
        .submit(
            WriteRequest::new(move |_| {
                storage
                    .write(PATH, |tx| tx.set_field("Person", RowId(1), "age", 99))
                    .map(|_| ())
            })
            .on_complete(move |_| fired.store(true, Ordering::SeqCst)),
        )
        .unwrap();

    assert!(scheduler.cancel(&queued));
    release_tx.send(()).unwrap();
    assert!(wait_until(WAIT_TIMEOUT, || blocker.is_finished()));
    scheduler.shutdown();

    assert!(scheduler.is_cancelled(&queued));
    assert!(queued.is_cancelled());
    assert_eq!(queued.state(), TaskState::Cancelled);
    assert!(!callback_fired.load(Ordering::SeqCst));
    assert_eq!(ctx.storage.latest_version(PATH), before);
}
