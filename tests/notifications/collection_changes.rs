//! Ordered collections and sets observed through a looper context.

use std::sync::Arc;

use snapwatch::ExecutionContext;
use snapwatch::LooperContext;
use snapwatch::ManualContext;
use snapwatch::Move;
use snapwatch::ObservableKey;
use snapwatch::ObserveOptions;
use snapwatch::SetChange;
use snapwatch::Value;
use snapwatch::VersionId;
use snapwatch::WatchedFileConfig;
use tracing_test::traced_test;

use crate::common::recording_listener;
use crate::common::wait_until;
use crate::common::Received;
use crate::common::TestContext;
use crate::common::WAIT_TIMEOUT;

const LIST: &str = "Person.friends";

/// Registers a recording listener for `observable` from inside `looper`
fn observe_on_looper(
    ctx: &TestContext,
    looper: &Arc<LooperContext>,
    path: &'static str,
    observable: ObservableKey,
    options: ObserveOptions,
) -> Received {
    let (listener, received) = recording_listener();
    let center = ctx.center.clone();
    let context: Arc<dyn ExecutionContext> = looper.clone();
    looper
        .invoke(move || center.observe(&WatchedFileConfig::new(path), observable, &context, listener, options))
        .unwrap()
        .unwrap();
    received
}

fn texts(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

#[test]
#[traced_test]
fn dropping_the_head_and_appending_reports_positions() {
    const PATH: &str = "mem://collection/shift";
    let ctx = TestContext::new();
    ctx.storage
        .write(PATH, |tx| {
            for value in ["a", "b", "c"] {
                tx.list_push(LIST, value);
            }
            Ok(())
        })
        .unwrap();
    let looper = LooperContext::spawn("collection-shift").unwrap();
    let received = observe_on_looper(&ctx, &looper, PATH, ObservableKey::list(LIST), ObserveOptions::default());

    ctx.storage
        .write(PATH, |tx| {
            tx.list_remove(LIST, 0)?;
            tx.list_push(LIST, "d");
            Ok(())
        })
        .unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || received.lock().len() == 1));
    looper.quit();

    let received = received.lock();
    let change = received[0].change.as_collection().unwrap();
    assert_eq!(change.deletions().to_vec(), vec![0]);
    assert_eq!(change.insertions().to_vec(), vec![2]);
    assert!(change.modifications().is_empty());
    assert!(change.moves().is_empty());
    assert_eq!(ctx.storage.snapshot(PATH).list(LIST), texts(&["b", "c", "d"]));
}

#[test]
#[traced_test]
fn mixed_deletions_and_insertions_replay_onto_a_mirror() {
    const PATH: &str = "mem://collection/reindex";
    let ctx = TestContext::new();
    ctx.storage
        .write(PATH, |tx| {
            for value in ["a", "b", "c", "d", "e"] {
                tx.list_push(LIST, value);
            }
            Ok(())
        })
        .unwrap();
    let mirror = ctx.storage.snapshot(PATH).list(LIST);
    let looper = LooperContext::spawn("collection-reindex").unwrap();
    let received = observe_on_looper(&ctx, &looper, PATH, ObservableKey::list(LIST), ObserveOptions::default());

    ctx.storage
        .write(PATH, |tx| {
            tx.list_remove(LIST, 3)?;
            tx.list_remove(LIST, 1)?;
            tx.list_insert(LIST, 0, "x")?;
            tx.list_insert(LIST, 4, "y")?;
            Ok(())
        })
        .unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || received.lock().len() == 1));
    looper.quit();

    let received = received.lock();
    let change = received[0].change.as_collection().unwrap();
    assert_eq!(change.deletions().to_vec(), vec![1, 3]);
    assert_eq!(change.insertions().to_vec(), vec![0, 4]);

    let current = ctx.storage.snapshot(PATH).list(LIST);
    assert_eq!(current, texts(&["x", "a", "c", "e", "y"]));
    assert_eq!(change.apply_to(&mirror, &current), Some(current.clone()));
}

#[test]
#[traced_test]
fn explicit_reorder_is_reported_as_a_move() {
    const PATH: &str = "mem://collection/move";
    let ctx = TestContext::new();
    ctx.storage
        .write(PATH, |tx| {
            for value in ["a", "b", "c", "d"] {
                tx.list_push(LIST, value);
            }
            Ok(())
        })
        .unwrap();
    let mirror = ctx.storage.snapshot(PATH).list(LIST);
    let looper = LooperContext::spawn("collection-move").unwrap();
    let received = observe_on_looper(&ctx, &looper, PATH, ObservableKey::list(LIST), ObserveOptions::default());

    ctx.storage.write(PATH, |tx| tx.list_move(LIST, 0, 3)).unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || received.lock().len() == 1));
    looper.quit();

    let received = received.lock();
    let change = received[0].change.as_collection().unwrap();
    assert_eq!(change.moves(), &[Move { from: 0, to: 3 }]);
    assert!(change.deletions().contains(0));
    assert!(change.insertions().contains(3));

    let current = ctx.storage.snapshot(PATH).list(LIST);
    assert_eq!(change.apply_to(&mirror, &current), Some(current.clone()));
}

#[test]
#[traced_test]
fn set_changes_carry_counts_only() {
    const PATH: &str = "mem://collection/set";
    let ctx = TestContext::new();
    ctx.storage
        .write(PATH, |tx| {
            tx.set_insert("colors", "red");
            tx.set_insert("colors", "blue");
            Ok(())
        })
        .unwrap();
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let (listener, received) = recording_listener();
    ctx.center
        .observe(
            &WatchedFileConfig::new(PATH),
            ObservableKey::set("colors"),
            &context,
            listener,
            ObserveOptions::default(),
        )
        .unwrap();

    ctx.storage
        .write(PATH, |tx| {
            tx.set_remove("colors", &Value::from("red"));
            tx.set_insert("colors", "green");
            tx.set_insert("colors", "white");
            Ok(())
        })
        .unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || owner.pending_count() == 1));
    owner.run_pending().unwrap();

    assert_eq!(
        received.lock()[0].change.as_set(),
        Some(&SetChange {
            insertion_count: 2,
            deletion_count: 1,
        })
    );
}

#[test]
#[traced_test]
fn initial_state_of_a_list_lists_every_element_as_inserted() {
    const PATH: &str = "mem://collection/initial";
    let ctx = TestContext::new();
    ctx.storage
        .write(PATH, |tx| {
            for value in ["a", "b", "c"] {
                tx.list_push(LIST, value);
            }
            Ok(())
        })
        .unwrap();
    let looper = LooperContext::spawn("collection-initial").unwrap();
    let received = observe_on_looper(
        &ctx,
        &looper,
        PATH,
        ObservableKey::list(LIST),
        ObserveOptions::initial_state(),
    );
    assert!(wait_until(WAIT_TIMEOUT, || received.lock().len() == 1));

    let version = ctx.storage.write(PATH, |tx| tx.list_set(LIST, 1, "B")).unwrap();
    assert!(wait_until(WAIT_TIMEOUT, || received.lock().len() == 2));
    looper.quit();

    let received = received.lock();
    assert!(received[0].initial);
    assert_eq!(received[0].from, VersionId::EMPTY);
    let initial = received[0].change.as_collection().unwrap();
    assert_eq!(initial.insertions().to_vec(), vec![0, 1, 2]);
    assert!(initial.deletions().is_empty());

    assert!(!received[1].initial);
    assert_eq!(received[1].from, received[0].to);
    assert_eq!(received[1].to, version);
    let update = received[1].change.as_collection().unwrap();
    assert_eq!(update.modifications().to_vec(), vec![1]);
    assert!(update.insertions().is_empty());
}
