//! Object observables: field-level changes, deletion and coalescing of
//! commits that land while the watcher is busy.

use std::collections::BTreeSet;
use std::sync::Arc;

use snapwatch::ChangeDescription;
use snapwatch::ExecutionContext;
use snapwatch::ManualContext;
use snapwatch::ObjectChange;
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
fn changing_one_field_reports_only_that_field() {
    const PATH: &str = "mem://object/field";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let (listener, received) = recording_listener();

    ctx.center
        .observe(&WatchedFileConfig::new(PATH), person(), &context, listener, ObserveOptions::default())
        .unwrap();
    let version = ctx
        .storage
        .write(PATH, |tx| tx.set_field("Person", RowId(1), "age", 31))
        .unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || owner.pending_count() == 1));
    owner.run_pending().unwrap();

    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].to, version);
    assert_eq!(
        received[0].change,
        ChangeDescription::Object(ObjectChange::modified(["age".to_string()]))
    );
}

#[test]
#[traced_test]
fn deleting_the_object_reports_deletion_without_fields() {
    const PATH: &str = "mem://object/delete";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let (listener, received) = recording_listener();

    ctx.center
        .observe(&WatchedFileConfig::new(PATH), person(), &context, listener, ObserveOptions::default())
        .unwrap();
    ctx.storage
        .write(PATH, |tx| tx.delete_row("Person", RowId(1)).map(|_| ()))
        .unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || owner.pending_count() == 1));
    owner.run_pending().unwrap();

    let received = received.lock();
    let change = received[0].change.as_object().unwrap();
    assert!(change.is_deleted());
    assert!(change.changed_fields().is_empty());
    assert!(!change.is_field_changed("name"));
}

#[test]
#[traced_test]
fn unrelated_commits_do_not_notify() {
    const PATH: &str = "mem://object/unrelated";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let (listener, received) = recording_listener();
    let (list_listener, list_received) = recording_listener();

    ctx.center
        .observe(&WatchedFileConfig::new(PATH), person(), &context, listener, ObserveOptions::default())
        .unwrap();
    ctx.center
        .observe(
            &WatchedFileConfig::new(PATH),
            ObservableKey::list("tags"),
            &context,
            list_listener,
            ObserveOptions::default(),
        )
        .unwrap();

    ctx.storage
        .write(PATH, |tx| {
            tx.list_push("tags", "new");
            Ok(())
        })
        .unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || owner.pending_count() == 1));
    owner.run_pending().unwrap();

    assert!(received.lock().is_empty());
    assert_eq!(list_received.lock().len(), 1);
}

#[test]
#[traced_test]
fn commits_in_quick_succession_are_delivered_as_a_contiguous_chain() {
    const PATH: &str = "mem://object/coalesce";
    let ctx = TestContext::new();
    ctx.seed_person(PATH);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let (listener, received) = recording_listener();

    ctx.center
        .observe(&WatchedFileConfig::new(PATH), person(), &context, listener, ObserveOptions::default())
        .unwrap();
    let start = ctx.storage.latest_version(PATH);

    ctx.storage
        .write(PATH, |tx| tx.set_field("Person", RowId(1), "name", "Bea"))
        .unwrap();
    ctx.storage
        .write(PATH, |tx| tx.set_field("Person", RowId(1), "age", 41))
        .unwrap();
    let last = ctx
        .storage
        .write(PATH, |tx| tx.set_field("Person", RowId(1), "name", "Cid"))
        .unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || {
        owner.run_pending().unwrap();
        received.lock().last().is_some_and(|n| n.to == last)
    }));

    let received = received.lock();
    assert!(!received.is_empty() && received.len() <= 3);
    assert_eq!(received[0].from, start);
    for pair in received.windows(2) {
        assert_eq!(pair[0].to, pair[1].from);
    }

    let mut changed = BTreeSet::new();
    for notification in received.iter() {
        let change = notification.change.as_object().unwrap();
        assert!(!change.is_empty());
        changed.extend(change.changed_fields().iter().cloned());
    }
    assert_eq!(
        changed,
        BTreeSet::from(["age".to_string(), "name".to_string()])
    );
}

#[test]
#[traced_test]
fn burst_longer_than_retention_still_ends_on_the_final_state() {
    const PATH: &str = "mem://object/burst";
    let ctx = TestContext::with_retention(1);
    ctx.seed_person(PATH);
    let owner = ManualContext::attach();
    let context: Arc<dyn ExecutionContext> = owner.clone();
    let (listener, received) = recording_listener();

    ctx.center
        .observe(&WatchedFileConfig::new(PATH), person(), &context, listener, ObserveOptions::default())
        .unwrap();
    let start = ctx.storage.latest_version(PATH);

    let mut last = start;
    for age in 100..300 {
        last = ctx
            .storage
            .write(PATH, |tx| tx.set_field("Person", RowId(1), "age", age))
            .unwrap();
    }

    assert!(wait_until(WAIT_TIMEOUT, || {
        owner.run_pending().unwrap();
        received.lock().last().is_some_and(|n| n.to == last)
    }));

    let received = received.lock();
    assert_eq!(received[0].from, start);
    for pair in received.windows(2) {
        assert_eq!(pair[0].to, pair[1].from);
    }
    for notification in received.iter() {
        assert!(notification.change.as_object().unwrap().is_field_changed("age"));
    }
}
