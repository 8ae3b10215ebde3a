//! End-to-end invariant and scenario tests for the engine, driven through
//! the reconciler with mock backends.

use trellis::model::{TaskId, TaskPatch, TriageStatus};
use trellis::sync::{SyncConfig, SyncReconciler};
use trellis::testing::{FixedClock, InMemoryMirror, MockPersistenceGateway};

/// Routes engine tracing through the test harness, filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine() -> (SyncReconciler, MockPersistenceGateway, InMemoryMirror) {
    init_tracing();
    let gateway = MockPersistenceGateway::new();
    let mirror = InMemoryMirror::new();
    let engine = SyncReconciler::new(
        Box::new(gateway.clone()),
        SyncConfig {
            first_run_recorded: true,
            ..Default::default()
        },
    )
    .with_mirror(Box::new(mirror.clone()))
    .with_clock(Box::new(FixedClock::at_ms(0)));
    (engine, gateway, mirror)
}

async fn set_priority(engine: &mut SyncReconciler, id: &TaskId, priority: i64) {
    engine
        .update_task(
            id,
            TaskPatch {
                priority: Some(priority),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn invariants_hold_after_mixed_mutations() {
    let (mut engine, _gateway, _mirror) = engine();

    let root = engine.create_task("root", None).await.unwrap();
    let a = engine.create_task("a", Some(&root)).await.unwrap();
    let b = engine.create_task("b", Some(&root)).await.unwrap();
    let c = engine.create_task("c", Some(&a)).await.unwrap();

    engine.set_status(&c, TriageStatus::Done).await.unwrap();
    engine.reparent_task(&c, Some(&b)).await.unwrap();
    engine.toggle_timer(&b).await.unwrap();
    engine.delete_task(&a).await.unwrap();

    let snapshot = engine.snapshot();
    assert!(snapshot.is_acyclic());
    assert!(snapshot.children_caches_consistent());
    assert!(snapshot.open_timer_count() <= 1);
}

#[tokio::test]
async fn reparent_under_descendant_is_a_noop() {
    let (mut engine, _gateway, mirror) = engine();

    let a = engine.create_task("a", None).await.unwrap();
    let b = engine.create_task("b", Some(&a)).await.unwrap();

    let transactions_before = mirror.transaction_count();
    let applied = engine.reparent_task(&a, Some(&b)).await.unwrap();

    assert!(!applied);
    assert!(engine.snapshot().get(&a).unwrap().parent_id.is_none());
    // No mirror write happened for the no-op.
    assert_eq!(mirror.transaction_count(), transactions_before);
    assert!(engine.snapshot().is_acyclic());
}

#[tokio::test]
async fn delete_removes_closure_and_parent_reference() {
    let (mut engine, gateway, _mirror) = engine();

    let root = engine.create_task("root", None).await.unwrap();
    let a = engine.create_task("A", Some(&root)).await.unwrap();
    let b = engine.create_task("B", Some(&a)).await.unwrap();
    let c = engine.create_task("C", Some(&a)).await.unwrap();
    let d = engine.create_task("D", Some(&c)).await.unwrap();

    engine.delete_task(&a).await.unwrap();

    let snapshot = engine.snapshot();
    for id in [&a, &b, &c, &d] {
        assert!(!snapshot.contains(id));
    }
    assert!(!snapshot.get(&root).unwrap().children.contains(&a));
    assert!(snapshot.children_caches_consistent());
    // Durable store converged to the same closure removal.
    assert_eq!(gateway.stored_count(), 1);
}

#[tokio::test]
async fn child_completion_derives_parent_and_reverts() {
    let (mut engine, _gateway, _mirror) = engine();

    let p = engine.create_task("P", None).await.unwrap();
    let c1 = engine.create_task("C1", Some(&p)).await.unwrap();

    engine.set_status(&c1, TriageStatus::Done).await.unwrap();
    assert_eq!(
        engine.snapshot().get(&p).unwrap().triage_status,
        TriageStatus::Done
    );

    engine.set_status(&c1, TriageStatus::Ready).await.unwrap();
    assert_eq!(
        engine.snapshot().get(&p).unwrap().triage_status,
        TriageStatus::Ready
    );
}

#[tokio::test]
async fn all_dropped_children_derive_parent_dropped() {
    let (mut engine, _gateway, _mirror) = engine();

    let p = engine.create_task("P", None).await.unwrap();
    let c1 = engine.create_task("C1", Some(&p)).await.unwrap();
    let c2 = engine.create_task("C2", Some(&p)).await.unwrap();

    engine.set_status(&c1, TriageStatus::Dropped).await.unwrap();
    engine.set_status(&c2, TriageStatus::Dropped).await.unwrap();

    assert_eq!(
        engine.snapshot().get(&p).unwrap().triage_status,
        TriageStatus::Dropped
    );
}

#[tokio::test]
async fn timer_moves_between_tasks_exclusively() {
    let gateway = MockPersistenceGateway::new();
    let clock = FixedClock::at_ms(1_000);
    let mut engine = SyncReconciler::new(
        Box::new(gateway),
        SyncConfig {
            first_run_recorded: true,
            ..Default::default()
        },
    )
    .with_clock(Box::new(clock.clone()));

    let a = engine.create_task("A", None).await.unwrap();
    let b = engine.create_task("B", None).await.unwrap();

    engine.toggle_timer(&b).await.unwrap();
    clock.advance_ms(5_000);
    let started = engine.toggle_timer(&a).await.unwrap();
    assert!(started);

    let snapshot = engine.snapshot();
    let b_task = snapshot.get(&b).unwrap();
    assert!(!b_task.has_open_timer());
    assert_eq!(b_task.timer[0].end_time, 6_000);

    let a_task = snapshot.get(&a).unwrap();
    assert!(a_task.has_open_timer());
    assert_eq!(a_task.triage_status, TriageStatus::Wip);
    assert_eq!(snapshot.open_timer_count(), 1);
}

#[tokio::test]
async fn blocking_demotes_priority_below_backlog() {
    let (mut engine, _gateway, _mirror) = engine();

    let x = engine.create_task("X", None).await.unwrap();
    engine.set_status(&x, TriageStatus::Ready).await.unwrap();
    set_priority(&mut engine, &x, 5).await;

    for (title, priority) in [("b1", 2), ("b2", 3), ("b3", 7)] {
        let id = engine.create_task(title, None).await.unwrap();
        set_priority(&mut engine, &id, priority).await;
    }

    engine.set_status(&x, TriageStatus::Blocked).await.unwrap();

    assert_eq!(engine.snapshot().get(&x).unwrap().priority, 1);
}

#[tokio::test]
async fn import_export_round_trips() {
    let (mut engine, _gateway, _mirror) = engine();

    let root = engine.create_task("root", None).await.unwrap();
    let child = engine.create_task("child", Some(&root)).await.unwrap();
    engine.set_status(&child, TriageStatus::Done).await.unwrap();
    engine.toggle_timer(&root).await.unwrap();
    engine.toggle_timer(&root).await.unwrap();

    let exported = engine.export_tasks();

    let (mut other, _gateway2, _mirror2) = self::engine();
    other.import_tasks(exported.clone()).await.unwrap();
    let mut re_exported = other.export_tasks();

    let mut original = exported;
    original.sort_by(|a, b| a.id.cmp(&b.id));
    re_exported.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(original, re_exported);
    assert!(other.snapshot().children_caches_consistent());
}

#[tokio::test]
async fn decomposing_a_running_task_moves_its_open_timer() {
    let (mut engine, _gateway, _mirror) = engine();

    let parent = engine.create_task("parent", None).await.unwrap();
    engine.toggle_timer(&parent).await.unwrap();

    let child = engine.create_task("child", Some(&parent)).await.unwrap();

    let snapshot = engine.snapshot();
    assert!(!snapshot.get(&parent).unwrap().has_open_timer());
    assert!(snapshot.get(&child).unwrap().has_open_timer());
    assert_eq!(snapshot.open_timer_count(), 1);
}

#[tokio::test]
async fn aggregates_count_leaves_only() {
    let gateway = MockPersistenceGateway::new();
    let clock = FixedClock::at_ms(0);
    let mut engine = SyncReconciler::new(
        Box::new(gateway),
        SyncConfig {
            first_run_recorded: true,
            ..Default::default()
        },
    )
    .with_clock(Box::new(clock.clone()));

    let p = engine.create_task("p", None).await.unwrap();
    let c1 = engine.create_task("c1", Some(&p)).await.unwrap();
    let c2 = engine.create_task("c2", Some(&p)).await.unwrap();

    engine.toggle_timer(&c1).await.unwrap();
    clock.advance_ms(600);
    engine.toggle_timer(&c1).await.unwrap();

    engine.toggle_timer(&c2).await.unwrap();
    clock.advance_ms(400);
    engine.toggle_timer(&c2).await.unwrap();

    assert_eq!(engine.total_time(&p).unwrap(), 1_000);
    assert_eq!(engine.total_time(&c1).unwrap(), 600);
}
