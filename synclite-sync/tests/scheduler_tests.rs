mod common;

use common::{test_config, MockAdapter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use synclite_store::{MutationOutbox, SqliteStore};
use synclite_sync::{LastWriteWins, SyncEngine, SyncScheduler};
use synclite_types::Patch;

fn make_engine(adapter: Arc<MockAdapter>) -> Arc<SyncEngine<MockAdapter, SqliteStore>> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    Arc::new(SyncEngine::new(
        adapter,
        store,
        Arc::new(LastWriteWins),
        test_config(&["notes"]),
    ))
}

#[tokio::test]
async fn trigger_runs_a_cycle_and_reports() {
    let adapter = Arc::new(MockAdapter::new());
    let engine = make_engine(adapter);
    engine
        .create("notes", Patch::from_fields([("a", json!(1))]))
        .unwrap();

    let (scheduler, handle) = SyncScheduler::new(Arc::clone(&engine), None);
    let running = tokio::spawn(scheduler.run());

    let report = handle.trigger_sync(None).await.unwrap();
    assert_eq!(report.pushed(), 1);
    assert_eq!(engine.store().pending_count("notes").unwrap(), 0);

    handle.shutdown().await;
    running.await.unwrap();
}

#[tokio::test]
async fn nudge_runs_a_cycle_without_waiting() {
    let adapter = Arc::new(MockAdapter::new());
    let engine = make_engine(adapter);
    engine
        .create("notes", Patch::from_fields([("a", json!(1))]))
        .unwrap();

    let (scheduler, handle) = SyncScheduler::new(Arc::clone(&engine), None);
    let running = tokio::spawn(scheduler.run());

    handle.nudge();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.store().pending_count("notes").unwrap(), 0);

    handle.shutdown().await;
    running.await.unwrap();
}

#[tokio::test]
async fn periodic_interval_runs_cycles_unattended() {
    let adapter = Arc::new(MockAdapter::new());
    let engine = make_engine(adapter);
    engine
        .create("notes", Patch::from_fields([("a", json!(1))]))
        .unwrap();

    let (scheduler, handle) =
        SyncScheduler::new(Arc::clone(&engine), Some(Duration::from_millis(20)));
    let running = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.store().pending_count("notes").unwrap(), 0);

    handle.shutdown().await;
    running.await.unwrap();
}
