mod common;

use common::{server_record, test_config, MockAdapter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use synclite_store::{LocalStore, MutationOutbox, SqliteStore};
use synclite_sync::{LastWriteWins, RemoteDelta, SyncEngine};
use synclite_types::{Patch, RecordId, SyncCursor, VersionToken};

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
async fn delta_merges_into_store_and_advances_cursor() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.script_delta(Ok(RemoteDelta {
        collection: "notes".to_string(),
        record: server_record("notes", "a", "v1", 100),
        cursor: Some(SyncCursor::new("rt-1")),
    }));
    let engine = make_engine(Arc::clone(&adapter));

    let running = tokio::spawn(engine.realtime_merger().run());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = engine
        .store()
        .get("notes", &RecordId::from("a"))
        .unwrap()
        .unwrap();
    assert_eq!(record.field("title"), Some(&json!("from server")));
    assert_eq!(
        engine.store().cursor("notes").unwrap(),
        Some(SyncCursor::new("rt-1"))
    );

    engine.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn subscription_resumes_from_durable_cursor() {
    let adapter = Arc::new(MockAdapter::new());
    let engine = make_engine(Arc::clone(&adapter));
    engine
        .store()
        .merge_remote_batch("notes", &[], &SyncCursor::new("c-9"))
        .unwrap();

    let running = tokio::spawn(engine.realtime_merger().run());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let subscriptions = adapter.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(
        subscriptions[0],
        vec![("notes".to_string(), Some(SyncCursor::new("c-9")))]
    );

    engine.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn delta_colliding_with_pending_local_goes_through_strategy() {
    let adapter = Arc::new(MockAdapter::new());
    let engine = make_engine(Arc::clone(&adapter));

    // Local edit stamped now is newer than the server delta from wall 100,
    // so last-write-wins keeps the local side.
    let id = engine
        .create("notes", Patch::from_fields([("title", json!("mine"))]))
        .unwrap();
    adapter.script_delta(Ok(RemoteDelta {
        collection: "notes".to_string(),
        record: server_record("notes", id.as_str(), "v9", 100),
        cursor: None,
    }));

    let running = tokio::spawn(engine.realtime_merger().run());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = engine.store().get("notes", &id).unwrap().unwrap();
    assert_eq!(record.field("title"), Some(&json!("mine")));

    // The pending mutation was rebased onto the delta's revision so its
    // next push carries the right precondition.
    let pending = engine.store().peek_pending("notes", &id).unwrap().unwrap();
    assert_eq!(pending.base_version, Some(VersionToken::new("v9")));

    engine.shutdown();
    running.await.unwrap().unwrap();
}
