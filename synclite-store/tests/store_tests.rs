use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use synclite_store::{LocalStore, MutationOutbox, SqliteStore, StorageError};
use synclite_types::{
    HybridTimestamp, Mutation, Patch, Record, RecordId, SyncCursor, VersionToken,
};

fn make_store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
}

fn ts(wall: u64) -> HybridTimestamp {
    HybridTimestamp::new(wall, 0)
}

fn create(collection: &str, id: &str, wall: u64) -> Mutation {
    Mutation::create(
        collection,
        RecordId::from(id),
        Patch::from_fields([("title", json!("hello"))]),
        ts(wall),
    )
}

fn remote_record(collection: &str, id: &str, version: &str, wall: u64) -> Record {
    let mut fields = BTreeMap::new();
    fields.insert("title".to_string(), json!("from server"));
    let mut record = Record::new(collection, RecordId::from(id), fields, ts(wall));
    record.server_version = Some(VersionToken::new(version));
    record
}

// ── Records ──────────────────────────────────────────────────────

#[test]
fn get_missing_returns_none() {
    let store = make_store();
    assert_eq!(store.get("notes", &RecordId::from("nope")).unwrap(), None);
}

#[test]
fn put_then_get_round_trips() {
    let store = make_store();
    let record = remote_record("notes", "n-1", "v1", 100);
    store.put(&record).unwrap();

    let loaded = store.get("notes", &RecordId::from("n-1")).unwrap().unwrap();
    assert_eq!(loaded, record);
}

#[test]
fn query_excludes_tombstones_and_honors_predicate() {
    let store = make_store();
    store.apply_mutation(&create("notes", "live", 10)).unwrap();
    store.apply_mutation(&create("notes", "dead", 11)).unwrap();
    store
        .apply_mutation(&Mutation::delete(
            "notes",
            RecordId::from("dead"),
            ts(12),
            None,
        ))
        .unwrap();

    let all = store.query("notes", &|_| true).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, RecordId::from("live"));

    let none = store
        .query("notes", &|r| r.field("title") == Some(&json!("other")))
        .unwrap();
    assert!(none.is_empty());
}

// ── apply_mutation ───────────────────────────────────────────────

#[test]
fn create_writes_record_and_outbox_atomically() {
    let store = make_store();
    let seq = store.apply_mutation(&create("notes", "n-1", 10)).unwrap();
    assert!(seq > 0);

    let record = store.get("notes", &RecordId::from("n-1")).unwrap().unwrap();
    assert_eq!(record.field("title"), Some(&json!("hello")));
    assert_eq!(record.server_version, None);

    let pending = store
        .peek_pending("notes", &RecordId::from("n-1"))
        .unwrap()
        .unwrap();
    assert_eq!(pending.seq, seq);
    assert_eq!(pending.base_version, None);
}

#[test]
fn update_of_missing_record_is_not_found() {
    let store = make_store();
    let err = store
        .apply_mutation(&Mutation::update(
            "notes",
            RecordId::from("ghost"),
            Patch::from_fields([("a", json!(1))]),
            ts(10),
            None,
        ))
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[test]
fn update_of_tombstoned_record_is_deleted_error() {
    let store = make_store();
    store.apply_mutation(&create("notes", "n-1", 10)).unwrap();
    store
        .apply_mutation(&Mutation::delete("notes", RecordId::from("n-1"), ts(11), None))
        .unwrap();

    let err = store
        .apply_mutation(&Mutation::update(
            "notes",
            RecordId::from("n-1"),
            Patch::from_fields([("a", json!(1))]),
            ts(12),
            None,
        ))
        .unwrap_err();
    assert!(matches!(err, StorageError::Deleted { .. }));
}

#[test]
fn successive_updates_coalesce_into_one_entry() {
    let store = make_store();
    let seq = store.apply_mutation(&create("notes", "n-1", 10)).unwrap();
    let seq2 = store
        .apply_mutation(&Mutation::update(
            "notes",
            RecordId::from("n-1"),
            Patch::from_fields([("body", json!("text"))]),
            ts(20),
            None,
        ))
        .unwrap();

    assert_eq!(seq, seq2);
    assert_eq!(store.pending_count("notes").unwrap(), 1);

    let pending = store
        .peek_pending("notes", &RecordId::from("n-1"))
        .unwrap()
        .unwrap();
    // Merged patch carries both writes, timestamp reflects the later one.
    assert_eq!(pending.patch.get("title"), Some(&json!("hello")));
    assert_eq!(pending.patch.get("body"), Some(&json!("text")));
    assert_eq!(pending.timestamp, ts(20));

    let record = store.get("notes", &RecordId::from("n-1")).unwrap().unwrap();
    assert_eq!(record.field("body"), Some(&json!("text")));
}

#[test]
fn update_against_synced_record_carries_base_version() {
    let store = make_store();
    store
        .put(&remote_record("notes", "n-1", "v3", 100))
        .unwrap();

    store
        .apply_mutation(&Mutation::update(
            "notes",
            RecordId::from("n-1"),
            Patch::from_fields([("title", json!("edited"))]),
            ts(200),
            None,
        ))
        .unwrap();

    let pending = store
        .peek_pending("notes", &RecordId::from("n-1"))
        .unwrap()
        .unwrap();
    assert_eq!(pending.base_version, Some(VersionToken::new("v3")));
}

#[test]
fn delete_of_unpushed_create_retracts_the_entry() {
    let store = make_store();
    store.apply_mutation(&create("notes", "n-1", 10)).unwrap();
    store
        .apply_mutation(&Mutation::delete("notes", RecordId::from("n-1"), ts(11), None))
        .unwrap();

    // Nothing to push: the record never reached the remote.
    assert_eq!(store.pending_count("notes").unwrap(), 0);
    let record = store.get("notes", &RecordId::from("n-1")).unwrap().unwrap();
    assert!(record.tombstone);
}

#[test]
fn delete_coalesces_pending_update_into_delete() {
    let store = make_store();
    store
        .put(&remote_record("notes", "n-1", "v1", 100))
        .unwrap();
    store
        .apply_mutation(&Mutation::update(
            "notes",
            RecordId::from("n-1"),
            Patch::from_fields([("title", json!("edited"))]),
            ts(200),
            None,
        ))
        .unwrap();
    store
        .apply_mutation(&Mutation::delete("notes", RecordId::from("n-1"), ts(201), None))
        .unwrap();

    let pending = store
        .peek_pending("notes", &RecordId::from("n-1"))
        .unwrap()
        .unwrap();
    assert_eq!(pending.kind, synclite_types::MutationKind::Delete);
    assert!(pending.patch.is_empty());
    assert_eq!(pending.base_version, Some(VersionToken::new("v1")));
}

#[test]
fn delete_of_missing_record_is_not_found() {
    let store = make_store();
    let err = store
        .apply_mutation(&Mutation::delete("notes", RecordId::from("ghost"), ts(10), None))
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[test]
fn double_delete_after_sync_is_deleted_error() {
    let store = make_store();
    store.apply_mutation(&create("notes", "n-1", 10)).unwrap();
    store
        .apply_mutation(&Mutation::delete("notes", RecordId::from("n-1"), ts(11), None))
        .unwrap();
    // First delete retracted the create, so nothing is pending and the
    // tombstone is all that remains.
    let err = store
        .apply_mutation(&Mutation::delete("notes", RecordId::from("n-1"), ts(12), None))
        .unwrap_err();
    assert!(matches!(err, StorageError::Deleted { .. }));
}

// ── Cursors and remote merge ─────────────────────────────────────

#[test]
fn cursor_is_none_until_first_merge() {
    let store = make_store();
    assert_eq!(store.cursor("notes").unwrap(), None);
}

#[test]
fn merge_remote_batch_writes_records_and_cursor_together() {
    let store = make_store();
    let records = vec![
        remote_record("notes", "a", "v1", 10),
        remote_record("notes", "b", "v2", 11),
    ];
    store
        .merge_remote_batch("notes", &records, &SyncCursor::new("c-1"))
        .unwrap();

    assert_eq!(store.cursor("notes").unwrap(), Some(SyncCursor::new("c-1")));
    assert!(store.get("notes", &RecordId::from("a")).unwrap().is_some());
    assert!(store.get("notes", &RecordId::from("b")).unwrap().is_some());

    // A later batch replaces the cursor.
    store
        .merge_remote_batch("notes", &[], &SyncCursor::new("c-2"))
        .unwrap();
    assert_eq!(store.cursor("notes").unwrap(), Some(SyncCursor::new("c-2")));
}

#[test]
fn cursors_are_per_collection() {
    let store = make_store();
    store
        .merge_remote_batch("notes", &[], &SyncCursor::new("n-cur"))
        .unwrap();
    store
        .merge_remote_batch("tasks", &[], &SyncCursor::new("t-cur"))
        .unwrap();

    assert_eq!(store.cursor("notes").unwrap(), Some(SyncCursor::new("n-cur")));
    assert_eq!(store.cursor("tasks").unwrap(), Some(SyncCursor::new("t-cur")));
}

// ── mark_synced ──────────────────────────────────────────────────

#[test]
fn mark_synced_clears_entry_and_stamps_version() {
    let store = make_store();
    store.apply_mutation(&create("notes", "n-1", 10)).unwrap();
    let pushed = store
        .peek_pending("notes", &RecordId::from("n-1"))
        .unwrap()
        .unwrap();

    let cleared = store
        .mark_synced(&pushed, Some(&VersionToken::new("v1")))
        .unwrap();
    assert!(cleared);
    assert_eq!(store.pending_count("notes").unwrap(), 0);

    let record = store.get("notes", &RecordId::from("n-1")).unwrap().unwrap();
    assert_eq!(record.server_version, Some(VersionToken::new("v1")));
}

#[test]
fn mark_synced_keeps_entry_written_during_push() {
    let store = make_store();
    store.apply_mutation(&create("notes", "n-1", 10)).unwrap();
    let pushed = store
        .peek_pending("notes", &RecordId::from("n-1"))
        .unwrap()
        .unwrap();

    // The record changes again while the push is in flight.
    store
        .apply_mutation(&Mutation::update(
            "notes",
            RecordId::from("n-1"),
            Patch::from_fields([("body", json!("late edit"))]),
            ts(20),
            None,
        ))
        .unwrap();

    let cleared = store
        .mark_synced(&pushed, Some(&VersionToken::new("v1")))
        .unwrap();
    assert!(!cleared);

    // The remainder stays pending, rebased onto the pushed revision.
    let pending = store
        .peek_pending("notes", &RecordId::from("n-1"))
        .unwrap()
        .unwrap();
    assert_eq!(pending.base_version, Some(VersionToken::new("v1")));
    assert_eq!(pending.patch.get("body"), Some(&json!("late edit")));
}

// ── rebase_pending / set_conflict ────────────────────────────────

#[test]
fn rebase_pending_updates_base_version() {
    let store = make_store();
    store.apply_mutation(&create("notes", "n-1", 10)).unwrap();

    store
        .rebase_pending(
            "notes",
            &RecordId::from("n-1"),
            Some(&VersionToken::new("v9")),
        )
        .unwrap();
    let pending = store
        .peek_pending("notes", &RecordId::from("n-1"))
        .unwrap()
        .unwrap();
    assert_eq!(pending.base_version, Some(VersionToken::new("v9")));

    // No-op when nothing is pending.
    store
        .rebase_pending("notes", &RecordId::from("ghost"), None)
        .unwrap();
}

#[test]
fn conflict_flag_round_trips() {
    let store = make_store();
    store.apply_mutation(&create("notes", "n-1", 10)).unwrap();

    store
        .set_conflict("notes", &RecordId::from("n-1"), true)
        .unwrap();
    assert!(store.get("notes", &RecordId::from("n-1")).unwrap().unwrap().conflict);

    store
        .set_conflict("notes", &RecordId::from("n-1"), false)
        .unwrap();
    assert!(!store.get("notes", &RecordId::from("n-1")).unwrap().unwrap().conflict);
}

// ── Durability ───────────────────────────────────────────────────

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("synclite.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.apply_mutation(&create("notes", "n-1", 10)).unwrap();
        store
            .merge_remote_batch("notes", &[], &SyncCursor::new("c-7"))
            .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert!(store.get("notes", &RecordId::from("n-1")).unwrap().is_some());
    assert_eq!(store.pending_count("notes").unwrap(), 1);
    assert_eq!(store.cursor("notes").unwrap(), Some(SyncCursor::new("c-7")));
}
