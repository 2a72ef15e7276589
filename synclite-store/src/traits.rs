//! Persistence contracts consumed by the sync engine.
//!
//! The engine only depends on these traits; [`crate::SqliteStore`] is the
//! bundled implementation. Hosts that already own a persistence layer can
//! implement them instead, as long as the atomicity notes on each method
//! hold — the engine's crash-safety argument rests on them.

use crate::StorageResult;
use synclite_types::{Mutation, Record, RecordId, SyncCursor, VersionToken};

/// The durable, queryable local replica of synced records.
pub trait LocalStore: Send + Sync {
    /// Fetches a record, including tombstones.
    fn get(&self, collection: &str, id: &RecordId) -> StorageResult<Option<Record>>;

    /// Writes a record, replacing any existing row. Does not touch the
    /// outbox.
    fn put(&self, record: &Record) -> StorageResult<()>;

    /// Returns all live records in a collection matching the predicate.
    /// Tombstoned records are excluded.
    fn query(
        &self,
        collection: &str,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> StorageResult<Vec<Record>>;

    /// Enqueues a mutation and applies it optimistically to the record, in
    /// one transaction — both commit or neither does. Returns the outbox
    /// sequence number (an existing one when the write coalesced into a
    /// pending entry).
    fn apply_mutation(&self, mutation: &Mutation) -> StorageResult<u64>;

    /// Returns the pull cursor for a collection, if one has been stored.
    fn cursor(&self, collection: &str) -> StorageResult<Option<SyncCursor>>;

    /// Durably merges a batch of resolved remote records and advances the
    /// collection's cursor, in one transaction. The cursor never advances
    /// past a batch that failed to merge.
    fn merge_remote_batch(
        &self,
        collection: &str,
        records: &[Record],
        cursor: &SyncCursor,
    ) -> StorageResult<()>;

    /// Records the outcome of an accepted push: stamps the new server
    /// version on the record and clears the pushed outbox entry.
    ///
    /// If the record was mutated again between the batch read and this call
    /// (the pending entry's timestamp no longer matches the pushed
    /// mutation's), the entry stays pending with its base version rebased to
    /// the new server version, and `false` is returned.
    fn mark_synced(
        &self,
        mutation: &Mutation,
        server_version: Option<&VersionToken>,
    ) -> StorageResult<bool>;

    /// Rebases the pending outbox entry for a record onto a new server
    /// version, so its next push carries the right precondition. A no-op if
    /// nothing is pending for the record.
    fn rebase_pending(
        &self,
        collection: &str,
        id: &RecordId,
        server_version: Option<&VersionToken>,
    ) -> StorageResult<()>;

    /// Sets or clears the conflict flag on a record.
    fn set_conflict(&self, collection: &str, id: &RecordId, flagged: bool) -> StorageResult<()>;
}

/// The durable, ordered queue of unsynced local writes.
pub trait MutationOutbox: Send + Sync {
    /// Returns up to `max` pending mutations for a collection, in sequence
    /// order.
    fn pending_batch(&self, collection: &str, max: usize) -> StorageResult<Vec<Mutation>>;

    /// Removes outbox entries by sequence number. Idempotent: acknowledging
    /// an already-removed entry is a no-op.
    fn acknowledge(&self, seqs: &[u64]) -> StorageResult<()>;

    /// Returns the pending mutation targeting a record, if any.
    fn peek_pending(&self, collection: &str, id: &RecordId) -> StorageResult<Option<Mutation>>;

    /// Returns the number of pending mutations for a collection.
    fn pending_count(&self, collection: &str) -> StorageResult<usize>;
}
