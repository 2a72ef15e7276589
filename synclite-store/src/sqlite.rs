//! SQLite-backed store: records, outbox, and cursors in one database file.
//!
//! Keeping all three tables in one file is what makes the optimistic-write
//! path atomic: the outbox enqueue and the record update share a transaction.

use crate::error::{StorageError, StorageResult};
use crate::traits::{LocalStore, MutationOutbox};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use synclite_types::{
    HybridTimestamp, Mutation, MutationKind, Patch, Record, RecordId, SyncCursor, VersionToken,
};
use tracing::debug;

/// SQLite implementation of [`LocalStore`] and [`MutationOutbox`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS records (
                collection       TEXT NOT NULL,
                id               TEXT NOT NULL,
                fields           TEXT NOT NULL,
                local_version    INTEGER NOT NULL,
                server_version   TEXT,
                tombstone        INTEGER NOT NULL DEFAULT 0,
                conflict         INTEGER NOT NULL DEFAULT 0,
                updated_wall     INTEGER NOT NULL,
                updated_logical  INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE TABLE IF NOT EXISTS outbox (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                collection       TEXT NOT NULL,
                id               TEXT NOT NULL,
                kind             TEXT NOT NULL,
                patch            TEXT NOT NULL,
                ts_wall          INTEGER NOT NULL,
                ts_logical       INTEGER NOT NULL,
                base_version     TEXT,
                UNIQUE (collection, id)
            );

            CREATE TABLE IF NOT EXISTS cursors (
                collection       TEXT PRIMARY KEY,
                cursor           TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Row mapping ──────────────────────────────────────────────

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Record, String)> {
        let fields_json: String = row.get("fields")?;
        let record = Record {
            collection: row.get("collection")?,
            id: RecordId::from_string(row.get::<_, String>("id")?),
            fields: BTreeMap::new(),
            local_version: row.get::<_, i64>("local_version")? as u64,
            server_version: row
                .get::<_, Option<String>>("server_version")?
                .map(VersionToken::new),
            tombstone: row.get::<_, i64>("tombstone")? != 0,
            conflict: row.get::<_, i64>("conflict")? != 0,
            updated_at: HybridTimestamp::new(
                row.get::<_, i64>("updated_wall")? as u64,
                row.get::<_, i64>("updated_logical")? as u32,
            ),
        };
        Ok((record, fields_json))
    }

    fn decode_record(row_result: (Record, String)) -> StorageResult<Record> {
        let (mut record, fields_json) = row_result;
        record.fields = serde_json::from_str(&fields_json)?;
        Ok(record)
    }

    fn row_to_mutation(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Mutation, String)> {
        let patch_json: String = row.get("patch")?;
        let kind_str: String = row.get("kind")?;
        let mutation = Mutation {
            seq: row.get::<_, i64>("seq")? as u64,
            kind: MutationKind::parse(&kind_str).unwrap_or(MutationKind::Update),
            collection: row.get("collection")?,
            id: RecordId::from_string(row.get::<_, String>("id")?),
            patch: Patch::new(),
            timestamp: HybridTimestamp::new(
                row.get::<_, i64>("ts_wall")? as u64,
                row.get::<_, i64>("ts_logical")? as u32,
            ),
            base_version: row
                .get::<_, Option<String>>("base_version")?
                .map(VersionToken::new),
        };
        Ok((mutation, patch_json))
    }

    fn decode_mutation(row_result: (Mutation, String)) -> StorageResult<Mutation> {
        let (mut mutation, patch_json) = row_result;
        mutation.patch = serde_json::from_str(&patch_json)?;
        Ok(mutation)
    }

    fn get_record_tx(
        conn: &Connection,
        collection: &str,
        id: &RecordId,
    ) -> StorageResult<Option<Record>> {
        let row = conn
            .query_row(
                "SELECT collection, id, fields, local_version, server_version,
                        tombstone, conflict, updated_wall, updated_logical
                 FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id.as_str()],
                Self::row_to_record,
            )
            .optional()?;
        row.map(Self::decode_record).transpose()
    }

    fn put_record_tx(conn: &Connection, record: &Record) -> StorageResult<()> {
        let fields_json = serde_json::to_string(&record.fields)?;
        conn.execute(
            "INSERT OR REPLACE INTO records
                (collection, id, fields, local_version, server_version,
                 tombstone, conflict, updated_wall, updated_logical)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.collection,
                record.id.as_str(),
                fields_json,
                record.local_version as i64,
                record.server_version.as_ref().map(|v| v.as_str()),
                record.tombstone as i64,
                record.conflict as i64,
                record.updated_at.wall_time() as i64,
                record.updated_at.logical() as i64,
            ],
        )?;
        Ok(())
    }

    fn peek_pending_tx(
        conn: &Connection,
        collection: &str,
        id: &RecordId,
    ) -> StorageResult<Option<Mutation>> {
        let row = conn
            .query_row(
                "SELECT seq, collection, id, kind, patch, ts_wall, ts_logical, base_version
                 FROM outbox WHERE collection = ?1 AND id = ?2",
                params![collection, id.as_str()],
                Self::row_to_mutation,
            )
            .optional()?;
        row.map(Self::decode_mutation).transpose()
    }

    fn insert_outbox_tx(conn: &Connection, mutation: &Mutation) -> StorageResult<u64> {
        let patch_json = serde_json::to_string(&mutation.patch)?;
        conn.execute(
            "INSERT INTO outbox (collection, id, kind, patch, ts_wall, ts_logical, base_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                mutation.collection,
                mutation.id.as_str(),
                mutation.kind.as_str(),
                patch_json,
                mutation.timestamp.wall_time() as i64,
                mutation.timestamp.logical() as i64,
                mutation.base_version.as_ref().map(|v| v.as_str()),
            ],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    /// Coalesces `mutation` into the pending entry, keeping the entry's
    /// sequence number so per-record order is preserved.
    fn coalesce_outbox_tx(
        conn: &Connection,
        pending: &Mutation,
        kind: MutationKind,
        patch: &Patch,
        timestamp: HybridTimestamp,
    ) -> StorageResult<u64> {
        let patch_json = serde_json::to_string(patch)?;
        conn.execute(
            "UPDATE outbox SET kind = ?1, patch = ?2, ts_wall = ?3, ts_logical = ?4
             WHERE seq = ?5",
            params![
                kind.as_str(),
                patch_json,
                timestamp.wall_time() as i64,
                timestamp.logical() as i64,
                pending.seq as i64,
            ],
        )?;
        debug!(
            collection = %pending.collection,
            id = %pending.id,
            seq = pending.seq,
            "coalesced local write into pending outbox entry"
        );
        Ok(pending.seq)
    }
}

impl LocalStore for SqliteStore {
    fn get(&self, collection: &str, id: &RecordId) -> StorageResult<Option<Record>> {
        let conn = self.conn.lock().unwrap();
        Self::get_record_tx(&conn, collection, id)
    }

    fn put(&self, record: &Record) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        Self::put_record_tx(&conn, record)
    }

    fn query(
        &self,
        collection: &str,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> StorageResult<Vec<Record>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT collection, id, fields, local_version, server_version,
                    tombstone, conflict, updated_wall, updated_logical
             FROM records WHERE collection = ?1 AND tombstone = 0
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![collection], Self::row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            let record = Self::decode_record(row?)?;
            if predicate(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn apply_mutation(&self, mutation: &Mutation) -> StorageResult<u64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing = Self::get_record_tx(&tx, &mutation.collection, &mutation.id)?;
        let pending = Self::peek_pending_tx(&tx, &mutation.collection, &mutation.id)?;

        let seq = match mutation.kind {
            MutationKind::Create | MutationKind::Update => {
                if let Some(ref record) = existing {
                    if record.tombstone {
                        return Err(StorageError::Deleted {
                            collection: mutation.collection.clone(),
                            id: mutation.id.to_string(),
                        });
                    }
                } else if mutation.kind == MutationKind::Update {
                    return Err(StorageError::NotFound {
                        collection: mutation.collection.clone(),
                        id: mutation.id.to_string(),
                    });
                }

                let seq = match &pending {
                    Some(entry) => {
                        // A later update replaces the pending patch rather
                        // than appending a second entry.
                        let mut merged = entry.patch.clone();
                        merged.merge(&mutation.patch);
                        Self::coalesce_outbox_tx(
                            &tx,
                            entry,
                            entry.kind,
                            &merged,
                            mutation.timestamp,
                        )?
                    }
                    None => {
                        let mut to_insert = mutation.clone();
                        // A write to an existing record is an update against
                        // the last server revision this replica has seen.
                        if let Some(ref record) = existing {
                            to_insert.base_version = record.server_version.clone();
                        }
                        Self::insert_outbox_tx(&tx, &to_insert)?
                    }
                };

                // Optimistic local apply.
                let record = match existing {
                    Some(mut record) => {
                        mutation.patch.apply_to(&mut record.fields);
                        record.local_version += 1;
                        record.updated_at = mutation.timestamp;
                        record
                    }
                    None => {
                        let mut fields = BTreeMap::new();
                        mutation.patch.apply_to(&mut fields);
                        Record::new(
                            mutation.collection.clone(),
                            mutation.id.clone(),
                            fields,
                            mutation.timestamp,
                        )
                    }
                };
                Self::put_record_tx(&tx, &record)?;
                seq
            }
            MutationKind::Delete => {
                let Some(mut record) = existing else {
                    return Err(StorageError::NotFound {
                        collection: mutation.collection.clone(),
                        id: mutation.id.to_string(),
                    });
                };
                if record.tombstone && pending.is_none() {
                    // Deletion already synced; nothing left to enqueue.
                    return Err(StorageError::Deleted {
                        collection: mutation.collection.clone(),
                        id: mutation.id.to_string(),
                    });
                }

                let seq = match &pending {
                    Some(entry) if entry.kind == MutationKind::Create => {
                        // The record never reached the remote; retract the
                        // create instead of pushing a delete for it.
                        tx.execute("DELETE FROM outbox WHERE seq = ?1", params![entry.seq as i64])?;
                        entry.seq
                    }
                    Some(entry) => Self::coalesce_outbox_tx(
                        &tx,
                        entry,
                        MutationKind::Delete,
                        &Patch::new(),
                        mutation.timestamp,
                    )?,
                    None => {
                        let mut to_insert = mutation.clone();
                        to_insert.base_version = record.server_version.clone();
                        Self::insert_outbox_tx(&tx, &to_insert)?
                    }
                };

                record.tombstone_at(mutation.timestamp);
                Self::put_record_tx(&tx, &record)?;
                seq
            }
        };

        tx.commit()?;
        Ok(seq)
    }

    fn cursor(&self, collection: &str) -> StorageResult<Option<SyncCursor>> {
        let conn = self.conn.lock().unwrap();
        let cursor = conn
            .query_row(
                "SELECT cursor FROM cursors WHERE collection = ?1",
                params![collection],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(cursor.map(SyncCursor::new))
    }

    fn merge_remote_batch(
        &self,
        collection: &str,
        records: &[Record],
        cursor: &SyncCursor,
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for record in records {
            Self::put_record_tx(&tx, record)?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO cursors (collection, cursor) VALUES (?1, ?2)",
            params![collection, cursor.as_str()],
        )?;

        tx.commit()?;
        debug!(
            collection,
            merged = records.len(),
            cursor = %cursor,
            "merged remote batch and advanced cursor"
        );
        Ok(())
    }

    fn mark_synced(
        &self,
        mutation: &Mutation,
        server_version: Option<&VersionToken>,
    ) -> StorageResult<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let pending = Self::peek_pending_tx(&tx, &mutation.collection, &mutation.id)?;
        let cleared = match pending {
            Some(entry)
                if entry.seq == mutation.seq && entry.timestamp == mutation.timestamp =>
            {
                tx.execute("DELETE FROM outbox WHERE seq = ?1", params![entry.seq as i64])?;
                true
            }
            Some(entry) => {
                // The record changed again between the batch read and the
                // push result; the remainder stays pending, rebased onto the
                // server revision the push produced.
                tx.execute(
                    "UPDATE outbox SET base_version = ?1 WHERE seq = ?2",
                    params![server_version.map(|v| v.as_str()), entry.seq as i64],
                )?;
                false
            }
            None => true,
        };

        if let Some(version) = server_version {
            tx.execute(
                "UPDATE records SET server_version = ?1 WHERE collection = ?2 AND id = ?3",
                params![version.as_str(), mutation.collection, mutation.id.as_str()],
            )?;
        }

        tx.commit()?;
        Ok(cleared)
    }

    fn rebase_pending(
        &self,
        collection: &str,
        id: &RecordId,
        server_version: Option<&VersionToken>,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE outbox SET base_version = ?1 WHERE collection = ?2 AND id = ?3",
            params![server_version.map(|v| v.as_str()), collection, id.as_str()],
        )?;
        Ok(())
    }

    fn set_conflict(&self, collection: &str, id: &RecordId, flagged: bool) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE records SET conflict = ?1 WHERE collection = ?2 AND id = ?3",
            params![flagged as i64, collection, id.as_str()],
        )?;
        Ok(())
    }
}

impl MutationOutbox for SqliteStore {
    fn pending_batch(&self, collection: &str, max: usize) -> StorageResult<Vec<Mutation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT seq, collection, id, kind, patch, ts_wall, ts_logical, base_version
             FROM outbox WHERE collection = ?1 ORDER BY seq LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![collection, max as i64], Self::row_to_mutation)?;

        let mut mutations = Vec::new();
        for row in rows {
            mutations.push(Self::decode_mutation(row?)?);
        }
        Ok(mutations)
    }

    fn acknowledge(&self, seqs: &[u64]) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for seq in seqs {
            tx.execute("DELETE FROM outbox WHERE seq = ?1", params![*seq as i64])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn peek_pending(&self, collection: &str, id: &RecordId) -> StorageResult<Option<Mutation>> {
        let conn = self.conn.lock().unwrap();
        Self::peek_pending_tx(&conn, collection, id)
    }

    fn pending_count(&self, collection: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
