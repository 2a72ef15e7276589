//! Record types — the unit of replication.
//!
//! A record is identified by `(collection, id)` and carries a flat field map.
//! Deletes are soft: the record is tombstoned and retained until the remote
//! acknowledges the deletion, so a concurrent remote update can still be
//! detected as a conflict.

use crate::{HybridTimestamp, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque server-assigned version token.
///
/// The backend supplies one per record revision; the core never interprets
/// it beyond equality comparison. A push carries the token the mutation was
/// based on, and a mismatch is the backend's stale-rejection signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Wraps a backend-supplied token string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VersionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque per-collection pull watermark.
///
/// Backends hand one back with every change batch; the store persists it only
/// after the batch is durably merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    /// Wraps a backend-supplied cursor string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the cursor as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SyncCursor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A synced record: one document in one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Collection this record belongs to.
    pub collection: String,

    /// Identifier, unique within the collection.
    pub id: RecordId,

    /// The record's fields. Flat map; nested structure lives inside values.
    pub fields: BTreeMap<String, Value>,

    /// Monotonically increasing local version, bumped on every local write
    /// and every merge.
    pub local_version: u64,

    /// The server's version token for the last revision this replica has
    /// seen. `None` until the record has round-tripped once.
    pub server_version: Option<VersionToken>,

    /// Soft-delete flag. Tombstoned records are excluded from queries but
    /// retained until the remote acknowledges the deletion.
    pub tombstone: bool,

    /// Set while an unresolved conflict for this record is outstanding.
    pub conflict: bool,

    /// Timestamp of the last write applied to this record.
    pub updated_at: HybridTimestamp,
}

impl Record {
    /// Creates a new record with the given fields.
    #[must_use]
    pub fn new(
        collection: impl Into<String>,
        id: RecordId,
        fields: BTreeMap<String, Value>,
        updated_at: HybridTimestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            id,
            fields,
            local_version: 1,
            server_version: None,
            tombstone: false,
            conflict: false,
            updated_at,
        }
    }

    /// Returns a field value, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Marks this record as tombstoned at the given timestamp.
    pub fn tombstone_at(&mut self, at: HybridTimestamp) {
        self.tombstone = true;
        self.fields.clear();
        self.local_version += 1;
        self.updated_at = at;
    }
}
