//! Mutation types — the unit of the outbox.
//!
//! A mutation is one unsynced local write. Mutations are immutable once
//! pushed; before a push, a later write to the same record coalesces into the
//! pending mutation's patch so each record costs at most one network round
//! trip per cycle.

use crate::{HybridTimestamp, RecordId, VersionToken};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The kind of operation a mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// The record did not exist locally before this write.
    Create,
    /// A field-level update to an existing record.
    Update,
    /// A soft delete.
    Delete,
}

impl MutationKind {
    /// Returns the kind's stable string form (used by the store).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(MutationKind::Create),
            "update" => Some(MutationKind::Update),
            "delete" => Some(MutationKind::Delete),
            _ => None,
        }
    }
}

/// A field-level patch: field name to new value.
///
/// `Value::Null` removes the field. Patches are ordered maps so serialized
/// forms are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(BTreeMap<String, Value>);

impl Patch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a patch from an iterator of field/value pairs.
    pub fn from_fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Sets a field in the patch.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        self.0.insert(field.into(), value);
        self
    }

    /// Returns the patched value for a field, if the patch touches it.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns true if the patch touches no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the set of fields this patch touches.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterates over field/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlays `later` onto this patch: later values win per field.
    ///
    /// This is the outbox coalescing primitive — two unsynced updates to the
    /// same record collapse into one patch reflecting the final state.
    pub fn merge(&mut self, later: &Patch) {
        for (k, v) in &later.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Builds a patch that rewrites a record to exactly `fields`.
    ///
    /// Fields present in `previous` but absent from `fields` become explicit
    /// nulls, so applying the patch removes them instead of leaving stale
    /// values behind.
    #[must_use]
    pub fn replacement(
        fields: &BTreeMap<String, Value>,
        previous: &BTreeMap<String, Value>,
    ) -> Self {
        let mut map = fields.clone();
        for key in previous.keys() {
            map.entry(key.clone()).or_insert(Value::Null);
        }
        Self(map)
    }

    /// Applies the patch to a field map. Null values remove fields.
    pub fn apply_to(&self, fields: &mut BTreeMap<String, Value>) {
        for (k, v) in &self.0 {
            if v.is_null() {
                fields.remove(k);
            } else {
                fields.insert(k.clone(), v.clone());
            }
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Patch {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self::from_fields(iter)
    }
}

/// An unsynced local write, queued in the outbox until the remote confirms
/// persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Outbox sequence number, assigned at enqueue time. Strictly increasing
    /// per device and never reused. Zero means "not yet enqueued".
    pub seq: u64,

    /// Operation kind.
    pub kind: MutationKind,

    /// Target collection.
    pub collection: String,

    /// Target record.
    pub id: RecordId,

    /// Field-level changes. Empty for deletes.
    pub patch: Patch,

    /// Client-generated timestamp (hybrid logical clock).
    pub timestamp: HybridTimestamp,

    /// The server version this mutation assumes as its base. `None` for
    /// creates. A push is rejected as stale when this no longer matches the
    /// server's current token.
    pub base_version: Option<VersionToken>,
}

impl Mutation {
    /// Creates a not-yet-enqueued mutation.
    #[must_use]
    pub fn new(
        kind: MutationKind,
        collection: impl Into<String>,
        id: RecordId,
        patch: Patch,
        timestamp: HybridTimestamp,
        base_version: Option<VersionToken>,
    ) -> Self {
        Self {
            seq: 0,
            kind,
            collection: collection.into(),
            id,
            patch,
            timestamp,
            base_version,
        }
    }

    /// Convenience constructor for a create.
    #[must_use]
    pub fn create(
        collection: impl Into<String>,
        id: RecordId,
        patch: Patch,
        timestamp: HybridTimestamp,
    ) -> Self {
        Self::new(MutationKind::Create, collection, id, patch, timestamp, None)
    }

    /// Convenience constructor for an update.
    #[must_use]
    pub fn update(
        collection: impl Into<String>,
        id: RecordId,
        patch: Patch,
        timestamp: HybridTimestamp,
        base_version: Option<VersionToken>,
    ) -> Self {
        Self::new(
            MutationKind::Update,
            collection,
            id,
            patch,
            timestamp,
            base_version,
        )
    }

    /// Convenience constructor for a delete.
    #[must_use]
    pub fn delete(
        collection: impl Into<String>,
        id: RecordId,
        timestamp: HybridTimestamp,
        base_version: Option<VersionToken>,
    ) -> Self {
        Self::new(
            MutationKind::Delete,
            collection,
            id,
            Patch::new(),
            timestamp,
            base_version,
        )
    }
}
