//! SQLite storage layer for SyncLite.
//!
//! Provides the durable local replica (records), the mutation outbox, and
//! per-collection pull cursors, all inside one SQLite file so that a local
//! write and its outbox entry commit in a single transaction.
//!
//! # Architecture
//!
//! - Records are stored as JSON field maps with sync bookkeeping columns
//!   (local version, server version token, tombstone and conflict flags)
//! - The outbox is an append-only queue keyed by an AUTOINCREMENT sequence,
//!   indexed by target so later writes coalesce into the pending entry
//! - Cursors advance in the same transaction that merges the pulled batch,
//!   so a crash can re-pull but never skip a batch
//!
//! The sync engine consumes this crate through the [`LocalStore`] and
//! [`MutationOutbox`] contracts; hosts with their own persistence can
//! implement those instead.

mod error;
mod sqlite;
mod traits;

pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteStore;
pub use traits::{LocalStore, MutationOutbox};
