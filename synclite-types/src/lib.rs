//! Core type definitions for SyncLite.
//!
//! This crate defines the fundamental, backend-agnostic types shared by the
//! local store and the sync engine:
//! - Record and device identifiers (UUID v7)
//! - Hybrid Logical Clock timestamps
//! - Records, field patches, and outbox mutations
//! - Opaque server version tokens and pull cursors
//!
//! Backend-specific shapes (wire requests, auth payloads, rate limits) do not
//! belong here — they live behind the adapter contract in `synclite-sync`.

mod ids;
mod mutation;
mod record;
mod timestamp;

pub use ids::{DeviceId, RecordId};
pub use mutation::{Mutation, MutationKind, Patch};
pub use record::{Record, SyncCursor, VersionToken};
pub use timestamp::HybridTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from parsing the crate's identifier types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid device id: {0}")]
    InvalidDeviceId(#[from] uuid::Error),
}
