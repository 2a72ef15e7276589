//! Offline-first synchronization engine for SyncLite.
//!
//! The host application reads and writes the local replica
//! ([`synclite_store::LocalStore`]) and is never blocked by the network:
//! every write lands locally and in the durable outbox in one transaction,
//! and the engine drains the outbox to a backend behind the
//! [`BackendAdapter`] contract whenever connectivity allows.
//!
//! The pieces:
//! - [`SyncEngine`] — pull/push/reconcile cycles with retry and backoff
//! - [`BackendAdapter`] — the one trait a remote backend implements
//! - [`ConflictStrategy`] — pluggable, deterministic conflict policy
//! - [`TokenManager`] — access-token lifecycle with proactive refresh
//! - [`RealtimeMerger`] — merges server-pushed deltas through the same
//!   path as batch pull
//! - [`SyncScheduler`] — periodic and on-demand cycle driver

pub mod adapter;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
mod merge;
pub mod realtime;
pub mod resolver;
pub mod scheduler;
pub mod state;

pub use adapter::{BackendAdapter, ChangeBatch, DeltaStream, PushOutcome, RemoteDelta, ResumePoint};
pub use auth::{AuthToken, TokenManager};
pub use config::{BackoffConfig, SyncConfig};
pub use engine::SyncEngine;
pub use error::{FailureKind, SyncError, SyncResult};
pub use realtime::RealtimeMerger;
pub use resolver::{
    ConflictContext, ConflictOutcome, ConflictRecord, ConflictStrategy, FieldMerge, LastWriteWins,
    ManualResolution, Resolution,
};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use state::{CollectionOutcome, SyncPhase, SyncReport};
