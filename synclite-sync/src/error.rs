//! Error types for the sync layer.
//!
//! The taxonomy matters more than the messages: the engine routes on it.
//! Transient errors are retried with backoff, auth errors pause sync until
//! credentials refresh, permanent rejections discard the mutation, and
//! storage errors halt the cycle — the outbox is never silently drained.

use synclite_store::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient network error — retried with backoff.
    #[error("transient network error: {0}")]
    Transient(String),

    /// An adapter call exceeded its timeout. Treated as transient.
    #[error("operation timed out")]
    Timeout,

    /// Authentication error — sync pauses until credentials refresh.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The backend rejected a mutation as invalid; it will never succeed by
    /// retry and has been discarded.
    #[error("permanent rejection for {collection}/{id}: {reason}")]
    PermanentRejection {
        /// Target collection.
        collection: String,
        /// Target record.
        id: String,
        /// Backend-supplied reason.
        reason: String,
    },

    /// Storage failure — fatal for the current operation; the mutation
    /// remains in the outbox.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error (adapter returned a malformed response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The sync cycle was cancelled by the caller.
    #[error("sync cancelled")]
    Cancelled,

    /// An internal channel closed (engine shut down).
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_) | SyncError::Timeout)
    }

    /// Returns the failure kind this error escalates to when retries are
    /// exhausted, if it halts the cycle.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SyncError::Transient(_) | SyncError::Timeout => Some(FailureKind::TransientNetwork),
            SyncError::Auth(_) => Some(FailureKind::Auth),
            SyncError::Storage(_) => Some(FailureKind::Storage),
            _ => None,
        }
    }
}

/// Why a sync cycle entered the `Failed` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credential refresh failed after bounded retries.
    Auth,
    /// Network errors exhausted the retry bound.
    TransientNetwork,
    /// The local store reported an I/O failure.
    Storage,
}
