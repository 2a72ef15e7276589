//! Backend adapter contract.
//!
//! One trait any remote document-store backend implements. The core never
//! branches on backend identity: everything it needs — incremental pull,
//! batched push with per-mutation outcomes, token lifecycle, a realtime
//! delta stream — is expressed here. Adapters never retry internally; all
//! retry policy lives in the sync engine so behavior is uniform across
//! backends.

use crate::auth::AuthToken;
use crate::error::SyncResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use synclite_types::{Mutation, Record, SyncCursor};

/// A batch of remote changes returned by [`BackendAdapter::fetch_changes`].
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Changed records since the cursor. Adapters fill `fields`,
    /// `server_version`, `tombstone`, and `updated_at`; local bookkeeping
    /// columns are overwritten on merge.
    pub records: Vec<Record>,
    /// Cursor to persist once this batch is durably merged.
    pub next_cursor: SyncCursor,
    /// True if another batch is immediately available.
    pub has_more: bool,
}

/// Per-mutation result of a push.
///
/// Returned in the same order as the pushed batch.
#[derive(Debug, Clone)]
pub enum PushOutcome {
    /// The mutation was persisted; the record's new server version token.
    Accepted {
        /// Version token of the revision the push produced.
        server_version: Option<synclite_types::VersionToken>,
    },
    /// The mutation's base version no longer matches the server's current
    /// revision. Carries the server's current record for conflict
    /// resolution.
    RejectedStale {
        /// The server's current revision of the record.
        server_record: Record,
    },
    /// The backend rejected the mutation outright; retrying can never
    /// succeed.
    RejectedInvalid {
        /// Backend-supplied reason.
        reason: String,
    },
    /// A retryable failure for this mutation only; it stays in the outbox
    /// for the next cycle.
    TransientFailure {
        /// Backend-supplied reason.
        reason: String,
    },
}

/// A server-pushed change delivered on the realtime stream.
#[derive(Debug, Clone)]
pub struct RemoteDelta {
    /// Collection the change belongs to.
    pub collection: String,
    /// The changed record, in the same shape as [`ChangeBatch::records`].
    pub record: Record,
    /// Cursor covering this delta, when the backend provides one; merging
    /// the delta advances the collection's durable pull position.
    pub cursor: Option<SyncCursor>,
}

/// The realtime delta stream: lazy, unbounded, restartable.
pub type DeltaStream = BoxStream<'static, SyncResult<RemoteDelta>>;

/// Resume point for a realtime subscription: collection and its last
/// durably-merged cursor.
pub type ResumePoint = (String, Option<SyncCursor>);

/// The capability set any remote service implements.
#[async_trait]
pub trait BackendAdapter: Send + Sync + 'static {
    /// Human-readable backend name, for logs.
    fn backend_name(&self) -> &'static str;

    /// Obtains a fresh token from backend-held credentials. Used when no
    /// refresh token is available.
    async fn authenticate(&self) -> SyncResult<AuthToken>;

    /// Exchanges a refresh token for a fresh access token.
    async fn refresh(&self, refresh_token: &str) -> SyncResult<AuthToken>;

    /// Fetches changes for one collection since the given cursor. `None`
    /// means "from the beginning".
    async fn fetch_changes(
        &self,
        collection: &str,
        cursor: Option<&SyncCursor>,
        access_token: &str,
    ) -> SyncResult<ChangeBatch>;

    /// Pushes a batch of mutations. Returns one outcome per mutation, in
    /// order. A batch-level failure (network, auth) is returned as `Err`
    /// and leaves every mutation pending.
    async fn push_mutations(
        &self,
        batch: &[Mutation],
        access_token: &str,
    ) -> SyncResult<Vec<PushOutcome>>;

    /// Opens the realtime delta stream, replaying from the given resume
    /// points. The stream ends (or yields `Err`) on disconnect; the caller
    /// re-subscribes from the last durably-merged cursors.
    async fn subscribe(
        &self,
        resume: Vec<ResumePoint>,
        access_token: &str,
    ) -> SyncResult<DeltaStream>;
}
