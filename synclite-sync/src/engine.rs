//! The sync engine: pull, push, reconcile.
//!
//! One engine instance owns one backend adapter and one local store. A sync
//! cycle is pull-then-push per collection: remote changes merge first so
//! pushes carry current base versions and conflicts surface locally, where
//! the resolver can see both sides. Cycles are serialized on an internal
//! lock; callers can trigger them from anywhere.
//!
//! Every adapter call goes through one retry path: bounded attempts with
//! exponential backoff for transient errors, a single token renewal for auth
//! rejections, and a hard timeout per call. Storage errors are never
//! retried — the outbox must stay intact.

use crate::adapter::{BackendAdapter, PushOutcome};
use crate::auth::{AuthToken, TokenManager};
use crate::config::SyncConfig;
use crate::error::{FailureKind, SyncError, SyncResult};
use crate::merge::RemoteMerger;
use crate::realtime::{InFlightTracker, RealtimeMerger};
use crate::resolver::{ConflictRecord, ConflictStrategy, Resolution};
use crate::state::{CollectionOutcome, SyncPhase, SyncReport};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use synclite_store::{LocalStore, MutationOutbox};
use synclite_types::{HybridTimestamp, Mutation, Patch, RecordId};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// Orchestrates synchronization between a [`LocalStore`] and a
/// [`BackendAdapter`].
pub struct SyncEngine<A: BackendAdapter, S: LocalStore + MutationOutbox> {
    adapter: Arc<A>,
    store: Arc<S>,
    config: SyncConfig,
    tokens: Arc<TokenManager<A>>,
    merger: RemoteMerger<S>,
    tracker: Arc<InFlightTracker>,
    clock: Arc<StdMutex<HybridTimestamp>>,
    phase_tx: watch::Sender<SyncPhase>,
    conflict_rx: StdMutex<Option<mpsc::Receiver<ConflictRecord>>>,
    cancelled: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    // Serializes cycles; a trigger while one runs waits for it.
    cycle_lock: Mutex<()>,
}

impl<A, S> SyncEngine<A, S>
where
    A: BackendAdapter,
    S: LocalStore + MutationOutbox + 'static,
{
    /// Creates an engine. The strategy settles conflicts for every
    /// collection; hosts wanting per-collection policies compose one
    /// strategy that dispatches internally.
    pub fn new(
        adapter: Arc<A>,
        store: Arc<S>,
        strategy: Arc<dyn ConflictStrategy>,
        config: SyncConfig,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SyncPhase::Idle);
        let (shutdown_tx, _) = watch::channel(false);
        let (conflict_tx, conflict_rx) = mpsc::channel(config.channel_capacity);
        let clock = Arc::new(StdMutex::new(HybridTimestamp::now()));
        let tokens = Arc::new(TokenManager::new(Arc::clone(&adapter), &config));
        let merger = RemoteMerger::new(
            Arc::clone(&store),
            strategy,
            conflict_tx,
            Arc::clone(&clock),
        );

        Self {
            adapter,
            store,
            config,
            tokens,
            merger,
            tracker: Arc::new(InFlightTracker::default()),
            clock,
            phase_tx,
            conflict_rx: StdMutex::new(Some(conflict_rx)),
            cancelled: AtomicBool::new(false),
            shutdown_tx,
            cycle_lock: Mutex::new(()),
        }
    }

    // ── Local writes ─────────────────────────────────────────────

    /// Creates a record locally and enqueues it for push. Returns the new
    /// record's id.
    pub fn create(&self, collection: &str, patch: Patch) -> SyncResult<RecordId> {
        let id = RecordId::new();
        let mutation = Mutation::create(collection, id.clone(), patch, self.tick());
        self.store.apply_mutation(&mutation)?;
        Ok(id)
    }

    /// Updates a record locally and enqueues the change for push.
    pub fn update(&self, collection: &str, id: &RecordId, patch: Patch) -> SyncResult<()> {
        // Base version is stamped by the store from the record's last known
        // server revision.
        let mutation = Mutation::update(collection, id.clone(), patch, self.tick(), None);
        self.store.apply_mutation(&mutation)?;
        Ok(())
    }

    /// Deletes a record locally (tombstone) and enqueues the delete.
    pub fn delete(&self, collection: &str, id: &RecordId) -> SyncResult<()> {
        let mutation = Mutation::delete(collection, id.clone(), self.tick(), None);
        self.store.apply_mutation(&mutation)?;
        Ok(())
    }

    fn tick(&self) -> HybridTimestamp {
        let mut clock = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        *clock = clock.tick();
        *clock
    }

    // ── Observation and control ──────────────────────────────────

    /// Returns a receiver of engine phase transitions.
    pub fn observe_state(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    /// Takes the conflict notification stream. Can be taken once; the
    /// durable conflict flag on records is the guaranteed signal, this
    /// stream is live observation.
    pub fn take_conflict_stream(&self) -> Option<mpsc::Receiver<ConflictRecord>> {
        self.conflict_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Requests cancellation of the running cycle. The cycle stops at the
    /// next batch boundary; completed batches stay merged.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Signals the realtime merger (and any other background task holding a
    /// shutdown receiver) to stop, and cancels the running cycle.
    pub fn shutdown(&self) {
        self.cancel();
        let _ = self.shutdown_tx.send(true);
    }

    /// Seeds the token manager with credentials obtained out of band.
    pub async fn install_token(&self, token: AuthToken) {
        self.tokens.install(token).await;
    }

    /// The engine's local store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Builds the realtime merger companion for this engine. Run it on its
    /// own task; it stops when [`Self::shutdown`] is called.
    pub fn realtime_merger(&self) -> RealtimeMerger<A, S> {
        RealtimeMerger::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.store),
            Arc::clone(&self.tokens),
            self.merger.clone(),
            Arc::clone(&self.tracker),
            self.config.collections.clone(),
            self.config.backoff.clone(),
            self.shutdown_tx.subscribe(),
        )
    }

    /// Settles a conflict the strategy declined. Clears the conflict flag
    /// and applies the host's decision.
    pub fn resolve_conflict(
        &self,
        conflict: &ConflictRecord,
        resolution: Resolution,
    ) -> SyncResult<()> {
        let collection = conflict.mutation.collection.as_str();
        let id = &conflict.mutation.id;

        match resolution {
            Resolution::ApplyRemote => {
                let mut record = conflict.server.clone();
                record.conflict = false;
                self.store.put(&record)?;
                if let Some(pending) = self.store.peek_pending(collection, id)? {
                    self.store.acknowledge(&[pending.seq])?;
                }
            }
            Resolution::ApplyLocal => {
                self.store.rebase_pending(
                    collection,
                    id,
                    conflict.server.server_version.as_ref(),
                )?;
            }
            Resolution::Merged(mut merged) => {
                merged.server_version = conflict.server.server_version.clone();
                merged.conflict = false;
                self.store.put(&merged)?;
                if let Some(pending) = self.store.peek_pending(collection, id)? {
                    self.store.acknowledge(&[pending.seq])?;
                }
                let requeue = Mutation::update(
                    collection,
                    id.clone(),
                    Patch::replacement(&merged.fields, &conflict.server.fields),
                    self.tick(),
                    conflict.server.server_version.clone(),
                );
                self.store.apply_mutation(&requeue)?;
            }
            Resolution::Unresolved => return Ok(()),
        }
        self.store.set_conflict(collection, id, false)?;
        Ok(())
    }

    // ── The cycle ────────────────────────────────────────────────

    /// Runs one full sync cycle over all configured collections.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        let collections = self.config.collections.clone();
        self.sync_collections(&collections).await
    }

    /// Runs one sync cycle over the given collections.
    ///
    /// A collection that fails with a transient error is recorded in the
    /// report and the others still run; the cycle ends in `Failed` if any
    /// did. Auth and storage failures abort the whole cycle. The outbox is
    /// never drained on failure.
    pub async fn sync_collections(&self, collections: &[String]) -> SyncResult<SyncReport> {
        let _cycle = self.cycle_lock.lock().await;
        self.cancelled.store(false, Ordering::SeqCst);

        info!(device = %self.config.device_name, backend = self.adapter.backend_name(),
              collections = collections.len(), "sync cycle starting");

        self.set_phase(SyncPhase::Authenticating);
        if let Err(err) = self.tokens.valid_token().await {
            self.set_phase(SyncPhase::Failed(FailureKind::Auth));
            return Err(err);
        }

        let mut report = SyncReport::default();
        let mut halted: Option<FailureKind> = None;
        for collection in collections {
            report
                .collections
                .push(CollectionOutcome::new(collection.clone()));
        }

        // Pull before push so pushes carry current base versions.
        self.set_phase(SyncPhase::Pulling);
        for outcome in &mut report.collections {
            let collection = outcome.collection.clone();
            if let Err(err) = self.pull_collection(&collection, outcome).await {
                self.route_cycle_error(&collection, err, outcome, &mut halted)?;
            }
        }

        self.set_phase(SyncPhase::Pushing);
        for outcome in &mut report.collections {
            if outcome.error.is_some() {
                continue;
            }
            let collection = outcome.collection.clone();
            if let Err(err) = self.push_collection(&collection, outcome).await {
                self.route_cycle_error(&collection, err, outcome, &mut halted)?;
            }
        }

        // One extra round for mutations produced by conflict resolution
        // during this cycle.
        self.set_phase(SyncPhase::Reconciling);
        for outcome in &mut report.collections {
            if outcome.error.is_some() {
                continue;
            }
            let collection = outcome.collection.clone();
            if self.store.pending_count(&collection)? == 0 {
                continue;
            }
            if let Err(err) = self.push_round(&collection, outcome).await {
                self.route_cycle_error(&collection, err, outcome, &mut halted)?;
            }
        }

        self.finish(report, halted)
    }

    /// Routes a per-collection error: transient and protocol errors are
    /// recorded in the report and the cycle continues with the other
    /// collections; auth, storage, and cancellation abort it.
    fn route_cycle_error(
        &self,
        collection: &str,
        err: SyncError,
        outcome: &mut CollectionOutcome,
        halted: &mut Option<FailureKind>,
    ) -> SyncResult<()> {
        match err.failure_kind() {
            Some(FailureKind::TransientNetwork) | None if !matches!(err, SyncError::Cancelled) => {
                warn!(collection, error = %err, "collection sync failed, continuing with others");
                outcome.error = Some(err.to_string());
                halted.get_or_insert(FailureKind::TransientNetwork);
                Ok(())
            }
            Some(kind) => {
                self.set_phase(SyncPhase::Failed(kind));
                Err(err)
            }
            None => {
                self.set_phase(SyncPhase::Cancelled);
                Err(SyncError::Cancelled)
            }
        }
    }

    fn finish(&self, report: SyncReport, halted: Option<FailureKind>) -> SyncResult<SyncReport> {
        match halted {
            Some(kind) => self.set_phase(SyncPhase::Failed(kind)),
            None => self.set_phase(SyncPhase::Idle),
        }
        info!(
            pulled = report.pulled(),
            pushed = report.pushed(),
            conflicts = report.conflicts(),
            clean = report.is_clean(),
            "sync cycle finished"
        );
        Ok(report)
    }

    // ── Pull ─────────────────────────────────────────────────────

    async fn pull_collection(
        &self,
        collection: &str,
        outcome: &mut CollectionOutcome,
    ) -> SyncResult<()> {
        let mut cursor = self.store.cursor(collection)?;
        loop {
            self.check_cancelled()?;

            let adapter = Arc::clone(&self.adapter);
            let coll = collection.to_string();
            let cur = cursor.clone();
            let batch = self
                .with_retry("fetch_changes", move |token| {
                    let adapter = Arc::clone(&adapter);
                    let coll = coll.clone();
                    let cur = cur.clone();
                    async move { adapter.fetch_changes(&coll, cur.as_ref(), &token).await }
                })
                .await?;

            let stats = self
                .merger
                .merge_batch(collection, &batch.records, &batch.next_cursor)?;
            outcome.pulled += stats.merged;
            outcome.conflicts += stats.conflicts;
            debug!(collection, merged = stats.merged, conflicts = stats.conflicts,
                   has_more = batch.has_more, "pulled batch");

            cursor = Some(batch.next_cursor);
            if !batch.has_more {
                return Ok(());
            }
        }
    }

    // ── Push ─────────────────────────────────────────────────────

    async fn push_collection(
        &self,
        collection: &str,
        outcome: &mut CollectionOutcome,
    ) -> SyncResult<()> {
        loop {
            self.check_cancelled()?;
            if !self.push_round(collection, outcome).await? {
                return Ok(());
            }
        }
    }

    /// Pushes one batch. Returns true if the round shrank the queue (so the
    /// caller should run another).
    async fn push_round(
        &self,
        collection: &str,
        outcome: &mut CollectionOutcome,
    ) -> SyncResult<bool> {
        let pending = self
            .store
            .pending_batch(collection, self.config.push_batch_size)?;

        // Conflict-flagged records wait for the host; everything else goes.
        let mut batch = Vec::with_capacity(pending.len());
        for mutation in pending {
            let flagged = self
                .store
                .get(collection, &mutation.id)?
                .map(|r| r.conflict)
                .unwrap_or(false);
            if !flagged {
                batch.push(mutation);
            }
        }
        if batch.is_empty() {
            return Ok(false);
        }

        // Realtime deltas for these records are parked until the push
        // settles, so stream order can't interleave with the outcome.
        let keys: Vec<_> = batch
            .iter()
            .map(|m| (m.collection.clone(), m.id.to_string()))
            .collect();
        self.tracker.begin(keys.iter().cloned());

        let adapter = Arc::clone(&self.adapter);
        let to_push = batch.clone();
        let result = self
            .with_retry("push_mutations", move |token| {
                let adapter = Arc::clone(&adapter);
                let to_push = to_push.clone();
                async move { adapter.push_mutations(&to_push, &token).await }
            })
            .await;

        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(err) => {
                self.drain_parked(&keys)?;
                return Err(err);
            }
        };
        if outcomes.len() != batch.len() {
            self.drain_parked(&keys)?;
            return Err(SyncError::Protocol(format!(
                "pushed {} mutations, got {} outcomes",
                batch.len(),
                outcomes.len()
            )));
        }

        let mut progressed = false;
        for (mutation, push_outcome) in batch.iter().zip(outcomes) {
            match push_outcome {
                PushOutcome::Accepted { server_version } => {
                    let cleared = self.store.mark_synced(mutation, server_version.as_ref())?;
                    if !cleared {
                        debug!(collection, id = %mutation.id,
                               "record changed mid-push, remainder stays pending");
                    }
                    outcome.pushed += 1;
                    progressed = true;
                }
                PushOutcome::RejectedStale { server_record } => {
                    debug!(collection, id = %mutation.id, "push rejected as stale, resolving");
                    let stats = self.merger.resolve_stale_push(mutation, &server_record)?;
                    outcome.conflicts += stats.conflicts;
                    // Not progress: the resolution either dropped the entry
                    // (counted next round as an empty batch) or left it for
                    // the reconcile round.
                }
                PushOutcome::RejectedInvalid { reason } => {
                    warn!(collection, id = %mutation.id, reason,
                          "push rejected permanently, discarding mutation");
                    self.store.acknowledge(&[mutation.seq])?;
                    outcome.permanent_failures += 1;
                    progressed = true;
                }
                PushOutcome::TransientFailure { reason } => {
                    debug!(collection, id = %mutation.id, reason,
                           "transient push failure, mutation stays pending");
                }
            }
        }

        self.drain_parked(&keys)?;
        Ok(progressed)
    }

    /// Releases the in-flight marks and merges any realtime deltas that
    /// arrived for those records while the push was out.
    fn drain_parked(&self, keys: &[(String, String)]) -> SyncResult<()> {
        for delta in self.tracker.finish(keys.iter().cloned()) {
            self.merger.merge_delta(&delta)?;
        }
        Ok(())
    }

    // ── Retry plumbing ───────────────────────────────────────────

    /// Runs one adapter call with the engine's retry policy: per-call
    /// timeout, bounded retries with backoff for transient errors, one token
    /// renewal for an auth rejection.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> SyncResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt: u32 = 0;
        let mut auth_renewed = false;
        loop {
            self.check_cancelled()?;
            let token = self.tokens.valid_token().await?;

            let err = match tokio::time::timeout(self.config.call_timeout, call(token)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => SyncError::Timeout,
            };

            match err {
                err if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.config.max_retries {
                        warn!(op, attempts = attempt, error = %err, "retries exhausted");
                        return Err(err);
                    }
                    let delay = self.config.backoff.delay_for_attempt(attempt - 1);
                    debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %err,
                           "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                }
                SyncError::Auth(msg) => {
                    if auth_renewed {
                        return Err(SyncError::Auth(msg));
                    }
                    auth_renewed = true;
                    debug!(op, "auth rejected, renewing token once");
                    self.tokens.on_unauthorized().await?;
                }
                other => return Err(other),
            }
        }
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        debug!(%phase, "phase transition");
        self.phase_tx.send_replace(phase);
    }
}
