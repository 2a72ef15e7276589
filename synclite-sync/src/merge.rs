//! Remote-change merging.
//!
//! One merge path serves both the batch pull phase and the realtime delta
//! stream, so a record converges identically no matter which way its server
//! revision arrived. Incoming records are checked against the outbox: a
//! pending local mutation on the same record is a conflict and goes through
//! the configured [`ConflictStrategy`] before anything touches the replica.

use crate::adapter::RemoteDelta;
use crate::error::SyncResult;
use crate::resolver::{
    ConflictContext, ConflictOutcome, ConflictRecord, ConflictStrategy, Resolution,
};
use std::sync::{Arc, Mutex};
use synclite_store::{LocalStore, MutationOutbox};
use synclite_types::{HybridTimestamp, Mutation, Patch, Record, SyncCursor};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Follow-up work a merge decision requires once the batch write committed.
enum PostAction {
    /// Drop the pending outbox entry (remote won).
    Acknowledge(u64),
    /// Rebase the pending entry onto the incoming server version (local
    /// side survives and will be re-pushed).
    Rebase,
    /// Enqueue a full-field update carrying a merged record.
    Requeue(Mutation),
    /// Flag the record for host attention.
    Flag,
}

struct MergeDecision {
    /// Record to include in the durable batch write, if the incoming side
    /// (or a merge of both sides) should land in the replica.
    record: Option<Record>,
    conflict: Option<ConflictRecord>,
    post: Vec<PostAction>,
}

/// Tally of one merged batch.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MergeStats {
    pub merged: usize,
    pub conflicts: usize,
    pub requeued: usize,
}

/// Applies resolved remote records to the local replica.
pub(crate) struct RemoteMerger<S> {
    store: Arc<S>,
    strategy: Arc<dyn ConflictStrategy>,
    conflict_tx: mpsc::Sender<ConflictRecord>,
    clock: Arc<Mutex<HybridTimestamp>>,
}

impl<S: LocalStore + MutationOutbox> RemoteMerger<S> {
    pub(crate) fn new(
        store: Arc<S>,
        strategy: Arc<dyn ConflictStrategy>,
        conflict_tx: mpsc::Sender<ConflictRecord>,
        clock: Arc<Mutex<HybridTimestamp>>,
    ) -> Self {
        Self {
            store,
            strategy,
            conflict_tx,
            clock,
        }
    }

    /// Merges one pulled batch: resolves each record against the outbox,
    /// writes the surviving records and the cursor in one transaction, then
    /// runs the per-record follow-ups.
    pub(crate) fn merge_batch(
        &self,
        collection: &str,
        incoming: &[Record],
        next_cursor: &SyncCursor,
    ) -> SyncResult<MergeStats> {
        let mut stats = MergeStats::default();
        let mut to_write = Vec::with_capacity(incoming.len());
        let mut followups = Vec::new();

        for record in incoming {
            let mut decision = self.decide(collection, record)?;
            if let Some(resolved) = decision.record.take() {
                to_write.push(resolved);
                stats.merged += 1;
            }
            if decision.conflict.is_some() {
                stats.conflicts += 1;
            }
            followups.push((record, decision));
        }

        // Cursor advances in the same transaction as the records, never
        // before them.
        self.store
            .merge_remote_batch(collection, &to_write, next_cursor)?;

        for (record, decision) in followups {
            stats.requeued += self.run_post(collection, record, decision)?;
        }
        Ok(stats)
    }

    /// Merges one realtime delta. With a cursor attached it advances the
    /// collection's durable pull position exactly like a pulled batch; bare
    /// deltas only touch the record.
    pub(crate) fn merge_delta(&self, delta: &RemoteDelta) -> SyncResult<MergeStats> {
        let mut stats = MergeStats::default();
        let decision = self.decide(&delta.collection, &delta.record)?;

        if decision.conflict.is_some() {
            stats.conflicts += 1;
        }
        match (&decision.record, &delta.cursor) {
            (Some(resolved), Some(cursor)) => {
                self.store
                    .merge_remote_batch(&delta.collection, std::slice::from_ref(resolved), cursor)?;
                stats.merged += 1;
            }
            (Some(resolved), None) => {
                self.store.put(resolved)?;
                stats.merged += 1;
            }
            (None, Some(cursor)) => {
                self.store.merge_remote_batch(&delta.collection, &[], cursor)?;
            }
            (None, None) => {}
        }

        stats.requeued += self.run_post(&delta.collection, &delta.record, decision)?;
        Ok(stats)
    }

    /// Resolves a push rejected as stale against the server revision the
    /// backend returned. The pending entry is still in the outbox; the
    /// resolution decides whether it survives.
    pub(crate) fn resolve_stale_push(
        &self,
        mutation: &Mutation,
        server_record: &Record,
    ) -> SyncResult<MergeStats> {
        let mut stats = MergeStats::default();
        let decision = self.decide_conflict(&mutation.collection, server_record, mutation)?;

        stats.conflicts = 1;
        if let Some(resolved) = &decision.record {
            self.store.put(resolved)?;
            stats.merged += 1;
        }
        stats.requeued += self.run_post(&mutation.collection, server_record, decision)?;
        Ok(stats)
    }

    fn decide(&self, collection: &str, incoming: &Record) -> SyncResult<MergeDecision> {
        self.observe(incoming.updated_at);

        let pending = self.store.peek_pending(collection, &incoming.id)?;
        match pending {
            None => {
                let existing = self.store.get(collection, &incoming.id)?;
                let mut resolved = incoming.clone();
                resolved.local_version =
                    existing.map(|r| r.local_version + 1).unwrap_or(1);
                resolved.conflict = false;
                Ok(MergeDecision {
                    record: Some(resolved),
                    conflict: None,
                    post: Vec::new(),
                })
            }
            Some(mutation) => self.decide_conflict(collection, incoming, &mutation),
        }
    }

    fn decide_conflict(
        &self,
        collection: &str,
        incoming: &Record,
        mutation: &Mutation,
    ) -> SyncResult<MergeDecision> {
        self.observe(incoming.updated_at);
        let local = self.store.get(collection, &mutation.id)?;

        let ctx = ConflictContext {
            mutation,
            local: local.as_ref(),
            server: incoming,
        };
        let resolution = self.strategy.resolve(&ctx);
        let (record, outcome, post) = match resolution {
            Resolution::ApplyRemote => {
                let mut resolved = incoming.clone();
                resolved.local_version =
                    local.as_ref().map(|r| r.local_version + 1).unwrap_or(1);
                resolved.conflict = false;
                (
                    Some(resolved),
                    ConflictOutcome::RemoteApplied,
                    vec![PostAction::Acknowledge(mutation.seq)],
                )
            }
            Resolution::ApplyLocal => {
                // The replica already holds the local side; only the push
                // precondition changes.
                (None, ConflictOutcome::LocalReapplied, vec![PostAction::Rebase])
            }
            Resolution::Merged(mut merged) => {
                merged.server_version = incoming.server_version.clone();
                merged.local_version =
                    local.as_ref().map(|r| r.local_version + 1).unwrap_or(1);
                // The requeued patch must null out any server field the
                // merge dropped, or the re-push would resurrect it.
                let requeue = Mutation::update(
                    collection,
                    mutation.id.clone(),
                    Patch::replacement(&merged.fields, &incoming.fields),
                    merged.updated_at,
                    incoming.server_version.clone(),
                );
                (
                    Some(merged),
                    ConflictOutcome::Merged,
                    vec![PostAction::Acknowledge(mutation.seq), PostAction::Requeue(requeue)],
                )
            }
            Resolution::Unresolved => (
                None,
                ConflictOutcome::AwaitingHost,
                vec![PostAction::Rebase, PostAction::Flag],
            ),
        };
        debug!(
            collection,
            id = %mutation.id,
            strategy = self.strategy.name(),
            outcome = ?outcome,
            "resolved conflict"
        );

        Ok(MergeDecision {
            record,
            conflict: Some(ConflictRecord {
                mutation: mutation.clone(),
                local,
                server: incoming.clone(),
                strategy: self.strategy.name(),
                outcome,
            }),
            post,
        })
    }

    fn run_post(
        &self,
        collection: &str,
        incoming: &Record,
        decision: MergeDecision,
    ) -> SyncResult<usize> {
        let mut requeued = 0;
        for action in decision.post {
            match action {
                PostAction::Acknowledge(seq) => self.store.acknowledge(&[seq])?,
                PostAction::Rebase => self.store.rebase_pending(
                    collection,
                    &incoming.id,
                    incoming.server_version.as_ref(),
                )?,
                PostAction::Requeue(mutation) => {
                    self.store.apply_mutation(&mutation)?;
                    requeued += 1;
                }
                PostAction::Flag => self.store.set_conflict(collection, &incoming.id, true)?,
            }
        }

        if let Some(conflict) = decision.conflict {
            // Best effort: the durable conflict flag is the guaranteed
            // signal, the channel is for live observation.
            if let Err(mpsc::error::TrySendError::Full(dropped)) =
                self.conflict_tx.try_send(conflict)
            {
                warn!(
                    collection = %dropped.mutation.collection,
                    id = %dropped.mutation.id,
                    "conflict channel full, dropping notification"
                );
            }
        }
        Ok(requeued)
    }

    fn observe(&self, remote: HybridTimestamp) {
        let mut clock = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        let observed = clock.receive(&remote);
        *clock = observed;
    }
}

impl<S> Clone for RemoteMerger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            strategy: Arc::clone(&self.strategy),
            conflict_tx: self.conflict_tx.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}
