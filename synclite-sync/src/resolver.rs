//! Conflict resolution.
//!
//! A conflict exists when a pending local mutation and a newer server
//! revision target the same record. The engine hands both sides to a
//! [`ConflictStrategy`]; resolution must be a pure function of the two
//! sides so every replica converges on the same result. Bundled strategies
//! cover last-writer-wins and field-level merge; hosts plug in their own
//! for anything richer.

use synclite_types::{HybridTimestamp, Mutation, Record};

/// Both sides of a conflict, as seen at resolution time.
#[derive(Debug)]
pub struct ConflictContext<'a> {
    /// The pending local mutation the server rejected (or that a remote
    /// delta collided with).
    pub mutation: &'a Mutation,
    /// The local replica's current record, if it still exists.
    pub local: Option<&'a Record>,
    /// The server's current revision.
    pub server: &'a Record,
}

/// What the strategy decided.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The server revision wins; the local mutation is discarded.
    ApplyRemote,
    /// The local mutation wins; it is re-pushed against the server revision.
    ApplyLocal,
    /// A merged record replaces both sides; the merge is re-pushed.
    Merged(Record),
    /// The strategy declines; the record is flagged and surfaced to the host.
    Unresolved,
}

/// A pluggable conflict policy.
///
/// Implementations must be deterministic: the same two sides always produce
/// the same resolution, regardless of which replica runs it.
pub trait ConflictStrategy: Send + Sync {
    /// Strategy name, for logs and conflict reports.
    fn name(&self) -> &'static str;

    /// Resolves one conflict.
    fn resolve(&self, ctx: &ConflictContext<'_>) -> Resolution;
}

/// Deterministic last-writer-wins on hybrid timestamps.
///
/// The side with the later timestamp wins; an exact tie goes to the server
/// so all replicas agree without coordination.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriteWins;

impl ConflictStrategy for LastWriteWins {
    fn name(&self) -> &'static str {
        "last-write-wins"
    }

    fn resolve(&self, ctx: &ConflictContext<'_>) -> Resolution {
        if ctx.mutation.timestamp.is_after(&ctx.server.updated_at) {
            Resolution::ApplyLocal
        } else {
            Resolution::ApplyRemote
        }
    }
}

/// Field-level merge: non-overlapping fields from both sides survive;
/// overlapping fields go to the later writer (server on ties).
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldMerge;

impl ConflictStrategy for FieldMerge {
    fn name(&self) -> &'static str {
        "field-merge"
    }

    fn resolve(&self, ctx: &ConflictContext<'_>) -> Resolution {
        // Deletes have no fields to merge; fall back to last-writer-wins.
        if ctx.mutation.patch.is_empty() || ctx.server.tombstone {
            return LastWriteWins.resolve(ctx);
        }

        let mut merged = ctx.server.clone();
        let local_is_later = ctx.mutation.timestamp.is_after(&ctx.server.updated_at);
        if local_is_later {
            ctx.mutation.patch.apply_to(&mut merged.fields);
        } else {
            for (key, value) in ctx.mutation.patch.iter() {
                if value.is_null() {
                    continue;
                }
                merged.fields.entry(key.to_string()).or_insert_with(|| value.clone());
            }
        }
        merged.updated_at = HybridTimestamp::new(
            ctx.mutation
                .timestamp
                .wall_time()
                .max(ctx.server.updated_at.wall_time()),
            ctx.mutation
                .timestamp
                .logical()
                .max(ctx.server.updated_at.logical()),
        );
        merged.conflict = false;
        Resolution::Merged(merged)
    }
}

/// Flags every conflict for the host instead of deciding.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualResolution;

impl ConflictStrategy for ManualResolution {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn resolve(&self, _ctx: &ConflictContext<'_>) -> Resolution {
        Resolution::Unresolved
    }
}

/// A conflict surfaced to the host, either because the strategy declined or
/// for observation.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    /// The local mutation that collided.
    pub mutation: Mutation,
    /// The local record at collision time.
    pub local: Option<Record>,
    /// The server revision that collided with it.
    pub server: Record,
    /// Name of the strategy that produced (or declined) the resolution.
    pub strategy: &'static str,
    /// How the collision was settled, if it was.
    pub outcome: ConflictOutcome,
}

/// How a surfaced conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// The server side was kept.
    RemoteApplied,
    /// The local side was kept and re-pushed.
    LocalReapplied,
    /// A merge of both sides was produced and re-pushed.
    Merged,
    /// Still open; the record carries the conflict flag until the host calls
    /// `resolve_conflict`.
    AwaitingHost,
}
