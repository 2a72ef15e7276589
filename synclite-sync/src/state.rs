//! Observable sync state and cycle reports.

use crate::error::FailureKind;
use std::fmt;

/// The phase the engine is currently in, published on a watch channel.
///
/// Transitions always follow `Idle → Authenticating → Pulling → Pushing →
/// Reconciling → Idle`, detouring to `Failed` or `Cancelled` from any
/// working phase. A new cycle leaves `Failed` through `Authenticating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No cycle running.
    Idle,
    /// Obtaining or validating credentials.
    Authenticating,
    /// Fetching and merging remote changes.
    Pulling,
    /// Draining the outbox to the backend.
    Pushing,
    /// Re-pushing mutations produced by conflict resolution.
    Reconciling,
    /// The last cycle halted; the next trigger starts fresh.
    Failed(FailureKind),
    /// The last cycle was cancelled mid-flight.
    Cancelled,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Authenticating => write!(f, "authenticating"),
            SyncPhase::Pulling => write!(f, "pulling"),
            SyncPhase::Pushing => write!(f, "pushing"),
            SyncPhase::Reconciling => write!(f, "reconciling"),
            SyncPhase::Failed(kind) => write!(f, "failed ({kind:?})"),
            SyncPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What one sync cycle accomplished, per collection.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// One entry per collection the cycle touched, in configured order.
    pub collections: Vec<CollectionOutcome>,
}

impl SyncReport {
    /// Total records merged from the backend across all collections.
    pub fn pulled(&self) -> usize {
        self.collections.iter().map(|c| c.pulled).sum()
    }

    /// Total mutations accepted by the backend across all collections.
    pub fn pushed(&self) -> usize {
        self.collections.iter().map(|c| c.pushed).sum()
    }

    /// Total conflicts encountered across all collections.
    pub fn conflicts(&self) -> usize {
        self.collections.iter().map(|c| c.conflicts).sum()
    }

    /// True if every collection completed without error.
    pub fn is_clean(&self) -> bool {
        self.collections.iter().all(|c| c.error.is_none())
    }
}

/// Outcome of one collection within a cycle.
#[derive(Debug, Clone, Default)]
pub struct CollectionOutcome {
    /// Collection name.
    pub collection: String,
    /// Remote records durably merged.
    pub pulled: usize,
    /// Local mutations accepted by the backend.
    pub pushed: usize,
    /// Conflicts encountered (resolved or surfaced).
    pub conflicts: usize,
    /// Mutations the backend rejected permanently and were discarded.
    pub permanent_failures: usize,
    /// Error that halted this collection, if any. Other collections still
    /// ran.
    pub error: Option<String>,
}

impl CollectionOutcome {
    pub(crate) fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }
}
