//! Hybrid Logical Clock implementation for ordering concurrent writes.
//!
//! Combines physical time with a logical counter so that:
//! - timestamps are monotonic per replica (always increasing)
//! - causally related writes order correctly across replicas
//! - conflict resolution can compare timestamps without consulting the wall
//!   clock at evaluation time

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Hybrid Logical Clock timestamp.
///
/// Consists of:
/// - `wall_time`: milliseconds since Unix epoch (physical component)
/// - `logical`: counter for events sharing the same wall time
///
/// Based on the HLC algorithm from "Logical Physical Clocks" (Kulkarni et al.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    /// Physical time component (milliseconds since Unix epoch).
    wall_time: u64,
    /// Logical counter for ordering events at the same wall time.
    logical: u32,
}

impl HybridTimestamp {
    /// Creates a new timestamp at the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_time: wall_clock_millis(),
            logical: 0,
        }
    }

    /// Creates a timestamp from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Returns the wall time component.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Generates the next timestamp, ensuring monotonicity.
    ///
    /// Called when stamping a new local mutation.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = wall_clock_millis();

        if now > self.wall_time {
            Self {
                wall_time: now,
                logical: 0,
            }
        } else {
            Self {
                wall_time: self.wall_time,
                logical: self.logical.saturating_add(1),
            }
        }
    }

    /// Updates this clock based on a timestamp received from a remote record.
    ///
    /// The result is greater than both the current clock and the received
    /// timestamp, so later local mutations order after everything merged so
    /// far.
    #[must_use]
    pub fn receive(&self, other: &Self) -> Self {
        let now = wall_clock_millis();
        let max_wall = now.max(self.wall_time).max(other.wall_time);

        let logical = if max_wall == self.wall_time && max_wall == other.wall_time {
            self.logical.max(other.logical).saturating_add(1)
        } else if max_wall == self.wall_time {
            self.logical.saturating_add(1)
        } else if max_wall == other.wall_time {
            other.logical.saturating_add(1)
        } else {
            0
        };

        Self {
            wall_time: max_wall,
            logical,
        }
    }

    /// Returns true if this timestamp orders before the other.
    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }

    /// Returns true if this timestamp orders after the other.
    #[must_use]
    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }
}

impl Default for HybridTimestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.wall_time.cmp(&other.wall_time) {
            Ordering::Equal => self.logical.cmp(&other.logical),
            other => other,
        }
    }
}

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_millis() as u64
}
