//! Hybrid wall/logical timestamps.
//!
//! Operation timestamps are tiebreak-only (causality lives in the vector
//! clocks), but they still have to be monotonic per peer: the canonical
//! ordering of concurrent operations is (timestamp, peer, id), and two
//! operations stamped in the same millisecond by one peer must not swap.
//! The logical counter provides that within-millisecond ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A hybrid timestamp: milliseconds since the Unix epoch plus a logical
/// counter that orders events sharing a wall-clock millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    wall_ms: u64,
    logical: u32,
}

impl HybridTimestamp {
    /// Creates a timestamp at the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_ms: unix_millis(),
            logical: 0,
        }
    }

    /// Creates a timestamp from components.
    #[must_use]
    pub const fn new(wall_ms: u64, logical: u32) -> Self {
        Self { wall_ms, logical }
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub const fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    /// Logical counter within the wall-clock millisecond.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Returns the next timestamp, strictly greater than `self` even if the
    /// system clock has not advanced (or has gone backwards).
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = unix_millis();
        if now > self.wall_ms {
            Self {
                wall_ms: now,
                logical: 0,
            }
        } else {
            Self {
                wall_ms: self.wall_ms,
                logical: self.logical.saturating_add(1),
            }
        }
    }

    /// Advances this clock past a timestamp received from another peer.
    ///
    /// The result is strictly greater than both inputs.
    #[must_use]
    pub fn receive(&self, other: &Self) -> Self {
        let later = (*self).max(*other);
        let now = unix_millis();
        if now > later.wall_ms {
            Self {
                wall_ms: now,
                logical: 0,
            }
        } else {
            Self {
                wall_ms: later.wall_ms,
                logical: later.logical.saturating_add(1),
            }
        }
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
        self.wall_ms
            .cmp(&other.wall_ms)
            .then(self.logical.cmp(&other.logical))
    }
}

impl fmt::Display for HybridTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.wall_ms, self.logical)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
