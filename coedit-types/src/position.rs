//! Flat document positions and half-open ranges.
//!
//! A position is a character offset into the visible (non-tombstoned)
//! sequence. Line and column travel on the wire for host editors but carry
//! no semantics in the core — only `offset` is authoritative.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Character offset into the visible sequence. Authoritative.
    pub offset: usize,
    /// Advisory line number for host editors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Advisory column number for host editors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Position {
    /// Creates a position at the given offset.
    #[must_use]
    pub const fn at(offset: usize) -> Self {
        Self {
            offset,
            line: None,
            column: None,
        }
    }
}

impl From<usize> for Position {
    fn from(offset: usize) -> Self {
        Self::at(offset)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.offset)
    }
}

/// A half-open range `[start, end)` over character offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl Range {
    /// Creates a range. `end` is clamped to be at least `start`.
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Returns the number of offsets covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the range covers nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns true if the two ranges overlap.
    ///
    /// Half-open overlap: `start1 < end2 && start2 < end1`. Touching ranges
    /// do not overlap; two empty ranges never overlap.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns the length of the intersection of the two ranges.
    #[must_use]
    pub fn overlap_len(&self, other: &Self) -> usize {
        let lo = self.start.max(other.start);
        let hi = self.end.min(other.end);
        hi.saturating_sub(lo)
    }

    /// Returns true if `offset` falls inside the range.
    #[must_use]
    pub const fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
