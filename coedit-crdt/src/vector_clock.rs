//! Vector clocks for causality tracking.
//!
//! Every operation carries a snapshot of its creator's clock. Comparing two
//! snapshots tells whether one edit could have observed the other, which
//! drives duplicate suppression, the transform-against-history path, and
//! conflict detection.

use coedit_types::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Causal relationship between two vector clocks.
///
/// Exactly one of these holds for any pair of clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// The clocks are identical.
    Equal,
    /// The first clock happened before the second.
    Before,
    /// The first clock happened after the second.
    After,
    /// Neither happened before the other.
    Concurrent,
}

/// A map from peer id to that peer's event counter. Missing peers read as 0.
///
/// Backed by a `BTreeMap` so serialized snapshots have a stable key order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorClock {
    counters: BTreeMap<PeerId, u64>,
}

impl VectorClock {
    /// Creates an empty clock (all counters zero).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: BTreeMap::new(),
        }
    }

    /// Returns the counter for a peer, 0 if absent.
    #[must_use]
    pub fn get(&self, peer: &PeerId) -> u64 {
        self.counters.get(peer).copied().unwrap_or(0)
    }

    /// Iterates over all (peer, counter) entries.
    pub fn entries(&self) -> impl Iterator<Item = (&PeerId, &u64)> {
        self.counters.iter()
    }

    /// Number of peers with a nonzero history in this clock.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns true if no peer has ever been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Raises a peer's counter by one and returns the new value.
    pub fn increment(&mut self, peer: PeerId) -> u64 {
        let counter = self.counters.entry(peer).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Raises a peer's counter to `value` if it is currently lower.
    pub fn observe(&mut self, peer: PeerId, value: u64) {
        let counter = self.counters.entry(peer).or_insert(0);
        if value > *counter {
            *counter = value;
        }
    }

    /// Merges another clock into this one, taking the pointwise maximum.
    ///
    /// Commutative, associative, and idempotent.
    pub fn merge(&mut self, other: &Self) {
        for (peer, &value) in &other.counters {
            self.observe(*peer, value);
        }
    }

    /// Returns the pointwise maximum of the two clocks without mutating
    /// either input.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Determines the causal relationship between the two clocks.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        // greater: self exceeds other somewhere; lesser: other exceeds self.
        let mut greater = false;
        let mut lesser = false;

        for (peer, &mine) in &self.counters {
            let theirs = other.get(peer);
            if mine > theirs {
                greater = true;
            } else if mine < theirs {
                lesser = true;
            }
        }
        for (peer, &theirs) in &other.counters {
            if !self.counters.contains_key(peer) && theirs > 0 {
                lesser = true;
            }
        }

        match (greater, lesser) {
            (false, false) => CausalOrder::Equal,
            (false, true) => CausalOrder::Before,
            (true, false) => CausalOrder::After,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// Returns true if this clock is causally before the other.
    #[must_use]
    pub fn happens_before(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Before
    }

    /// Returns true if this clock is causally after the other.
    #[must_use]
    pub fn happens_after(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::After
    }

    /// Returns true if neither clock happened before the other.
    #[must_use]
    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// Returns true if the clocks are identical.
    #[must_use]
    pub fn is_equal(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Equal
    }

    /// Returns true if this clock is pointwise >= the other.
    ///
    /// A document ignores an incoming operation whose clock it dominates:
    /// dominance means the edit has already been observed.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Equal
    }
}

impl Eq for VectorClock {}
