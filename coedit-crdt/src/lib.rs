//! Replication algebra for coedit.
//!
//! This crate implements the convergence machinery of the collaboration
//! core:
//!
//! - [`VectorClock`] — causality tracking across peers
//! - [`Operation`] — immutable, clock-stamped edits with validation
//! - [`ot`] — pairwise transform, compose, inverse, and apply over flat
//!   character offsets
//! - [`Document`] — a tombstoned per-character node list that turns local
//!   edits into operations and remote operations into state
//! - [`MergeEngine`] — three-way merge with conflict detection and named
//!   resolution strategies
//!
//! Replicas that have received the same multiset of operations — in any
//! order — expose identical visible text. Duplicate delivery is absorbed by
//! vector-clock dominance, so hosts only need at-least-once transports.

mod document;
mod merge;
pub mod ot;
mod operation;
mod vector_clock;

pub use document::{Document, DocumentConfig, DocumentState, NodeId, checksum32};
pub use merge::{
    Conflict, ConflictResolution, MergeEngine, MergeResult, ResolutionStrategy,
};
pub use operation::{Operation, OperationKind, ValidationError};
pub use vector_clock::{CausalOrder, VectorClock};
