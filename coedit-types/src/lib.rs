//! Core type definitions for the coedit replication core.
//!
//! This crate defines the fundamental, transport-agnostic types shared by the
//! CRDT and sync layers:
//! - Peer, operation, and message identifiers (UUID v7)
//! - Flat document positions and half-open ranges
//! - Hybrid wall/logical timestamps
//!
//! Everything that belongs to a specific layer (operations, clocks, wire
//! frames) lives in `coedit-crdt` or `coedit-sync`, not here.

mod ids;
mod position;
mod timestamp;

pub use ids::{MessageId, OperationId, PeerId};
pub use position::{Position, Range};
pub use timestamp::HybridTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from parsing identifier types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}
