//! Edit operations.
//!
//! An operation is an immutable record of one edit: what happened, where,
//! who did it, and what the author's clock looked like at creation time.
//! Operations are the unit of replication — they travel the wire, live in
//! the history ring, and are what the transform functions rewrite.

use crate::VectorClock;
use coedit_types::{HybridTimestamp, OperationId, PeerId, Position, Range};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of edit an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Insert `content` at the position.
    Insert,
    /// Remove `length` characters starting at the position.
    Delete,
    /// Remove `length` characters and insert `content` in their place.
    Replace,
    /// Host extension; carried but not interpreted by the core.
    Move,
    /// Host extension; carried but not interpreted by the core.
    Format,
    /// Host extension; carried but not interpreted by the core.
    Custom,
}

/// A malformed operation, rejected before it reaches apply or the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("insert operation has no content")]
    MissingContent,
    #[error("{kind:?} operation has zero length")]
    ZeroLength { kind: OperationKind },
    #[error("replace operation has no replacement content")]
    MissingReplacement,
}

/// An immutable, clock-stamped edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Globally unique id. Character node ids are derived from it.
    pub id: OperationId,
    /// What this operation does.
    pub kind: OperationKind,
    /// Where it does it. Only `position.offset` is authoritative.
    pub position: Position,
    /// Inserted/replacement text (Insert, Replace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Number of characters removed (Delete, Replace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// The peer that authored the edit.
    pub peer: PeerId,
    /// Wall-clock stamp; tiebreak only, causality lives in `clock`.
    pub timestamp: HybridTimestamp,
    /// Snapshot of the author's vector clock at creation.
    pub clock: VectorClock,
    /// Host-defined annotations. The merge engine records synthesized
    /// operations here (`merged`, `sources`) and inverses record
    /// `inverseOf`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Operation {
    /// Creates an insert operation.
    #[must_use]
    pub fn insert(
        position: impl Into<Position>,
        content: impl Into<String>,
        peer: PeerId,
        clock: VectorClock,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind: OperationKind::Insert,
            position: position.into(),
            content: Some(content.into()),
            length: None,
            peer,
            timestamp: HybridTimestamp::now(),
            clock,
            metadata: None,
        }
    }

    /// Creates a delete operation.
    #[must_use]
    pub fn delete(
        position: impl Into<Position>,
        length: usize,
        peer: PeerId,
        clock: VectorClock,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind: OperationKind::Delete,
            position: position.into(),
            content: None,
            length: Some(length),
            peer,
            timestamp: HybridTimestamp::now(),
            clock,
            metadata: None,
        }
    }

    /// Creates a replace operation.
    #[must_use]
    pub fn replace(
        position: impl Into<Position>,
        length: usize,
        content: impl Into<String>,
        peer: PeerId,
        clock: VectorClock,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind: OperationKind::Replace,
            position: position.into(),
            content: Some(content.into()),
            length: Some(length),
            peer,
            timestamp: HybridTimestamp::now(),
            clock,
            metadata: None,
        }
    }

    /// Overrides the timestamp. For tests and replay.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: HybridTimestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    /// Length of `content` in characters (0 if none).
    #[must_use]
    pub fn content_len(&self) -> usize {
        self.content.as_deref().map_or(0, |c| c.chars().count())
    }

    /// Number of characters this operation removes (0 if none).
    #[must_use]
    pub fn delete_len(&self) -> usize {
        self.length.unwrap_or(0)
    }

    /// The character range this operation touches, used for conflict
    /// detection. Inserts cover the span they produce; deletes and replaces
    /// cover the span they remove.
    #[must_use]
    pub fn range(&self) -> Range {
        let start = self.position.offset;
        match self.kind {
            OperationKind::Insert => Range::new(start, start + self.content_len()),
            OperationKind::Delete | OperationKind::Replace => {
                Range::new(start, start + self.delete_len())
            }
            OperationKind::Move | OperationKind::Format | OperationKind::Custom => {
                Range::new(start, start)
            }
        }
    }

    /// Checks structural validity: inserts carry content, deletes and
    /// replaces remove at least one character, replaces carry replacement
    /// content.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.kind {
            OperationKind::Insert => {
                if self.content.is_none() {
                    return Err(ValidationError::MissingContent);
                }
            }
            OperationKind::Delete => {
                if self.delete_len() == 0 {
                    return Err(ValidationError::ZeroLength { kind: self.kind });
                }
            }
            OperationKind::Replace => {
                if self.delete_len() == 0 {
                    return Err(ValidationError::ZeroLength { kind: self.kind });
                }
                if self.content.is_none() {
                    return Err(ValidationError::MissingReplacement);
                }
            }
            OperationKind::Move | OperationKind::Format | OperationKind::Custom => {}
        }
        Ok(())
    }
}
