//! Protocol messages and the opcode table.
//!
//! Every frame on the wire carries one [`Message`]: an envelope (type,
//! timestamp, sender, message id) plus a typed payload. Payloads are JSON;
//! the envelope is binary (see [`crate::frame`]). Presence, cursor, and
//! comment opcodes (20–33) belong to outer collaborators — the core carries
//! them as opaque bytes and never looks inside.

use crate::error::SyncResult;
use coedit_crdt::{Conflict, ConflictResolution, DocumentState, Operation, VectorClock};
use coedit_types::{MessageId, OperationId, PeerId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wire protocol version. Frames with any other version are rejected.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default cap on operations per sync batch.
pub const MAX_BATCH_SIZE: usize = 50;

/// The frame opcode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageType {
    Connect,
    Disconnect,
    Heartbeat,
    Operation,
    Sync,
    Checkpoint,
    PresenceUpdate,
    CursorMove,
    SelectionChange,
    CommentAdd,
    CommentUpdate,
    CommentDelete,
    CommentResolve,
    ConflictDetected,
    ConflictResolved,
    Error,
    Ack,
    Nack,
}

impl MessageType {
    /// The opcode byte for this message type.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Connect => 0,
            Self::Disconnect => 1,
            Self::Heartbeat => 2,
            Self::Operation => 10,
            Self::Sync => 11,
            Self::Checkpoint => 12,
            Self::PresenceUpdate => 20,
            Self::CursorMove => 21,
            Self::SelectionChange => 22,
            Self::CommentAdd => 30,
            Self::CommentUpdate => 31,
            Self::CommentDelete => 32,
            Self::CommentResolve => 33,
            Self::ConflictDetected => 40,
            Self::ConflictResolved => 41,
            Self::Error => 100,
            Self::Ack => 101,
            Self::Nack => 102,
        }
    }

    /// Looks up a message type by opcode byte.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Connect,
            1 => Self::Disconnect,
            2 => Self::Heartbeat,
            10 => Self::Operation,
            11 => Self::Sync,
            12 => Self::Checkpoint,
            20 => Self::PresenceUpdate,
            21 => Self::CursorMove,
            22 => Self::SelectionChange,
            30 => Self::CommentAdd,
            31 => Self::CommentUpdate,
            32 => Self::CommentDelete,
            33 => Self::CommentResolve,
            40 => Self::ConflictDetected,
            41 => Self::ConflictResolved,
            100 => Self::Error,
            101 => Self::Ack,
            102 => Self::Nack,
            _ => return None,
        })
    }

    /// True for opcodes the core carries opaquely (presence, cursors,
    /// selections, comments).
    #[must_use]
    pub const fn is_passthrough(self) -> bool {
        matches!(
            self,
            Self::PresenceUpdate
                | Self::CursorMove
                | Self::SelectionChange
                | Self::CommentAdd
                | Self::CommentUpdate
                | Self::CommentDelete
                | Self::CommentResolve
        )
    }
}

impl From<MessageType> for u8 {
    fn from(ty: MessageType) -> Self {
        ty.code()
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, String> {
        Self::from_code(code).ok_or_else(|| format!("unknown opcode: {code}"))
    }
}

/// The body of a Sync message: a batch of operations plus the sender's
/// clock snapshot and batch sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub operations: Vec<Operation>,
    pub vector_clock: VectorClock,
    pub sequence_number: u64,
}

/// A typed message payload. One variant per opcode family; 20–33 travel as
/// [`MessagePayload::Opaque`] bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// Connect and Disconnect carry an empty body.
    Empty,
    Heartbeat {
        /// Send time in unix milliseconds; echoed back for latency.
        timestamp: u64,
    },
    Operation(Operation),
    Sync(SyncPayload),
    Checkpoint(DocumentState),
    ConflictDetected(Conflict),
    ConflictResolved(ConflictResolution),
    Error {
        code: String,
        message: String,
    },
    Ack {
        ids: Vec<OperationId>,
    },
    Nack {
        ids: Vec<OperationId>,
        reason: String,
    },
    /// Raw bytes of an external collaborator's payload, carried untouched.
    Opaque(Vec<u8>),
}

/// A protocol message: envelope plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_type: MessageType,
    /// Envelope send time, unix milliseconds.
    pub timestamp: u64,
    pub sender: PeerId,
    pub message_id: MessageId,
    pub payload: MessagePayload,
}

impl Message {
    fn envelope(message_type: MessageType, sender: PeerId, payload: MessagePayload) -> Self {
        Self {
            message_type,
            timestamp: now_ms(),
            sender,
            message_id: MessageId::new(),
            payload,
        }
    }

    /// A Connect handshake.
    #[must_use]
    pub fn connect(sender: PeerId) -> Self {
        Self::envelope(MessageType::Connect, sender, MessagePayload::Empty)
    }

    /// A clean Disconnect notice.
    #[must_use]
    pub fn disconnect(sender: PeerId) -> Self {
        Self::envelope(MessageType::Disconnect, sender, MessagePayload::Empty)
    }

    /// A Heartbeat probe stamped with the current time.
    #[must_use]
    pub fn heartbeat(sender: PeerId) -> Self {
        Self::heartbeat_echo(sender, now_ms())
    }

    /// A Heartbeat carrying an explicit stamp — the reply to a received
    /// probe echoes the probe's stamp back unchanged.
    #[must_use]
    pub fn heartbeat_echo(sender: PeerId, timestamp: u64) -> Self {
        Self::envelope(
            MessageType::Heartbeat,
            sender,
            MessagePayload::Heartbeat { timestamp },
        )
    }

    /// A single-operation message.
    #[must_use]
    pub fn operation(sender: PeerId, op: Operation) -> Self {
        Self::envelope(
            MessageType::Operation,
            sender,
            MessagePayload::Operation(op),
        )
    }

    /// A batched Sync message.
    #[must_use]
    pub fn sync(sender: PeerId, payload: SyncPayload) -> Self {
        Self::envelope(MessageType::Sync, sender, MessagePayload::Sync(payload))
    }

    /// A full-state Checkpoint.
    #[must_use]
    pub fn checkpoint(sender: PeerId, state: DocumentState) -> Self {
        Self::envelope(
            MessageType::Checkpoint,
            sender,
            MessagePayload::Checkpoint(state),
        )
    }

    /// Announces a detected conflict.
    #[must_use]
    pub fn conflict_detected(sender: PeerId, conflict: Conflict) -> Self {
        Self::envelope(
            MessageType::ConflictDetected,
            sender,
            MessagePayload::ConflictDetected(conflict),
        )
    }

    /// Announces a conflict resolution.
    #[must_use]
    pub fn conflict_resolved(sender: PeerId, resolution: ConflictResolution) -> Self {
        Self::envelope(
            MessageType::ConflictResolved,
            sender,
            MessagePayload::ConflictResolved(resolution),
        )
    }

    /// An error report.
    #[must_use]
    pub fn error(sender: PeerId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::envelope(
            MessageType::Error,
            sender,
            MessagePayload::Error {
                code: code.into(),
                message: message.into(),
            },
        )
    }

    /// Acknowledges receipt of the named operations.
    #[must_use]
    pub fn ack(sender: PeerId, ids: Vec<OperationId>) -> Self {
        Self::envelope(MessageType::Ack, sender, MessagePayload::Ack { ids })
    }

    /// Rejects the named operations with a reason.
    #[must_use]
    pub fn nack(sender: PeerId, ids: Vec<OperationId>, reason: impl Into<String>) -> Self {
        Self::envelope(
            MessageType::Nack,
            sender,
            MessagePayload::Nack {
                ids,
                reason: reason.into(),
            },
        )
    }

    /// Wraps an external collaborator's payload for pass-through.
    #[must_use]
    pub fn opaque(sender: PeerId, message_type: MessageType, bytes: Vec<u8>) -> Self {
        Self::envelope(message_type, sender, MessagePayload::Opaque(bytes))
    }

    /// Serializes the payload to its wire JSON.
    pub fn payload_bytes(&self) -> SyncResult<Vec<u8>> {
        let bytes = match &self.payload {
            MessagePayload::Empty => b"{}".to_vec(),
            MessagePayload::Heartbeat { timestamp } => {
                serde_json::to_vec(&HeartbeatBody {
                    timestamp: *timestamp,
                })?
            }
            MessagePayload::Operation(op) => serde_json::to_vec(op)?,
            MessagePayload::Sync(p) => serde_json::to_vec(p)?,
            MessagePayload::Checkpoint(state) => serde_json::to_vec(state)?,
            MessagePayload::ConflictDetected(c) => serde_json::to_vec(c)?,
            MessagePayload::ConflictResolved(r) => serde_json::to_vec(r)?,
            MessagePayload::Error { code, message } => serde_json::to_vec(&ErrorBody {
                code: code.clone(),
                message: message.clone(),
            })?,
            MessagePayload::Ack { ids } => serde_json::to_vec(&AckBody { ids: ids.clone() })?,
            MessagePayload::Nack { ids, reason } => serde_json::to_vec(&NackBody {
                ids: ids.clone(),
                reason: reason.clone(),
            })?,
            MessagePayload::Opaque(bytes) => bytes.clone(),
        };
        Ok(bytes)
    }

    /// Parses wire JSON into the payload variant for `message_type`.
    pub fn payload_from(message_type: MessageType, bytes: &[u8]) -> SyncResult<MessagePayload> {
        if message_type.is_passthrough() {
            return Ok(MessagePayload::Opaque(bytes.to_vec()));
        }
        let payload = match message_type {
            MessageType::Connect | MessageType::Disconnect => MessagePayload::Empty,
            MessageType::Heartbeat => {
                let body: HeartbeatBody = serde_json::from_slice(bytes)?;
                MessagePayload::Heartbeat {
                    timestamp: body.timestamp,
                }
            }
            MessageType::Operation => MessagePayload::Operation(serde_json::from_slice(bytes)?),
            MessageType::Sync => MessagePayload::Sync(serde_json::from_slice(bytes)?),
            MessageType::Checkpoint => {
                MessagePayload::Checkpoint(serde_json::from_slice(bytes)?)
            }
            MessageType::ConflictDetected => {
                MessagePayload::ConflictDetected(serde_json::from_slice(bytes)?)
            }
            MessageType::ConflictResolved => {
                MessagePayload::ConflictResolved(serde_json::from_slice(bytes)?)
            }
            MessageType::Error => {
                let body: ErrorBody = serde_json::from_slice(bytes)?;
                MessagePayload::Error {
                    code: body.code,
                    message: body.message,
                }
            }
            MessageType::Ack => {
                let body: AckBody = serde_json::from_slice(bytes)?;
                MessagePayload::Ack { ids: body.ids }
            }
            MessageType::Nack => {
                let body: NackBody = serde_json::from_slice(bytes)?;
                MessagePayload::Nack {
                    ids: body.ids,
                    reason: body.reason,
                }
            }
            // Covered by is_passthrough above.
            _ => MessagePayload::Opaque(bytes.to_vec()),
        };
        Ok(payload)
    }

    /// Serializes the whole message as JSON — the debugging fallback. The
    /// binary frame is canonical.
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a message from its JSON fallback form.
    pub fn from_json(text: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Serialize, Deserialize)]
struct HeartbeatBody {
    timestamp: u64,
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct AckBody {
    ids: Vec<OperationId>,
}

#[derive(Serialize, Deserialize)]
struct NackBody {
    ids: Vec<OperationId>,
    reason: String,
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
