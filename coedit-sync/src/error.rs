//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed frame: bad version, unknown opcode, truncated buffer.
    /// Fatal to the frame, never to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A malformed operation, rejected before it was enqueued.
    #[error(transparent)]
    Validation(#[from] coedit_crdt::ValidationError),

    /// A conflict is waiting on a manual decision from the host.
    #[error("conflict awaiting manual resolution")]
    Conflict,

    /// Network-level failure reported by the socket.
    #[error("network error: {0}")]
    Network(String),

    /// Reconnect attempts exhausted; the socket stays down until the host
    /// calls connect again.
    #[error("connection failed after {attempts} reconnect attempts")]
    ConnectionFailed { attempts: u32 },

    /// Initial connect exceeded the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// A batch exhausted its retries; its operations remain queued.
    #[error("sync batch {sequence} failed after {attempts} attempts")]
    SyncFailed { sequence: u64, attempts: u32 },

    /// An API call that requires a different connection state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// JSON payload encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal channel closed underneath an in-flight call.
    #[error("channel closed")]
    ChannelClosed,
}
