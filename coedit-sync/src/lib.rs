//! Wire protocol and session management for coedit.
//!
//! # Architecture
//!
//! - **Protocol** ([`protocol`]): the opcode table and typed message
//!   payloads exchanged between peers
//! - **Frame** ([`frame`]): the fixed binary header that carries every
//!   message; JSON text mode exists as a debugging fallback
//! - **Socket** ([`socket`]): the transport seam — an injected connector
//!   producing frame-oriented links, with an in-memory mock
//! - **Connection** ([`connection`]): per-socket lifecycle, heartbeats,
//!   exponential-backoff reconnection, and metrics
//! - **Service** ([`service`]): the pending queue, batched flushes, acks,
//!   retries, and the peer's causal view
//!
//! # Data flow
//!
//! A local edit leaves the document as an operation, enters the
//! [`SyncService`] queue, and rides a Sync frame out through the
//! [`ConnectionManager`]. An inbound frame decodes to a message; Sync
//! payloads pass through the service for deduplication and clock merging
//! before the document applies them. Delivery is at-least-once — the
//! pending queue survives reconnects and duplicates die by vector-clock
//! dominance on the receiving side.

pub mod connection;
mod error;
pub mod frame;
pub mod protocol;
mod service;
pub mod socket;

pub use connection::{
    reconnect_delay, ConnectionConfig, ConnectionManager, ConnectionMetrics, ConnectionState,
    ListenerId,
};
pub use error::{SyncError, SyncResult};
pub use protocol::{
    Message, MessagePayload, MessageType, SyncPayload, MAX_BATCH_SIZE, PROTOCOL_VERSION,
};
pub use service::{ProcessedSync, SyncConfig, SyncService, SyncStatus};
pub use socket::{Connector, SocketEvent, SocketLink, CLOSE_ABNORMAL, CLOSE_NORMAL};
