//! Socket abstraction.
//!
//! The connection manager is transport-agnostic: hosts hand it a
//! [`Connector`] and it drives whatever [`SocketLink`] comes back. Frames
//! are opaque byte vectors at this layer; FIFO ordering per link is the
//! transport's contract. The [`mock`] module provides an in-memory
//! implementation with scripted failures for tests and embedders.

use crate::error::SyncResult;
use async_trait::async_trait;

/// Close code for a clean, deliberate shutdown. Any other code triggers
/// the reconnect path.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for an abnormal drop (transport vanished without a close).
pub const CLOSE_ABNORMAL: u16 = 1006;

/// An event surfaced by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// One complete inbound frame.
    Frame(Vec<u8>),
    /// The transport closed with the given code.
    Closed { code: u16 },
}

/// One established, bidirectional, frame-oriented link.
#[async_trait]
pub trait SocketLink: Send {
    /// Sends one frame. Frames arrive at the peer in send order.
    async fn send(&mut self, frame: Vec<u8>) -> SyncResult<()>;

    /// Receives the next event. `None` means the transport is gone without
    /// having delivered a close.
    async fn recv(&mut self) -> Option<SocketEvent>;

    /// Closes the link cleanly.
    async fn close(&mut self);
}

/// Establishes socket links to a remote endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new link to `url`.
    async fn connect(&self, url: &str) -> SyncResult<Box<dyn SocketLink>>;
}

/// In-memory sockets for tests and loopback embedding.
pub mod mock {
    use super::{Connector, SocketEvent, SocketLink, CLOSE_NORMAL};
    use crate::error::{SyncError, SyncResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// The client half of an in-memory socket pair.
    pub struct MockLink {
        outgoing: mpsc::UnboundedSender<Vec<u8>>,
        incoming: mpsc::UnboundedReceiver<SocketEvent>,
        closed: bool,
    }

    #[async_trait]
    impl SocketLink for MockLink {
        async fn send(&mut self, frame: Vec<u8>) -> SyncResult<()> {
            if self.closed {
                return Err(SyncError::InvalidState("socket closed".into()));
            }
            self.outgoing
                .send(frame)
                .map_err(|_| SyncError::Network("peer went away".into()))
        }

        async fn recv(&mut self) -> Option<SocketEvent> {
            if self.closed {
                return None;
            }
            self.incoming.recv().await
        }

        async fn close(&mut self) {
            self.closed = true;
            self.incoming.close();
        }
    }

    /// The test's handle on the far side of a [`MockLink`].
    pub struct MockRemote {
        events: mpsc::UnboundedSender<SocketEvent>,
        sent: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    impl MockRemote {
        /// Delivers a frame to the client.
        pub fn deliver(&self, frame: Vec<u8>) {
            let _ = self.events.send(SocketEvent::Frame(frame));
        }

        /// Closes the link from the remote side with the given code.
        pub fn close(&self, code: u16) {
            let _ = self.events.send(SocketEvent::Closed { code });
        }

        /// Closes the link cleanly.
        pub fn close_clean(&self) {
            self.close(CLOSE_NORMAL);
        }

        /// Awaits the next frame the client sent.
        pub async fn next_sent(&mut self) -> Option<Vec<u8>> {
            self.sent.recv().await
        }

        /// Returns the next already-buffered frame, if any.
        pub fn try_next_sent(&mut self) -> Option<Vec<u8>> {
            self.sent.try_recv().ok()
        }
    }

    /// Creates a connected (client, remote) pair directly.
    #[must_use]
    pub fn link_pair() -> (MockLink, MockRemote) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        (
            MockLink {
                outgoing: sent_tx,
                incoming: event_rx,
                closed: false,
            },
            MockRemote {
                events: event_tx,
                sent: sent_rx,
            },
        )
    }

    #[derive(Default)]
    struct MockState {
        fail_next: u32,
        connects: u32,
        remotes: VecDeque<MockRemote>,
    }

    /// A [`Connector`] that hands out in-memory links and can be scripted
    /// to fail.
    #[derive(Clone, Default)]
    pub struct MockConnector {
        state: Arc<Mutex<MockState>>,
    }

    impl MockConnector {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next `n` connect calls fail.
        pub fn fail_next(&self, n: u32) {
            self.state.lock().expect("mock state poisoned").fail_next = n;
        }

        /// Number of connect calls observed (including failures).
        #[must_use]
        pub fn connect_count(&self) -> u32 {
            self.state.lock().expect("mock state poisoned").connects
        }

        /// Takes the remote handle of the oldest un-collected link.
        #[must_use]
        pub fn take_remote(&self) -> Option<MockRemote> {
            self.state
                .lock()
                .expect("mock state poisoned")
                .remotes
                .pop_front()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _url: &str) -> SyncResult<Box<dyn SocketLink>> {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.connects += 1;
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(SyncError::Network("scripted connect failure".into()));
            }
            let (link, remote) = link_pair();
            state.remotes.push_back(remote);
            Ok(Box::new(link))
        }
    }
}
