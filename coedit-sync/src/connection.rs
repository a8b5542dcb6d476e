//! Connection lifecycle management.
//!
//! One [`ConnectionManager`] owns one socket: it connects with a timeout,
//! heartbeats while connected, and reconnects with exponential backoff when
//! the transport drops abnormally. A clean close (code 1000) or an explicit
//! [`ConnectionManager::disconnect`] ends the session without reconnecting.
//!
//! Heartbeats are probe/echo: each side probes on its interval, the peer
//! echoes the probe's stamp back unchanged, and the latency metric is fed
//! only from stamps this side itself sent out.
//!
//! All socket I/O happens on a single driver task. Registered handlers are
//! invoked synchronously on that task and must not subscribe or
//! unsubscribe from within a handler.

use crate::error::{SyncError, SyncResult};
use crate::frame;
use crate::protocol::{now_ms, Message, MessagePayload, MessageType};
use crate::socket::{Connector, SocketEvent, SocketLink, CLOSE_NORMAL};
use coedit_types::PeerId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle states of a managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; stays here until `connect` is called
    /// again.
    Failed,
}

/// Configuration for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoint handed to the connector.
    pub url: String,
    /// Subprotocols offered to the transport; carried, not interpreted.
    pub protocols: Vec<String>,
    /// Whether abnormal closes trigger reconnection.
    pub reconnect: bool,
    /// Consecutive failed attempts tolerated before giving up.
    pub reconnect_attempts: u32,
    /// Base reconnect delay.
    pub reconnect_interval: Duration,
    /// Whether the delay doubles per consecutive failure.
    pub reconnect_backoff: bool,
    /// Interval between heartbeats while connected.
    pub heartbeat_interval: Duration,
    /// Bound on a single connect attempt.
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            protocols: Vec::new(),
            reconnect: true,
            reconnect_attempts: 5,
            reconnect_interval: Duration::from_millis(1000),
            reconnect_backoff: true,
            heartbeat_interval: Duration::from_millis(30_000),
            timeout: Duration::from_millis(10_000),
        }
    }
}

impl ConnectionConfig {
    /// Creates a configuration for `url` with the standard defaults.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Delay before reconnect attempt number `attempt` (0-based).
///
/// `base × 2^attempt`, capped at `base × 2^reconnect_attempts`. Without
/// backoff the delay is constant. The sequence is non-decreasing.
#[must_use]
pub fn reconnect_delay(config: &ConnectionConfig, attempt: u32) -> Duration {
    if !config.reconnect_backoff {
        return config.reconnect_interval;
    }
    let exponent = attempt.min(config.reconnect_attempts);
    config
        .reconnect_interval
        .saturating_mul(2u32.saturating_pow(exponent))
}

/// Counters describing a connection's lifetime. All monotonic except
/// `latency_ms` and `last_error`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reconnections: u64,
    pub errors: u64,
    /// Most recent heartbeat round-trip, milliseconds.
    pub latency_ms: u64,
    pub last_error: Option<String>,
}

/// Handle returned by the subscription methods; pass to
/// [`ConnectionManager::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId {
    kind: ListenerKind,
    id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Message,
    State,
    Error,
}

type MessageHandler = Box<dyn Fn(&Message) + Send + Sync>;
type StateHandler = Box<dyn Fn(ConnectionState) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(&SyncError) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    message: HashMap<u64, MessageHandler>,
    state: HashMap<u64, StateHandler>,
    error: HashMap<u64, ErrorHandler>,
}

struct Shared {
    config: ConnectionConfig,
    peer: PeerId,
    state: Mutex<ConnectionState>,
    metrics: Mutex<ConnectionMetrics>,
    listeners: Mutex<Listeners>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == next {
                return;
            }
            *state = next;
        }
        debug!(state = ?next, "connection state changed");
        let listeners = self.listeners.lock().expect("listener lock poisoned");
        for handler in listeners.state.values() {
            handler(next);
        }
    }

    fn dispatch_message(&self, message: &Message) {
        let listeners = self.listeners.lock().expect("listener lock poisoned");
        for handler in listeners.message.values() {
            handler(message);
        }
    }

    fn dispatch_error(&self, error: &SyncError) {
        {
            let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
            metrics.errors += 1;
            metrics.last_error = Some(error.to_string());
        }
        let listeners = self.listeners.lock().expect("listener lock poisoned");
        for handler in listeners.error.values() {
            handler(error);
        }
    }

    fn with_metrics(&self, update: impl FnOnce(&mut ConnectionMetrics)) {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        update(&mut metrics);
    }
}

/// Manages one socket's lifecycle, heartbeats, and reconnection.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    driver: Mutex<Option<JoinHandle<()>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl ConnectionManager {
    /// Creates a manager for `peer` over the given connector.
    #[must_use]
    pub fn new(config: ConnectionConfig, peer: PeerId, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                peer,
                state: Mutex::new(ConnectionState::Disconnected),
                metrics: Mutex::new(ConnectionMetrics::default()),
                listeners: Mutex::new(Listeners::default()),
            }),
            connector,
            driver: Mutex::new(None),
            outbound: Mutex::new(None),
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().expect("state lock poisoned")
    }

    /// A snapshot of the connection counters.
    #[must_use]
    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared
            .metrics
            .lock()
            .expect("metrics lock poisoned")
            .clone()
    }

    /// Opens the connection. Errors with [`SyncError::Timeout`] if the
    /// transport does not come up within the configured timeout, and
    /// [`SyncError::InvalidState`] if a session is already active.
    pub async fn connect(&self) -> SyncResult<()> {
        match self.state() {
            ConnectionState::Disconnected | ConnectionState::Failed => {}
            other => {
                return Err(SyncError::InvalidState(format!(
                    "connect while {other:?}"
                )));
            }
        }

        // A finished driver from a previous session may still be parked.
        if let Some(handle) = self.driver.lock().expect("driver lock poisoned").take() {
            handle.abort();
        }

        self.shared.set_state(ConnectionState::Connecting);

        let attempt = self.connector.connect(&self.shared.config.url);
        let link = match tokio::time::timeout(self.shared.config.timeout, attempt).await {
            Ok(Ok(link)) => link,
            Ok(Err(err)) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
            Err(_) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(SyncError::Timeout);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock().expect("outbound lock poisoned") = Some(tx);
        self.shared.set_state(ConnectionState::Connected);

        let shared = Arc::clone(&self.shared);
        let connector = Arc::clone(&self.connector);
        let handle = tokio::spawn(drive(shared, connector, link, rx));
        *self.driver.lock().expect("driver lock poisoned") = Some(handle);
        Ok(())
    }

    /// Tears the session down without reconnecting. Idempotent and
    /// non-blocking; pending sends are dropped.
    pub fn disconnect(&self) {
        if let Some(handle) = self.driver.lock().expect("driver lock poisoned").take() {
            handle.abort();
        }
        *self.outbound.lock().expect("outbound lock poisoned") = None;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Encodes and sends one message. Errors with
    /// [`SyncError::InvalidState`] unless currently connected.
    pub fn send(&self, message: &Message) -> SyncResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(SyncError::InvalidState("send while not connected".into()));
        }
        let bytes = frame::encode(message)?;
        let len = bytes.len() as u64;

        let outbound = self.outbound.lock().expect("outbound lock poisoned");
        let tx = outbound.as_ref().ok_or(SyncError::ChannelClosed)?;
        tx.send(bytes).map_err(|_| SyncError::ChannelClosed)?;

        self.shared.with_metrics(|m| {
            m.messages_sent += 1;
            m.bytes_sent += len;
        });
        Ok(())
    }

    /// Registers a handler for decoded inbound messages.
    pub fn on_message(&self, handler: impl Fn(&Message) + Send + Sync + 'static) -> ListenerId {
        let mut listeners = self.shared.listeners.lock().expect("listener lock poisoned");
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.message.insert(id, Box::new(handler));
        ListenerId {
            kind: ListenerKind::Message,
            id,
        }
    }

    /// Registers a handler for state transitions.
    pub fn on_state_change(
        &self,
        handler: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut listeners = self.shared.listeners.lock().expect("listener lock poisoned");
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.state.insert(id, Box::new(handler));
        ListenerId {
            kind: ListenerKind::State,
            id,
        }
    }

    /// Registers a handler for connection-level errors.
    pub fn on_error(&self, handler: impl Fn(&SyncError) + Send + Sync + 'static) -> ListenerId {
        let mut listeners = self.shared.listeners.lock().expect("listener lock poisoned");
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.error.insert(id, Box::new(handler));
        ListenerId {
            kind: ListenerKind::Error,
            id,
        }
    }

    /// Removes a previously registered handler.
    pub fn unsubscribe(&self, listener: ListenerId) {
        let mut listeners = self.shared.listeners.lock().expect("listener lock poisoned");
        match listener.kind {
            ListenerKind::Message => {
                listeners.message.remove(&listener.id);
            }
            ListenerKind::State => {
                listeners.state.remove(&listener.id);
            }
            ListenerKind::Error => {
                listeners.error.remove(&listener.id);
            }
        }
    }
}

enum Step {
    Incoming(Option<SocketEvent>),
    Outgoing(Option<Vec<u8>>),
    Heartbeat,
}

/// The per-session driver: pumps the socket until it closes, then walks the
/// reconnect ladder.
async fn drive(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    mut link: Box<dyn SocketLink>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let config = shared.config.clone();
    let mut attempts: u32 = 0;

    loop {
        let close_code = pump(&shared, &config, link.as_mut(), &mut outbound).await;

        let Some(close_code) = close_code else {
            // The manager dropped the outbound channel: orderly shutdown.
            link.close().await;
            shared.set_state(ConnectionState::Disconnected);
            return;
        };

        if close_code == CLOSE_NORMAL || !config.reconnect {
            shared.set_state(ConnectionState::Disconnected);
            return;
        }

        // Abnormal close: climb the backoff ladder until a connect sticks.
        loop {
            if attempts >= config.reconnect_attempts {
                shared.set_state(ConnectionState::Failed);
                shared.dispatch_error(&SyncError::ConnectionFailed { attempts });
                return;
            }
            shared.set_state(ConnectionState::Reconnecting);
            let delay = reconnect_delay(&config, attempts);
            attempts += 1;
            debug!(attempt = attempts, ?delay, "reconnecting");
            tokio::time::sleep(delay).await;

            shared.set_state(ConnectionState::Connecting);
            match tokio::time::timeout(config.timeout, connector.connect(&config.url)).await {
                Ok(Ok(next_link)) => {
                    link = next_link;
                    attempts = 0;
                    shared.with_metrics(|m| m.reconnections += 1);
                    shared.set_state(ConnectionState::Connected);
                    break;
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "reconnect attempt failed");
                }
                Err(_) => {
                    warn!("reconnect attempt timed out");
                }
            }
        }
    }
}

/// Pumps one connected session. Returns the close code, or `None` when the
/// manager shut the outbound channel.
async fn pump(
    shared: &Shared,
    config: &ConnectionConfig,
    link: &mut dyn SocketLink,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) -> Option<u16> {
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    // Stamps of probes we sent and have not yet seen echoed.
    let mut outstanding: VecDeque<u64> = VecDeque::new();

    loop {
        let step = tokio::select! {
            event = link.recv() => Step::Incoming(event),
            frame = outbound.recv() => Step::Outgoing(frame),
            _ = heartbeat.tick() => Step::Heartbeat,
        };

        match step {
            Step::Incoming(Some(SocketEvent::Frame(bytes))) => {
                shared.with_metrics(|m| {
                    m.messages_received += 1;
                    m.bytes_received += bytes.len() as u64;
                });
                match frame::decode(&bytes) {
                    Ok(message) => {
                        if message.message_type == MessageType::Heartbeat {
                            if let MessagePayload::Heartbeat { timestamp } = &message.payload {
                                let stamp = *timestamp;
                                if let Some(found) =
                                    outstanding.iter().position(|&t| t == stamp)
                                {
                                    // Our own probe coming home.
                                    outstanding.remove(found);
                                    let rtt = now_ms().saturating_sub(stamp);
                                    shared.with_metrics(|m| m.latency_ms = rtt);
                                } else if send_frame(
                                    shared,
                                    link,
                                    &Message::heartbeat_echo(shared.peer, stamp),
                                )
                                .await
                                .is_err()
                                {
                                    return Some(crate::socket::CLOSE_ABNORMAL);
                                }
                            }
                        } else {
                            shared.dispatch_message(&message);
                        }
                    }
                    Err(err) => {
                        // Fatal to the frame only: log, count, drop.
                        warn!(error = %err, "dropping undecodable frame");
                        shared.dispatch_error(&err);
                    }
                }
            }
            Step::Incoming(Some(SocketEvent::Closed { code })) => return Some(code),
            Step::Incoming(None) => return Some(crate::socket::CLOSE_ABNORMAL),
            Step::Outgoing(Some(bytes)) => {
                if let Err(err) = link.send(bytes).await {
                    warn!(error = %err, "socket send failed");
                    return Some(crate::socket::CLOSE_ABNORMAL);
                }
            }
            Step::Outgoing(None) => return None,
            Step::Heartbeat => {
                let beat = Message::heartbeat(shared.peer);
                if let MessagePayload::Heartbeat { timestamp } = &beat.payload {
                    outstanding.push_back(*timestamp);
                    if outstanding.len() > 8 {
                        outstanding.pop_front();
                    }
                }
                if send_frame(shared, link, &beat).await.is_err() {
                    return Some(crate::socket::CLOSE_ABNORMAL);
                }
            }
        }
    }
}

/// Encodes and writes one protocol-internal message, updating the send
/// counters. An encode failure drops the message; only a socket failure is
/// an error.
async fn send_frame(
    shared: &Shared,
    link: &mut dyn SocketLink,
    message: &Message,
) -> Result<(), ()> {
    let Ok(bytes) = frame::encode(message) else {
        return Ok(());
    };
    shared.with_metrics(|m| {
        m.messages_sent += 1;
        m.bytes_sent += bytes.len() as u64;
    });
    link.send(bytes).await.map_err(|_| ())
}
