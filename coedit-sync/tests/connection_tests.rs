use async_trait::async_trait;
use coedit_crdt::{Operation, VectorClock};
use coedit_sync::socket::mock::MockConnector;
use coedit_sync::{
    frame, reconnect_delay, ConnectionConfig, ConnectionManager, ConnectionState, Connector,
    Message, MessagePayload, MessageType, SocketLink, SyncConfig, SyncError, SyncResult,
    SyncService,
};
use coedit_types::PeerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

fn peer(n: u128) -> PeerId {
    PeerId::from_uuid(Uuid::from_u128(n))
}

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        url: "mock://doc".into(),
        reconnect_interval: Duration::from_millis(10),
        // Long enough to keep heartbeats out of tests that don't want them.
        heartbeat_interval: Duration::from_secs(3600),
        ..ConnectionConfig::default()
    }
}

fn manager_with(config: ConnectionConfig) -> (ConnectionManager, MockConnector) {
    let connector = MockConnector::new();
    let manager = ConnectionManager::new(config, peer(1), Arc::new(connector.clone()));
    (manager, connector)
}

fn state_stream(manager: &ConnectionManager) -> mpsc::UnboundedReceiver<ConnectionState> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on_state_change(move |state| {
        let _ = tx.send(state);
    });
    rx
}

async fn wait_for(rx: &mut mpsc::UnboundedReceiver<ConnectionState>, target: ConnectionState) {
    while let Some(state) = rx.recv().await {
        if state == target {
            return;
        }
    }
    panic!("state stream ended before reaching {target:?}");
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

// ── Backoff (pure) ───────────────────────────────────────────────

#[test]
fn reconnect_delays_are_nondecreasing_and_capped() {
    let config = fast_config();
    let cap = reconnect_delay(&config, config.reconnect_attempts);

    let mut previous = Duration::ZERO;
    for attempt in 0..20 {
        let delay = reconnect_delay(&config, attempt);
        assert!(delay >= previous, "backoff shrank at attempt {attempt}");
        assert!(delay <= cap);
        previous = delay;
    }
    assert_eq!(
        cap,
        config.reconnect_interval * 2u32.pow(config.reconnect_attempts)
    );
}

#[test]
fn backoff_can_be_disabled() {
    let config = ConnectionConfig {
        reconnect_backoff: false,
        ..fast_config()
    };
    for attempt in 0..10 {
        assert_eq!(reconnect_delay(&config, attempt), config.reconnect_interval);
    }
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn connect_reaches_connected_exactly_once() {
    let (manager, connector) = manager_with(fast_config());
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    manager.connect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(connector.connect_count(), 1);

    // A second connect on a live session is an invalid state.
    assert!(matches!(
        manager.connect().await,
        Err(SyncError::InvalidState(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn send_requires_a_connection() {
    let (manager, _connector) = manager_with(fast_config());
    let msg = Message::connect(peer(1));
    assert!(matches!(
        manager.send(&msg),
        Err(SyncError::InvalidState(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn send_delivers_encoded_frames() {
    let (manager, connector) = manager_with(fast_config());
    manager.connect().await.unwrap();
    let mut remote = connector.take_remote().unwrap();

    let op = Operation::insert(0, "hi", peer(1), VectorClock::new());
    let msg = Message::operation(peer(1), op);
    manager.send(&msg).unwrap();

    let bytes = remote.next_sent().await.unwrap();
    assert_eq!(frame::decode(&bytes).unwrap(), msg);

    let metrics = manager.metrics();
    assert_eq!(metrics.messages_sent, 1);
    assert_eq!(metrics.bytes_sent, bytes.len() as u64);
}

#[tokio::test(start_paused = true)]
async fn inbound_frames_reach_message_handlers() {
    let (manager, connector) = manager_with(fast_config());
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.on_message(move |msg| {
        let _ = tx.send(msg.clone());
    });

    manager.connect().await.unwrap();
    let remote = connector.take_remote().unwrap();

    let msg = Message::error(peer(2), "E_TEST", "hello over the wire");
    remote.deliver(frame::encode(&msg).unwrap());

    let received = rx.recv().await.unwrap();
    assert_eq!(received, msg);
    assert_eq!(manager.metrics().messages_received, 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_probes_are_echoed_and_echoes_feed_latency() {
    let config = ConnectionConfig {
        heartbeat_interval: Duration::from_secs(30),
        ..fast_config()
    };
    let (manager, connector) = manager_with(config);
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Message>();
    manager.on_message(move |msg| {
        let _ = msg_tx.send(msg.clone());
    });

    manager.connect().await.unwrap();
    let mut remote = connector.take_remote().unwrap();

    // The driver probes after the interval elapses.
    let bytes = remote.next_sent().await.unwrap();
    let probe = frame::decode(&bytes).unwrap();
    assert_eq!(probe.message_type, MessageType::Heartbeat);
    let MessagePayload::Heartbeat { timestamp: probe_ts } = probe.payload else {
        panic!("expected heartbeat payload");
    };

    // Echoing the probe's stamp back closes the round trip and feeds the
    // latency metric from a stamp this side originated.
    remote.deliver(frame::encode(&Message::heartbeat_echo(peer(2), probe_ts)).unwrap());
    eventually(|| manager.metrics().messages_received == 1).await;
    assert!(manager.metrics().latency_ms < 60_000);
    // A consumed echo is not replied to and never reaches handlers.
    assert!(remote.try_next_sent().is_none());
    assert!(msg_rx.try_recv().is_err());

    // A stamp we never sent is the peer's probe: it comes back unchanged.
    remote.deliver(frame::encode(&Message::heartbeat_echo(peer(2), 12_345)).unwrap());
    let reply = frame::decode(&remote.next_sent().await.unwrap()).unwrap();
    assert_eq!(reply.message_type, MessageType::Heartbeat);
    assert_eq!(reply.sender, peer(1));
    assert_eq!(reply.payload, MessagePayload::Heartbeat { timestamp: 12_345 });
    assert!(msg_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn undecodable_frames_are_dropped_without_closing() {
    let (manager, connector) = manager_with(fast_config());
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    manager.on_error(move |err| {
        let _ = err_tx.send(err.to_string());
    });

    manager.connect().await.unwrap();
    let remote = connector.take_remote().unwrap();
    remote.deliver(vec![9, 9, 9]);

    let reported = err_rx.recv().await.unwrap();
    assert!(reported.contains("protocol error"));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.metrics().errors >= 1);
}

// ── Reconnection ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn abnormal_close_walks_the_reconnect_ladder() {
    let (manager, connector) = manager_with(fast_config());
    let mut states = state_stream(&manager);

    manager.connect().await.unwrap();
    let remote = connector.take_remote().unwrap();

    remote.close(1006);
    wait_for(&mut states, ConnectionState::Reconnecting).await;
    wait_for(&mut states, ConnectionState::Connecting).await;
    wait_for(&mut states, ConnectionState::Connected).await;

    assert_eq!(connector.connect_count(), 2);
    assert_eq!(manager.metrics().reconnections, 1);
    assert!(connector.take_remote().is_some());
}

#[tokio::test(start_paused = true)]
async fn clean_close_never_reconnects() {
    let (manager, connector) = manager_with(fast_config());
    let mut states = state_stream(&manager);

    manager.connect().await.unwrap();
    let remote = connector.take_remote().unwrap();

    remote.close_clean();
    wait_for(&mut states, ConnectionState::Disconnected).await;
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_max_attempts() {
    let config = ConnectionConfig {
        reconnect_attempts: 2,
        ..fast_config()
    };
    let (manager, connector) = manager_with(config);
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    manager.on_error(move |err| {
        let _ = err_tx.send(err.to_string());
    });
    let mut states = state_stream(&manager);

    manager.connect().await.unwrap();
    let remote = connector.take_remote().unwrap();

    connector.fail_next(10);
    remote.close(1006);

    wait_for(&mut states, ConnectionState::Failed).await;
    assert_eq!(manager.state(), ConnectionState::Failed);
    // Initial connect plus the two failed reconnect attempts.
    assert_eq!(connector.connect_count(), 3);

    let reported = err_rx.recv().await.unwrap();
    assert!(reported.contains("connection failed after 2"));
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent_and_final() {
    let (manager, connector) = manager_with(fast_config());
    manager.connect().await.unwrap();
    let _remote = connector.take_remote().unwrap();

    manager.disconnect();
    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // No reconnect machinery left running.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.connect_count(), 1);
}

struct HangingConnector;

#[async_trait]
impl Connector for HangingConnector {
    async fn connect(&self, _url: &str) -> SyncResult<Box<dyn SocketLink>> {
        std::future::pending::<SyncResult<Box<dyn SocketLink>>>().await
    }
}

#[tokio::test(start_paused = true)]
async fn initial_connect_times_out() {
    let manager = ConnectionManager::new(fast_config(), peer(1), Arc::new(HangingConnector));
    assert!(matches!(manager.connect().await, Err(SyncError::Timeout)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// ── Reconnect × pending queue ────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pending_operations_survive_reconnect() {
    let (manager, connector) = manager_with(fast_config());
    let mut states = state_stream(&manager);
    manager.connect().await.unwrap();
    let mut remote1 = connector.take_remote().unwrap();

    // Three local edits queued and flushed, never acknowledged.
    let mut service = SyncService::new(peer(1), SyncConfig::default());
    for (i, text) in ["a", "b", "c"].iter().enumerate() {
        let mut clock = VectorClock::new();
        clock.observe(peer(1), i as u64 + 1);
        service
            .add_operation(Operation::insert(i, *text, peer(1), clock))
            .unwrap();
    }
    let first = service.flush(1_000).unwrap();
    manager.send(&first).unwrap();

    let sent = frame::decode(&remote1.next_sent().await.unwrap()).unwrap();
    let MessagePayload::Sync(first_body) = &sent.payload else {
        panic!("expected sync payload");
    };
    let original_ids: Vec<_> = first_body.operations.iter().map(|op| op.id).collect();
    assert_eq!(original_ids.len(), 3);

    // The transport drops without an ack.
    remote1.close(1006);
    wait_for(&mut states, ConnectionState::Connected).await;
    let mut remote2 = connector.take_remote().unwrap();

    // The retry re-sends the same batch: same sequence, same ids.
    let (messages, errors) = service.tick(2_100);
    assert!(errors.is_empty());
    assert_eq!(messages.len(), 1);
    manager.send(&messages[0]).unwrap();

    let resent = frame::decode(&remote2.next_sent().await.unwrap()).unwrap();
    let MessagePayload::Sync(second_body) = &resent.payload else {
        panic!("expected sync payload");
    };
    let resent_ids: Vec<_> = second_body.operations.iter().map(|op| op.id).collect();
    assert_eq!(resent_ids, original_ids);
    assert_eq!(second_body.sequence_number, first_body.sequence_number);
}
