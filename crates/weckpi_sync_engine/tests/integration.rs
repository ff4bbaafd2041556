//! Integration tests for the sync session against the loopback server.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use weckpi_state::{FieldKind, Schema, StateStore};
use weckpi_sync_engine::{
    ChannelTransport, DuplexClient, LinkSink, LoopbackServer, LoopbackTransport, MockTransport,
    RetryConfig, SyncConfig, SyncError, SyncSession, SyncState, SyncTransport,
};
use weckpi_sync_protocol::{PatchMessage, Snapshot, SyncMessage};

type Session = SyncSession<LoopbackTransport>;

fn schema() -> Schema {
    Schema::builder()
        .field("music.volume", FieldKind::Number, json!(100))
        .field("music.isPlaying", FieldKind::Bool, json!(false))
        .build()
        .unwrap()
}

fn config() -> SyncConfig {
    SyncConfig::new("loopback://").with_retry(
        RetryConfig::unbounded()
            .with_initial_delay(Duration::from_millis(2))
            .with_max_delay(Duration::from_millis(10))
            .with_jitter(false),
    )
}

/// Starts a session on a new loopback client and drives it in the
/// background.
async fn start(server: &LoopbackServer) -> (Arc<Session>, JoinHandle<()>) {
    let (transport, events) = server.client();
    let store = Arc::new(StateStore::new(schema()));
    let session = Arc::new(SyncSession::new(config(), Arc::new(transport), store));

    let runner = Arc::clone(&session);
    let handle = tokio::spawn(async move {
        let _ = runner.run(events).await;
    });
    session.connect().await.unwrap();
    (session, handle)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

async fn synchronized<T: SyncTransport + 'static>(session: &SyncSession<T>) {
    eventually(|| session.state() == SyncState::Synchronized).await;
}

fn value<T: SyncTransport + 'static>(session: &SyncSession<T>, path: &str) -> Value {
    session.store().get_str(path).unwrap()
}

#[tokio::test]
async fn handshake_then_bidirectional_flow() {
    let server = LoopbackServer::new(json!({"music": {"volume": 50, "isPlaying": false}}));
    let (session, _handle) = start(&server).await;
    synchronized(&session).await;
    assert_eq!(value(&session, "music.volume"), json!(50));
    assert!(server.received_patches().is_empty());

    session.store().set_str("music.volume", json!(70)).unwrap();
    assert_eq!(value(&session, "music.volume"), json!(70));
    assert_eq!(
        server.received_patches(),
        vec![PatchMessage {
            path: "music.volume".into(),
            value: json!(70),
        }]
    );

    server.push_patch("music.isPlaying", json!(true)).unwrap();
    eventually(|| value(&session, "music.isPlaying") == json!(true)).await;
    assert_eq!(server.received_patches().len(), 1);
    assert_eq!(session.guard().depth(), 0);
}

#[tokio::test]
async fn offline_edits_are_discarded_on_reconnect() {
    let server = LoopbackServer::new(json!({"music": {"volume": 50, "isPlaying": false}}));
    let (session, _handle) = start(&server).await;
    synchronized(&session).await;

    server.drop_connections();
    eventually(|| session.state() == SyncState::Disconnected).await;

    session.store().set_str("music.volume", json!(5)).unwrap();
    assert_eq!(value(&session, "music.volume"), json!(5));
    assert_eq!(session.stats().patches_dropped, 1);

    server.push_patch("music.volume", json!(60)).unwrap();
    server.restore_connections();
    synchronized(&session).await;

    assert_eq!(value(&session, "music.volume"), json!(60));
    assert!(server.received_patches().is_empty());
    assert_eq!(session.stats().handshakes_completed, 2);
}

#[tokio::test]
async fn snapshot_failures_are_retried() {
    let server = LoopbackServer::new(json!({"music": {"volume": 20}}));
    server.fail_next_snapshots(2);
    let (session, _handle) = start(&server).await;
    synchronized(&session).await;

    assert_eq!(value(&session, "music.volume"), json!(20));
    assert_eq!(value(&session, "music.isPlaying"), json!(false));
    let stats = session.stats();
    assert_eq!(stats.snapshot_attempts, 3);
    assert_eq!(stats.retries, 2);
}

#[tokio::test]
async fn patches_from_one_client_reach_another() {
    let server = LoopbackServer::new(json!({"music": {"volume": 50, "isPlaying": false}}));
    let (kitchen, _k) = start(&server).await;
    let (bedroom, _b) = start(&server).await;
    synchronized(&kitchen).await;
    synchronized(&bedroom).await;

    kitchen.store().set_str("music.isPlaying", json!(true)).unwrap();
    eventually(|| value(&bedroom, "music.isPlaying") == json!(true)).await;

    // Applying the rebroadcast must not bounce it back.
    assert_eq!(server.received_patches().len(), 1);
    assert_eq!(bedroom.stats().patches_sent, 0);
}

#[tokio::test]
async fn actions_only_leave_when_synchronized() {
    let server = LoopbackServer::new(json!({}));
    let (transport, _events) = server.client();
    let session = SyncSession::new(
        config(),
        Arc::new(transport),
        Arc::new(StateStore::new(schema())),
    );
    assert!(!session.send_action("music.nextSong"));

    let (session, _handle) = start(&server).await;
    synchronized(&session).await;
    assert!(session.send_action("music.nextSong"));
    assert_eq!(server.actions(), vec!["music.nextSong".to_string()]);
}

#[tokio::test]
async fn rejected_snapshot_releases_guard_after_recovery() {
    let (transport, events) = MockTransport::new();
    let transport = Arc::new(transport);
    transport.push_snapshot_response(Ok(Snapshot::new(json!({"music": {"volume": "loud"}})).unwrap()));
    transport.set_snapshot(Snapshot::new(json!({"music": {"volume": 10}})).unwrap());

    let store = Arc::new(StateStore::new(schema()));
    let session = Arc::new(SyncSession::new(config(), Arc::clone(&transport), store));
    let runner = Arc::clone(&session);
    tokio::spawn(async move {
        let _ = runner.run(events).await;
    });
    transport.connect().await.unwrap();
    synchronized(&session).await;

    assert_eq!(value(&session, "music.volume"), json!(10));
    assert_eq!(session.guard().depth(), 0);
    assert_eq!(session.stats().snapshot_failures, 1);
    assert!(transport.sent_patches().is_empty());
}

#[tokio::test]
async fn disconnect_mid_handshake_abandons_request() {
    let (transport, events) = MockTransport::new();
    let transport = Arc::new(transport);
    let store = Arc::new(StateStore::new(schema()));
    let session = Arc::new(SyncSession::new(
        config().with_retry(
            RetryConfig::unbounded()
                .with_initial_delay(Duration::from_millis(50))
                .with_jitter(false),
        ),
        Arc::clone(&transport),
        store,
    ));
    let runner = Arc::clone(&session);
    tokio::spawn(async move {
        let _ = runner.run(events).await;
    });

    // No snapshot configured: every request fails and is retried.
    transport.connect().await.unwrap();
    eventually(|| transport.snapshot_requests() >= 1).await;
    transport.emit_disconnected();
    eventually(|| session.state() == SyncState::Disconnected).await;
    assert_eq!(session.guard().depth(), 0);

    let requests = transport.snapshot_requests();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.snapshot_requests(), requests);
}

#[tokio::test]
async fn stale_snapshot_from_previous_connection_is_ignored() {
    let (transport, _events) = MockTransport::new();
    let transport = Arc::new(transport);
    transport.set_connected(true);
    let session = SyncSession::new(
        config(),
        Arc::clone(&transport),
        Arc::new(StateStore::new(schema())),
    );

    let first = session.handle_connected();
    session.handle_disconnected();
    let second = session.handle_connected();

    let late = Snapshot::new(json!({"music": {"volume": 1}})).unwrap();
    assert!(matches!(
        session.complete_handshake(first, late),
        Err(SyncError::StaleResponse { .. })
    ));
    assert_eq!(session.state(), SyncState::AwaitingSnapshot);

    let fresh = Snapshot::new(json!({"music": {"volume": 2}})).unwrap();
    session.complete_handshake(second, fresh).unwrap();
    assert_eq!(session.store().get_str("music.volume").unwrap(), json!(2));
}

#[tokio::test]
async fn close_detaches_and_disconnects() {
    let server = LoopbackServer::new(json!({"music": {"volume": 50}}));
    let (session, _handle) = start(&server).await;
    synchronized(&session).await;

    session.close().await.unwrap();
    assert_eq!(session.state(), SyncState::Disconnected);
    assert!(!session.transport().is_connected());
    assert_eq!(session.store().listener_count(), 0);

    session.store().set_str("music.volume", json!(1)).unwrap();
    assert!(server.received_patches().is_empty());
}

async fn next_state(states: &mut watch::Receiver<SyncState>) -> SyncState {
    tokio::time::timeout(Duration::from_secs(2), states.changed())
        .await
        .expect("no state change in time")
        .unwrap();
    *states.borrow_and_update()
}

#[tokio::test]
async fn reconnect_passes_through_every_state() {
    let server = LoopbackServer::new(json!({"music": {"volume": 50, "isPlaying": false}}));
    let (session, _handle) = start(&server).await;
    synchronized(&session).await;

    let mut states = session.subscribe_state();
    let mut seen = vec![*states.borrow_and_update()];

    server.drop_connections();
    seen.push(next_state(&mut states).await);
    assert_eq!(session.guard().depth(), 0);

    // Hold the snapshot back so the awaiting state can be observed.
    server.fail_next_snapshots(u32::MAX);
    server.restore_connections();
    seen.push(next_state(&mut states).await);
    eventually(|| session.stats().snapshot_failures >= 2).await;
    assert_eq!(session.state(), SyncState::AwaitingSnapshot);
    assert_eq!(session.guard().depth(), 1);

    session.store().set_str("music.volume", json!(9)).unwrap();
    assert!(server.received_patches().is_empty());

    server.fail_next_snapshots(0);
    seen.push(next_state(&mut states).await);

    assert_eq!(
        seen,
        vec![
            SyncState::Synchronized,
            SyncState::Disconnected,
            SyncState::AwaitingSnapshot,
            SyncState::Synchronized,
        ]
    );
    assert_eq!(session.guard().depth(), 0);
    assert_eq!(value(&session, "music.volume"), json!(50));
    assert_eq!(session.stats().handshakes_completed, 2);
}

/// Core stand-in reached through a [`ChannelTransport`]: answers snapshot
/// requests from its tree and records everything else it receives.
#[derive(Default)]
struct CoreLink {
    tree: Mutex<Value>,
    url: Mutex<Option<String>>,
    sink: Mutex<Option<LinkSink>>,
    received: Mutex<Vec<SyncMessage>>,
}

impl CoreLink {
    fn push(&self, message: SyncMessage) {
        let sink = self.sink.lock().clone().expect("link not open");
        sink.frame(&message.encode().unwrap());
    }
}

#[async_trait]
impl DuplexClient for CoreLink {
    async fn open(&self, url: &str, sink: LinkSink) -> Result<(), String> {
        *self.url.lock() = Some(url.to_string());
        *self.sink.lock() = Some(sink.clone());
        sink.opened();
        Ok(())
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), String> {
        match SyncMessage::decode(&frame).map_err(|e| e.to_string())? {
            SyncMessage::SnapshotRequest => {
                let tree = self.tree.lock().clone();
                self.push(SyncMessage::Snapshot(Snapshot::new(tree).unwrap()));
            }
            other => self.received.lock().push(other),
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(sink) = self.sink.lock().take() {
            sink.closed();
        }
    }
}

#[tokio::test]
async fn session_over_channel_transport() {
    let link = CoreLink::default();
    *link.tree.lock() = json!({"music": {"volume": 35, "isPlaying": true}});

    let config = SyncConfig::new("ws://weckpi.local:5000").with_retry(config().retry);
    let (transport, events) = ChannelTransport::new(config.server_url.clone(), link);
    let transport = Arc::new(transport);
    let session = Arc::new(SyncSession::new(
        config,
        Arc::clone(&transport),
        Arc::new(StateStore::new(schema())),
    ));
    let runner = Arc::clone(&session);
    tokio::spawn(async move {
        let _ = runner.run(events).await;
    });

    session.connect().await.unwrap();
    synchronized(&session).await;
    assert_eq!(transport.client().url.lock().as_deref(), Some("ws://weckpi.local:5000"));
    assert_eq!(value(&session, "music.volume"), json!(35));

    session.store().set_str("music.volume", json!(60)).unwrap();
    assert!(session.send_action("music.nextSong"));

    transport.client().push(SyncMessage::Patch(PatchMessage {
        path: "/music/isPlaying".into(),
        value: json!(false),
    }));
    eventually(|| value(&session, "music.isPlaying") == json!(false)).await;

    assert_eq!(
        *transport.client().received.lock(),
        vec![
            SyncMessage::Patch(PatchMessage {
                path: "music.volume".into(),
                value: json!(60),
            }),
            SyncMessage::Action(weckpi_sync_protocol::ActionMessage::new("music.nextSong")),
        ]
    );

    session.close().await.unwrap();
    assert!(!transport.is_connected());
    assert!(matches!(session.connect().await, Err(SyncError::Closed)));
}
