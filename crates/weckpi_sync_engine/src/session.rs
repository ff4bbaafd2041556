//! Sync session state machine.
//!
//! ```text
//!                connect                 snapshot applied
//! Disconnected ──────────▶ AwaitingSnapshot ──────────────▶ Synchronized
//!      ▲                         │                               │
//!      └──────── disconnect ─────┴────────── disconnect ─────────┘
//! ```
//!
//! While awaiting the snapshot the session holds one level of echo
//! suppression, so nothing the handshake writes is sent back. Every
//! connect starts a new epoch; a snapshot response is only applied if its
//! epoch is still current.
//!
//! Once closed, a session stays closed: connects and handshakes fail with
//! [`SyncError::Closed`].

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::listener::RemoteListener;
use crate::observer::{ChangeObserver, Outbound};
use crate::state::{SessionStatus, SyncState, SyncStats};
use crate::transport::{EventStream, SyncTransport, TransportEvent};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use weckpi_state::{EchoGuard, ListenerId, StateStore, Suppression};
use weckpi_sync_protocol::{PatchMessage, Snapshot};

type HandshakeFuture<'a> = Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>>;

/// Bridges a [`StateStore`] and the WeckPi core.
pub struct SyncSession<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    store: Arc<StateStore>,
    guard: EchoGuard,
    status: Arc<SessionStatus>,
    outbound: Outbound<T>,
    listener: RemoteListener,
    observer_id: ListenerId,
    handshake_hold: Mutex<Option<Suppression>>,
    closed: AtomicBool,
}

impl<T: SyncTransport + 'static> SyncSession<T> {
    /// Creates a disconnected session and attaches its change observer to
    /// `store`.
    pub fn new(config: SyncConfig, transport: Arc<T>, store: Arc<StateStore>) -> Self {
        let guard = EchoGuard::new();
        let status = Arc::new(SessionStatus::new());
        let outbound = Outbound::new(
            Arc::clone(&transport),
            Arc::clone(&status),
            config.path_style,
        );
        let observer_id = ChangeObserver::new(guard.clone(), outbound.clone()).attach(&store);
        let listener = RemoteListener::new(Arc::clone(&store), guard.clone(), Arc::clone(&status));

        Self {
            config,
            transport,
            store,
            guard,
            status,
            outbound,
            listener,
            observer_id,
            handshake_hold: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the synchronized store.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the echo guard shared by observer, listener and handshake.
    pub fn guard(&self) -> &EchoGuard {
        &self.guard
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        self.status.state()
    }

    /// Gets the epoch of the current connection.
    pub fn epoch(&self) -> u64 {
        self.status.epoch()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.status.stats()
    }

    /// Subscribes to state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.status.subscribe()
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Opens the transport connection. The handshake starts when the
    /// resulting [`TransportEvent::Connected`] is processed.
    pub async fn connect(&self) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        self.transport.connect().await
    }

    /// Sends a named action if synchronized. Returns true if it was sent.
    pub fn send_action(&self, name: &str) -> bool {
        self.outbound.send_action(name)
    }

    /// Handles a connect event and returns the new connection epoch.
    ///
    /// A connect seen while not disconnected is treated as a disconnect
    /// followed by a connect. A closed session ignores the event and keeps
    /// its epoch.
    pub fn handle_connected(&self) -> u64 {
        if self.is_closed() {
            debug!("connect event after close ignored");
            return self.epoch();
        }
        if self.state() != SyncState::Disconnected {
            debug!(state = ?self.state(), "connect without prior disconnect");
            self.handle_disconnected();
        }

        let epoch = self.status.next_epoch();
        *self.handshake_hold.lock() = Some(self.guard.acquire());
        if let Err(e) = self.status.transition(SyncState::AwaitingSnapshot) {
            warn!(error = %e, "unexpected state on connect");
        }
        info!(epoch, "connected, awaiting snapshot");
        epoch
    }

    /// Handles a disconnect event. Outbound traffic is dropped until the
    /// next handshake completes.
    pub fn handle_disconnected(&self) {
        self.release_handshake_hold();
        if self.state() == SyncState::Disconnected {
            return;
        }
        if let Err(e) = self.status.transition(SyncState::Disconnected) {
            warn!(error = %e, "unexpected state on disconnect");
        }
        info!(epoch = self.epoch(), "disconnected");
    }

    /// Handles a patch pushed by the core. Returns true if it was applied.
    pub fn handle_patch(&self, message: &PatchMessage) -> bool {
        self.listener.apply(message)
    }

    /// Requests and applies the snapshot for connection `epoch`, retrying
    /// with backoff until it succeeds, the epoch is superseded, the session
    /// is closed or the attempt limit is reached.
    pub async fn handshake(&self, epoch: u64) -> SyncResult<()> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt);
                debug!(epoch, attempt, ?delay, "waiting before snapshot retry");
                tokio::time::sleep(delay).await;
                self.status.record(|s| s.retries += 1);
            }
            if self.is_closed() {
                return Err(SyncError::Closed);
            }
            self.ensure_current(epoch)?;

            self.status.record(|s| s.snapshot_attempts += 1);
            let response =
                match tokio::time::timeout(self.config.snapshot_timeout, self.transport.request_snapshot())
                    .await
                {
                    Ok(response) => response,
                    Err(_) => Err(SyncError::SnapshotTimeout),
                };

            let result = response.and_then(|snapshot| self.complete_handshake(epoch, snapshot));
            match result {
                Ok(()) => return Ok(()),
                Err(e @ (SyncError::StaleResponse { .. } | SyncError::Closed)) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    warn!(epoch, attempt, error = %e, "snapshot attempt failed");
                    self.status.record(|s| {
                        s.snapshot_failures += 1;
                        s.last_error = Some(e.to_string());
                    });
                    if !e.is_retryable() || retry.is_exhausted(attempt) {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Applies a snapshot received for connection `epoch`.
    ///
    /// Fails with [`SyncError::StaleResponse`] if the epoch is no longer
    /// current or the session is not awaiting a snapshot; the store is left
    /// untouched in that case.
    pub fn complete_handshake(&self, epoch: u64, snapshot: Snapshot) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        if let Err(e) = self.ensure_current(epoch) {
            self.status.record(|s| s.stale_responses += 1);
            debug!(epoch, current = self.epoch(), "stale snapshot discarded");
            return Err(e);
        }

        let report = self
            .store
            .exclusive(|| {
                self.guard
                    .with_suppressed(|| self.store.replace_all(snapshot.as_value()))
            })
            .map_err(|e| SyncError::SnapshotFailed(e.to_string()))?;

        if !report.unknown.is_empty() {
            warn!(epoch, unknown = ?report.unknown, "snapshot contains fields outside the schema");
        }
        if !report.defaulted.is_empty() {
            debug!(epoch, defaulted = report.defaulted.len(), "snapshot omitted fields, defaults used");
        }

        self.status.transition(SyncState::Synchronized)?;
        self.release_handshake_hold();
        self.status.record(|s| {
            s.handshakes_completed += 1;
            s.last_sync_time = Some(Instant::now());
            s.last_error = None;
        });
        info!(epoch, "synchronized");
        Ok(())
    }

    /// Processes transport events until the channel closes.
    ///
    /// The snapshot handshake runs concurrently with event processing, so a
    /// disconnect arriving mid-handshake abandons the request immediately.
    pub async fn run(&self, mut events: EventStream) -> SyncResult<()> {
        let mut pending: Option<HandshakeFuture<'_>> = None;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => {
                        let epoch = self.handle_connected();
                        let handshake: HandshakeFuture<'_> = Box::pin(self.handshake(epoch));
                        pending = Some(handshake);
                    }
                    Some(TransportEvent::Disconnected) => {
                        pending = None;
                        self.handle_disconnected();
                    }
                    Some(TransportEvent::Patch(message)) => {
                        self.handle_patch(&message);
                    }
                    None => break,
                },
                result = async {
                    match pending.as_mut() {
                        Some(handshake) => handshake.as_mut().await,
                        None => std::future::pending().await,
                    }
                }, if pending.is_some() => {
                    pending = None;
                    if let Err(e) = result {
                        warn!(error = %e, "handshake abandoned");
                    }
                }
            }
        }

        drop(pending);
        self.handle_disconnected();
        debug!("transport event stream ended");
        Ok(())
    }

    /// Detaches from the store and closes the transport. The session cannot
    /// be reconnected afterwards.
    pub async fn close(&self) -> SyncResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.handle_disconnected();
        self.store.remove_listener(self.observer_id);
        self.transport.close().await
    }

    fn ensure_current(&self, epoch: u64) -> SyncResult<()> {
        let current = self.epoch();
        if epoch != current || self.state() != SyncState::AwaitingSnapshot {
            return Err(SyncError::StaleResponse { epoch, current });
        }
        Ok(())
    }

    fn release_handshake_hold(&self) {
        self.handshake_hold.lock().take();
    }
}

impl<T: SyncTransport> Drop for SyncSession<T> {
    fn drop(&mut self) {
        self.store.remove_listener(self.observer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::time::Duration;
    use weckpi_state::{FieldKind, Schema};

    fn session() -> (SyncSession<MockTransport>, Arc<MockTransport>) {
        let schema = Schema::builder()
            .field("music.volume", FieldKind::Number, json!(100))
            .field("music.isPlaying", FieldKind::Bool, json!(false))
            .build()
            .unwrap();
        let store = Arc::new(StateStore::new(schema));
        let (transport, _events) = MockTransport::new();
        transport.set_connected(true);
        let transport = Arc::new(transport);
        let config = SyncConfig::new("mock://").with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );
        (
            SyncSession::new(config, Arc::clone(&transport), store),
            transport,
        )
    }

    fn snapshot(volume: i64, playing: bool) -> Snapshot {
        Snapshot::new(json!({"music": {"volume": volume, "isPlaying": playing}})).unwrap()
    }

    #[test]
    fn initial_state() {
        let (session, _transport) = session();
        assert_eq!(session.state(), SyncState::Disconnected);
        assert_eq!(session.epoch(), 0);
        assert!(!session.guard().is_suppressed());
        assert_eq!(session.store().listener_count(), 1);
    }

    #[test]
    fn connect_holds_suppression_until_synchronized() {
        let (session, transport) = session();
        let epoch = session.handle_connected();
        assert_eq!(session.state(), SyncState::AwaitingSnapshot);
        assert!(session.guard().is_suppressed());

        session.store().set_str("music.volume", json!(1)).unwrap();
        assert!(transport.sent_patches().is_empty());

        session.complete_handshake(epoch, snapshot(50, false)).unwrap();
        assert_eq!(session.state(), SyncState::Synchronized);
        assert_eq!(session.guard().depth(), 0);
        assert_eq!(session.store().get_str("music.volume").unwrap(), json!(50));
        assert!(transport.sent_patches().is_empty());
    }

    #[test]
    fn stale_snapshot_is_discarded() {
        let (session, _transport) = session();
        let old = session.handle_connected();
        session.handle_disconnected();
        let current = session.handle_connected();
        assert_ne!(old, current);

        let err = session.complete_handshake(old, snapshot(1, true)).unwrap_err();
        assert!(matches!(err, SyncError::StaleResponse { .. }));
        assert_eq!(session.state(), SyncState::AwaitingSnapshot);
        assert_eq!(session.store().get_str("music.volume").unwrap(), json!(100));
        assert_eq!(session.stats().stale_responses, 1);
    }

    #[test]
    fn snapshot_after_synchronized_is_stale() {
        let (session, _transport) = session();
        let epoch = session.handle_connected();
        session.complete_handshake(epoch, snapshot(50, false)).unwrap();
        assert!(session.complete_handshake(epoch, snapshot(60, false)).is_err());
        assert_eq!(session.store().get_str("music.volume").unwrap(), json!(50));
    }

    #[test]
    fn rejected_snapshot_keeps_awaiting() {
        let (session, _transport) = session();
        let epoch = session.handle_connected();
        let bad = Snapshot::new(json!({"music": {"volume": "loud"}})).unwrap();

        let err = session.complete_handshake(epoch, bad).unwrap_err();
        assert!(matches!(err, SyncError::SnapshotFailed(_)));
        assert_eq!(session.state(), SyncState::AwaitingSnapshot);
        assert_eq!(session.guard().depth(), 1);
    }

    #[test]
    fn reconnect_while_synchronized_goes_through_disconnected() {
        let (session, _transport) = session();
        let epoch = session.handle_connected();
        session.complete_handshake(epoch, snapshot(50, false)).unwrap();

        session.handle_connected();
        assert_eq!(session.state(), SyncState::AwaitingSnapshot);
        assert_eq!(session.guard().depth(), 1);
    }

    #[test]
    fn disconnect_releases_hold() {
        let (session, _transport) = session();
        session.handle_connected();
        session.handle_disconnected();
        assert_eq!(session.state(), SyncState::Disconnected);
        assert_eq!(session.guard().depth(), 0);
    }

    #[tokio::test]
    async fn handshake_retries_then_succeeds() {
        let (session, transport) = session();
        transport.push_snapshot_response(Err(SyncError::transport_retryable("busy")));
        transport.push_snapshot_response(Err(SyncError::SnapshotTimeout));
        transport.set_snapshot(snapshot(42, true));

        let epoch = session.handle_connected();
        session.handshake(epoch).await.unwrap();

        assert_eq!(session.state(), SyncState::Synchronized);
        assert_eq!(session.store().get_str("music.volume").unwrap(), json!(42));
        let stats = session.stats();
        assert_eq!(stats.snapshot_attempts, 3);
        assert_eq!(stats.snapshot_failures, 2);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.handshakes_completed, 1);
    }

    #[tokio::test]
    async fn handshake_gives_up_after_limit() {
        let (session, transport) = session();
        for _ in 0..3 {
            transport.push_snapshot_response(Err(SyncError::SnapshotTimeout));
        }

        let epoch = session.handle_connected();
        assert!(session.handshake(epoch).await.is_err());
        assert_eq!(session.state(), SyncState::AwaitingSnapshot);
        assert_eq!(session.stats().snapshot_attempts, 3);
    }

    #[tokio::test]
    async fn handshake_for_old_epoch_does_nothing() {
        let (session, transport) = session();
        transport.set_snapshot(snapshot(7, true));
        let old = session.handle_connected();
        session.handle_connected();

        let err = session.handshake(old).await.unwrap_err();
        assert!(matches!(err, SyncError::StaleResponse { .. }));
        assert_eq!(transport.snapshot_requests(), 0);
    }

    #[tokio::test]
    async fn close_detaches_observer() {
        let (session, transport) = session();
        session.close().await.unwrap();
        assert_eq!(session.store().listener_count(), 0);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn closed_session_refuses_to_reconnect() {
        let (session, transport) = session();
        transport.set_snapshot(snapshot(7, true));
        session.close().await.unwrap();
        assert!(session.is_closed());

        assert!(matches!(session.connect().await, Err(SyncError::Closed)));
        assert!(!transport.is_connected());

        let epoch = session.handle_connected();
        assert_eq!(session.state(), SyncState::Disconnected);
        assert!(matches!(
            session.handshake(epoch).await,
            Err(SyncError::Closed)
        ));
        assert_eq!(transport.snapshot_requests(), 0);
        assert!(!session.guard().is_suppressed());
    }

    #[tokio::test]
    async fn close_during_handshake_stops_retrying() {
        let (session, transport) = session();
        let epoch = session.handle_connected();

        // No snapshot configured, so the first attempt fails and the retry
        // loop waits; closing meanwhile ends it.
        let (result, ()) = tokio::join!(session.handshake(epoch), async {
            tokio::task::yield_now().await;
            session.close().await.unwrap();
        });

        assert!(matches!(result, Err(SyncError::Closed)));
        assert_eq!(transport.snapshot_requests(), 1);
        assert_eq!(session.state(), SyncState::Disconnected);
    }

    #[test]
    fn failed_inbound_apply_does_not_block_local_changes() {
        let (session, transport) = session();
        let epoch = session.handle_connected();
        session.complete_handshake(epoch, snapshot(50, false)).unwrap();

        let guard = session.guard().clone();
        session.store().on_change(move |_| {
            if guard.is_suppressed() {
                panic!("renderer failed on remote change");
            }
        });

        let unknown = PatchMessage {
            path: "music.tempo".into(),
            value: json!(120),
        };
        let panicking = PatchMessage {
            path: "music.isPlaying".into(),
            value: json!(true),
        };
        assert!(!session.handle_patch(&unknown));
        assert!(!session.handle_patch(&panicking));
        assert_eq!(session.guard().depth(), 0);
        assert!(transport.sent_patches().is_empty());

        session.store().set_str("music.volume", json!(30)).unwrap();
        assert_eq!(
            transport.sent_patches(),
            vec![PatchMessage {
                path: "music.volume".into(),
                value: json!(30),
            }]
        );
    }
}
