//! Framed duplex transport.
//!
//! The actual link is abstracted via [`DuplexClient`] so any
//! message-oriented connection (WebSocket, socket.io, a pipe) can carry the
//! protocol. Every frame is one [`SyncMessage`] envelope.
//!
//! Snapshot requests are correlated with the next snapshot frame to arrive;
//! at most one request is outstanding at a time.

use crate::error::{SyncError, SyncResult};
use crate::transport::{EventStream, SyncTransport, TransportEvent};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use weckpi_sync_protocol::{ActionMessage, PatchMessage, Snapshot, SyncMessage};

/// Message-oriented duplex client abstraction.
///
/// Implement this trait to provide the actual link. Everything the link
/// observes (opening, closing, inbound frames) is reported through the
/// [`LinkSink`] handed to [`DuplexClient::open`].
#[async_trait]
pub trait DuplexClient: Send + Sync {
    /// Opens a link to `url`.
    async fn open(&self, url: &str, sink: LinkSink) -> Result<(), String>;

    /// Sends one frame.
    fn send(&self, frame: Vec<u8>) -> Result<(), String>;

    /// Closes the link.
    async fn close(&self);
}

struct Shared {
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: AtomicBool,
    pending_snapshot: Mutex<Option<oneshot::Sender<Snapshot>>>,
    last_error: RwLock<Option<String>>,
}

impl Shared {
    fn set_error(&self, err: impl Into<String>) {
        *self.last_error.write() = Some(err.into());
    }
}

/// Handle through which a [`DuplexClient`] reports link activity.
#[derive(Clone)]
pub struct LinkSink {
    shared: Arc<Shared>,
}

impl LinkSink {
    /// Reports that the link is up.
    pub fn opened(&self) {
        if !self.shared.connected.swap(true, Ordering::SeqCst) {
            let _ = self.shared.events.send(TransportEvent::Connected);
        }
    }

    /// Reports that the link went down. An outstanding snapshot request
    /// fails.
    pub fn closed(&self) {
        self.shared.pending_snapshot.lock().take();
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            let _ = self.shared.events.send(TransportEvent::Disconnected);
        }
    }

    /// Delivers one inbound frame.
    ///
    /// Frames that do not decode are logged and dropped.
    pub fn frame(&self, bytes: &[u8]) {
        let message = match SyncMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "undecodable frame dropped");
                self.shared.set_error(e.to_string());
                return;
            }
        };

        match message {
            SyncMessage::Patch(patch) => {
                let _ = self.shared.events.send(TransportEvent::Patch(patch));
            }
            SyncMessage::Snapshot(snapshot) => match self.shared.pending_snapshot.lock().take() {
                Some(reply) => {
                    let _ = reply.send(snapshot);
                }
                None => debug!("unsolicited snapshot dropped"),
            },
            other => debug!(event = other.event_name(), "client-bound frame ignored"),
        }
    }
}

impl std::fmt::Debug for LinkSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSink")
            .field("connected", &self.shared.connected.load(Ordering::SeqCst))
            .finish()
    }
}

/// Sync transport framing the protocol over a [`DuplexClient`].
pub struct ChannelTransport<C: DuplexClient> {
    /// URL of the WeckPi core (e.g. "ws://weckpi.local:5000").
    server_url: String,
    client: C,
    shared: Arc<Shared>,
}

impl<C: DuplexClient> ChannelTransport<C> {
    /// Creates a transport for `server_url` and the receiving end of its
    /// events. Nothing is opened until [`SyncTransport::connect`].
    pub fn new(server_url: impl Into<String>, client: C) -> (Self, EventStream) {
        let (events, stream) = mpsc::unbounded_channel();
        let transport = Self {
            server_url: server_url.into(),
            client,
            shared: Arc::new(Shared {
                events,
                connected: AtomicBool::new(false),
                pending_snapshot: Mutex::new(None),
                last_error: RwLock::new(None),
            }),
        };
        (transport, stream)
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.read().clone()
    }

    fn sink(&self) -> LinkSink {
        LinkSink {
            shared: Arc::clone(&self.shared),
        }
    }

    fn send_message(&self, message: &SyncMessage) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let frame = message.encode()?;
        self.client.send(frame).map_err(|e| {
            self.shared.set_error(e.as_str());
            SyncError::transport_retryable(e)
        })
    }
}

#[async_trait]
impl<C: DuplexClient> SyncTransport for ChannelTransport<C> {
    async fn connect(&self) -> SyncResult<()> {
        debug!(url = %self.server_url, "opening link");
        self.client
            .open(&self.server_url, self.sink())
            .await
            .map_err(|e| {
                self.shared.set_error(e.as_str());
                SyncError::transport_retryable(e)
            })
    }

    async fn request_snapshot(&self) -> SyncResult<Snapshot> {
        let (reply, response) = oneshot::channel();
        if self.shared.pending_snapshot.lock().replace(reply).is_some() {
            debug!("previous snapshot request superseded");
        }
        if let Err(e) = self.send_message(&SyncMessage::SnapshotRequest) {
            self.shared.pending_snapshot.lock().take();
            return Err(e);
        }
        response
            .await
            .map_err(|_| SyncError::transport_retryable("link closed before the snapshot arrived"))
    }

    fn send_patch(&self, message: PatchMessage) -> SyncResult<()> {
        self.send_message(&SyncMessage::Patch(message))
    }

    fn send_action(&self, message: ActionMessage) -> SyncResult<()> {
        self.send_message(&SyncMessage::Action(message))
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> SyncResult<()> {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.pending_snapshot.lock().take();
        self.client.close().await;
        Ok(())
    }
}
