//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use weckpi_sync_protocol::{ActionMessage, PatchMessage, Snapshot};

/// Inbound events raised by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection to the core was (re)established.
    Connected,
    /// The connection to the core was lost.
    Disconnected,
    /// The core pushed a field replacement.
    Patch(PatchMessage),
}

/// Receiving end of a transport's inbound events.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// A sync transport handles network communication with the WeckPi core.
///
/// Outbound operations are methods on this trait. Inbound traffic
/// (connect, disconnect, pushed patches) is delivered as
/// [`TransportEvent`]s over a channel handed to
/// [`SyncSession::run`](crate::SyncSession::run).
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Opens the connection. Success is reported as
    /// [`TransportEvent::Connected`].
    async fn connect(&self) -> SyncResult<()>;

    /// Requests the full state tree.
    async fn request_snapshot(&self) -> SyncResult<Snapshot>;

    /// Sends a patch without waiting for acknowledgement.
    fn send_patch(&self, message: PatchMessage) -> SyncResult<()>;

    /// Sends an action without waiting for acknowledgement.
    fn send_action(&self, message: ActionMessage) -> SyncResult<()>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    async fn close(&self) -> SyncResult<()>;
}

/// A mock transport for testing.
///
/// Records everything sent through it and answers snapshot requests from a
/// scripted queue; once the queue is empty the fallback snapshot is used.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    events: mpsc::UnboundedSender<TransportEvent>,
    snapshot_responses: Mutex<VecDeque<SyncResult<Snapshot>>>,
    fallback_snapshot: Mutex<Option<Snapshot>>,
    sent_patches: Mutex<Vec<PatchMessage>>,
    sent_actions: Mutex<Vec<ActionMessage>>,
    snapshot_requests: Mutex<u64>,
}

impl MockTransport {
    /// Creates a new mock transport and the receiving end of its events.
    pub fn new() -> (Self, EventStream) {
        let (events, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            connected: AtomicBool::new(false),
            events,
            snapshot_responses: Mutex::new(VecDeque::new()),
            fallback_snapshot: Mutex::new(None),
            sent_patches: Mutex::new(Vec::new()),
            sent_actions: Mutex::new(Vec::new()),
            snapshot_requests: Mutex::new(0),
        };
        (transport, receiver)
    }

    /// Sets the snapshot served when no scripted response is queued.
    pub fn set_snapshot(&self, snapshot: Snapshot) {
        *self.fallback_snapshot.lock() = Some(snapshot);
    }

    /// Queues a one-off snapshot response.
    pub fn push_snapshot_response(&self, response: SyncResult<Snapshot>) {
        self.snapshot_responses.lock().push_back(response);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Simulates the connection coming up.
    pub fn emit_connected(&self) {
        self.set_connected(true);
        let _ = self.events.send(TransportEvent::Connected);
    }

    /// Simulates the connection dropping.
    pub fn emit_disconnected(&self) {
        self.set_connected(false);
        let _ = self.events.send(TransportEvent::Disconnected);
    }

    /// Simulates the core pushing a patch.
    pub fn emit_patch(&self, message: PatchMessage) {
        let _ = self.events.send(TransportEvent::Patch(message));
    }

    /// Returns every patch sent so far.
    pub fn sent_patches(&self) -> Vec<PatchMessage> {
        self.sent_patches.lock().clone()
    }

    /// Returns every action sent so far.
    pub fn sent_actions(&self) -> Vec<ActionMessage> {
        self.sent_actions.lock().clone()
    }

    /// Returns the number of snapshot requests received.
    pub fn snapshot_requests(&self) -> u64 {
        *self.snapshot_requests.lock()
    }

    /// Forgets recorded traffic.
    pub fn clear_sent(&self) {
        self.sent_patches.lock().clear();
        self.sent_actions.lock().clear();
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn connect(&self) -> SyncResult<()> {
        self.emit_connected();
        Ok(())
    }

    async fn request_snapshot(&self) -> SyncResult<Snapshot> {
        *self.snapshot_requests.lock() += 1;
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if let Some(response) = self.snapshot_responses.lock().pop_front() {
            return response;
        }
        self.fallback_snapshot
            .lock()
            .clone()
            .ok_or_else(|| SyncError::SnapshotFailed("no mock snapshot set".into()))
    }

    fn send_patch(&self, message: PatchMessage) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.sent_patches.lock().push(message);
        Ok(())
    }

    fn send_action(&self, message: ActionMessage) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.sent_actions.lock().push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> SyncResult<()> {
        self.set_connected(false);
        Ok(())
    }
}
