//! In-memory stand-in for the WeckPi core.
//!
//! A [`LoopbackServer`] holds the authoritative state tree and routes
//! traffic between any number of [`LoopbackTransport`] clients directly,
//! without a network.

use crate::error::{SyncError, SyncResult};
use crate::transport::{EventStream, SyncTransport, TransportEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use weckpi_state::FieldPath;
use weckpi_sync_protocol::{ActionMessage, PatchMessage, Snapshot};

struct ClientSlot {
    id: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: bool,
    /// Set when the server cut the link; cleared by an explicit close.
    dropped: bool,
}

#[derive(Default)]
struct ServerState {
    tree: Value,
    clients: Vec<ClientSlot>,
    actions: Vec<String>,
    received: Vec<PatchMessage>,
    failing_snapshots: u32,
    next_client: u64,
}

impl ServerState {
    fn slot_mut(&mut self, id: u64) -> Option<&mut ClientSlot> {
        self.clients.iter_mut().find(|slot| slot.id == id)
    }

    fn is_connected(&self, id: u64) -> bool {
        self.clients.iter().any(|slot| slot.id == id && slot.connected)
    }

    /// Sends `message` to every connected client except `origin`.
    fn broadcast(&self, message: &PatchMessage, origin: Option<u64>) {
        for slot in self.clients.iter().filter(|s| s.connected && Some(s.id) != origin) {
            let _ = slot.events.send(TransportEvent::Patch(message.clone()));
        }
    }
}

/// An in-memory authoritative server.
///
/// Client patches are applied last-write-wins and rebroadcast to every
/// other connected client. Cloning yields another handle to the same
/// server.
#[derive(Clone)]
pub struct LoopbackServer {
    state: Arc<Mutex<ServerState>>,
}

impl LoopbackServer {
    /// Creates a server holding `tree`. Non-object trees are replaced by an
    /// empty object.
    pub fn new(tree: Value) -> Self {
        let tree = if tree.is_object() {
            tree
        } else {
            Value::Object(Map::new())
        };
        Self {
            state: Arc::new(Mutex::new(ServerState {
                tree,
                ..ServerState::default()
            })),
        }
    }

    /// Registers a new client and returns its transport and event stream.
    /// The client starts disconnected.
    pub fn client(&self) -> (LoopbackTransport, EventStream) {
        let (events, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_client += 1;
        let id = state.next_client;
        state.clients.push(ClientSlot {
            id,
            events,
            connected: false,
            dropped: false,
        });
        let transport = LoopbackTransport {
            id,
            server: self.clone(),
        };
        (transport, receiver)
    }

    /// Returns a copy of the authoritative tree.
    pub fn tree(&self) -> Value {
        self.state.lock().tree.clone()
    }

    /// Returns the value at `path`, if present.
    pub fn get(&self, path: &str) -> Option<Value> {
        let path = FieldPath::parse(path).ok()?;
        path.lookup(&self.state.lock().tree).cloned()
    }

    /// Changes a value on the server side and pushes it to every connected
    /// client.
    pub fn push_patch(&self, path: &str, value: Value) -> SyncResult<()> {
        let field = FieldPath::parse(path)?;
        let message = PatchMessage {
            path: field.to_dotted(),
            value,
        };
        let mut state = self.state.lock();
        field.insert_into(&mut state.tree, message.value.clone());
        state.broadcast(&message, None);
        Ok(())
    }

    /// Returns the names of all actions received, in order.
    pub fn actions(&self) -> Vec<String> {
        self.state.lock().actions.clone()
    }

    /// Returns every patch received from clients, in order.
    pub fn received_patches(&self) -> Vec<PatchMessage> {
        self.state.lock().received.clone()
    }

    /// Makes the next `count` snapshot requests fail.
    pub fn fail_next_snapshots(&self, count: u32) {
        self.state.lock().failing_snapshots = count;
    }

    /// Cuts every connected client, as if the network went away.
    pub fn drop_connections(&self) {
        let mut state = self.state.lock();
        for slot in state.clients.iter_mut().filter(|s| s.connected) {
            slot.connected = false;
            slot.dropped = true;
            let _ = slot.events.send(TransportEvent::Disconnected);
        }
        debug!("loopback server dropped all connections");
    }

    /// Reconnects every client cut by [`drop_connections`](Self::drop_connections).
    pub fn restore_connections(&self) {
        let mut state = self.state.lock();
        for slot in state.clients.iter_mut().filter(|s| s.dropped) {
            slot.connected = true;
            slot.dropped = false;
            let _ = slot.events.send(TransportEvent::Connected);
        }
        debug!("loopback server restored connections");
    }

    /// Returns the number of connected clients.
    pub fn connected_clients(&self) -> usize {
        self.state.lock().clients.iter().filter(|s| s.connected).count()
    }

    fn connect(&self, id: u64) -> SyncResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .slot_mut(id)
            .ok_or_else(|| SyncError::transport_fatal("unknown loopback client"))?;
        if !slot.connected {
            slot.connected = true;
            slot.dropped = false;
            let _ = slot.events.send(TransportEvent::Connected);
        }
        Ok(())
    }

    fn close(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slot_mut(id) {
            let was_connected = slot.connected;
            slot.connected = false;
            slot.dropped = false;
            if was_connected {
                let _ = slot.events.send(TransportEvent::Disconnected);
            }
        }
    }

    fn snapshot(&self, id: u64) -> SyncResult<Snapshot> {
        let mut state = self.state.lock();
        if !state.is_connected(id) {
            return Err(SyncError::NotConnected);
        }
        if state.failing_snapshots > 0 {
            state.failing_snapshots -= 1;
            return Err(SyncError::transport_retryable("snapshot unavailable"));
        }
        Ok(Snapshot::new(state.tree.clone())?)
    }

    fn receive_patch(&self, id: u64, message: PatchMessage) -> SyncResult<()> {
        let mut state = self.state.lock();
        if !state.is_connected(id) {
            return Err(SyncError::NotConnected);
        }
        state.received.push(message.clone());
        match message.field_path() {
            Ok(field) => {
                field.insert_into(&mut state.tree, message.value.clone());
                state.broadcast(&message, Some(id));
            }
            Err(e) => warn!(path = %message.path, error = %e, "loopback server ignored patch"),
        }
        Ok(())
    }

    fn receive_action(&self, id: u64, message: ActionMessage) -> SyncResult<()> {
        let mut state = self.state.lock();
        if !state.is_connected(id) {
            return Err(SyncError::NotConnected);
        }
        state.actions.push(message.name);
        Ok(())
    }
}

impl std::fmt::Debug for LoopbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackServer")
            .field("clients", &state.clients.len())
            .field("actions", &state.actions.len())
            .finish()
    }
}

/// A client connection to a [`LoopbackServer`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    id: u64,
    server: LoopbackServer,
}

impl LoopbackTransport {
    /// Returns the server this transport talks to.
    pub fn server(&self) -> &LoopbackServer {
        &self.server
    }
}

#[async_trait]
impl SyncTransport for LoopbackTransport {
    async fn connect(&self) -> SyncResult<()> {
        self.server.connect(self.id)
    }

    async fn request_snapshot(&self) -> SyncResult<Snapshot> {
        self.server.snapshot(self.id)
    }

    fn send_patch(&self, message: PatchMessage) -> SyncResult<()> {
        self.server.receive_patch(self.id, message)
    }

    fn send_action(&self, message: ActionMessage) -> SyncResult<()> {
        self.server.receive_action(self.id, message)
    }

    fn is_connected(&self) -> bool {
        self.server.state.lock().is_connected(self.id)
    }

    async fn close(&self) -> SyncResult<()> {
        self.server.close(self.id);
        Ok(())
    }
}
