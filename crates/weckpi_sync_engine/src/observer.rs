//! Outbound propagation of local changes.

use crate::state::SessionStatus;
use crate::transport::SyncTransport;
use std::sync::Arc;
use tracing::{debug, warn};
use weckpi_state::{ChangeBatch, EchoGuard, FieldPath, ListenerId, StateStore, Value};
use weckpi_sync_protocol::{ActionMessage, PatchMessage, PathStyle};

/// The single gate through which messages leave the client.
///
/// Messages are only handed to the transport while the session is
/// synchronized; otherwise they are dropped and counted, never queued.
pub struct Outbound<T: SyncTransport> {
    transport: Arc<T>,
    status: Arc<SessionStatus>,
    path_style: PathStyle,
}

impl<T: SyncTransport> Outbound<T> {
    /// Creates a gate in front of `transport`.
    pub fn new(transport: Arc<T>, status: Arc<SessionStatus>, path_style: PathStyle) -> Self {
        Self {
            transport,
            status,
            path_style,
        }
    }

    /// Sends a patch for `path`. Returns true if the transport accepted it.
    pub fn send_patch(&self, path: &FieldPath, value: Value) -> bool {
        let state = self.status.state();
        if !state.can_send() {
            debug!(path = %path, ?state, "outbound patch dropped");
            self.status.record(|s| s.patches_dropped += 1);
            return false;
        }

        let message = PatchMessage::new(path, value, self.path_style);
        debug!(path = %message.path, value = %message.value, "outbound patch");
        match self.transport.send_patch(message) {
            Ok(()) => {
                self.status.record(|s| s.patches_sent += 1);
                true
            }
            Err(e) => {
                warn!(path = %path, error = %e, "failed to send patch");
                self.status.record(|s| {
                    s.patches_failed += 1;
                    s.last_error = Some(e.to_string());
                });
                false
            }
        }
    }

    /// Sends a named action. Returns true if the transport accepted it.
    pub fn send_action(&self, name: &str) -> bool {
        let state = self.status.state();
        if !state.can_send() {
            debug!(action = name, ?state, "outbound action dropped");
            self.status.record(|s| s.actions_dropped += 1);
            return false;
        }

        debug!(action = name, "outbound action");
        match self.transport.send_action(ActionMessage::new(name)) {
            Ok(()) => {
                self.status.record(|s| s.actions_sent += 1);
                true
            }
            Err(e) => {
                warn!(action = name, error = %e, "failed to send action");
                self.status.record(|s| s.last_error = Some(e.to_string()));
                false
            }
        }
    }
}

impl<T: SyncTransport> Clone for Outbound<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            status: Arc::clone(&self.status),
            path_style: self.path_style,
        }
    }
}

/// Turns store change batches into outbound patches.
///
/// Batches raised while the echo guard is held are ignored: they were
/// caused by the server and must not be sent back.
pub struct ChangeObserver<T: SyncTransport> {
    guard: EchoGuard,
    outbound: Outbound<T>,
}

impl<T: SyncTransport + 'static> ChangeObserver<T> {
    /// Creates an observer sending through `outbound`.
    pub fn new(guard: EchoGuard, outbound: Outbound<T>) -> Self {
        Self { guard, outbound }
    }

    /// Registers this observer on `store`.
    pub fn attach(self, store: &StateStore) -> ListenerId {
        store.on_change(move |batch| self.observe(batch))
    }

    /// Handles one change batch.
    pub fn observe(&self, batch: &ChangeBatch) {
        if self.guard.is_suppressed() {
            debug!(
                sequence = batch.sequence,
                fields = batch.changes.len(),
                depth = self.guard.depth(),
                "outbound patch suppressed"
            );
            return;
        }

        for change in &batch.changes {
            self.outbound.send_patch(&change.path, change.value.clone());
        }
    }
}
