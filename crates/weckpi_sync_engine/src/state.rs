//! Connection state of a sync session.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tracing::info;

/// The current state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No connection to the core.
    Disconnected,
    /// Connected; waiting for the full snapshot.
    AwaitingSnapshot,
    /// Snapshot applied; changes flow in both directions.
    Synchronized,
}

impl SyncState {
    /// Returns true if outbound patches and actions may be sent.
    pub fn can_send(&self) -> bool {
        matches!(self, SyncState::Synchronized)
    }

    /// Returns true if `self → to` is an edge of the state machine.
    pub fn can_transition_to(&self, to: SyncState) -> bool {
        matches!(
            (self, to),
            (SyncState::Disconnected, SyncState::AwaitingSnapshot)
                | (SyncState::AwaitingSnapshot, SyncState::Synchronized)
                | (SyncState::AwaitingSnapshot, SyncState::Disconnected)
                | (SyncState::Synchronized, SyncState::Disconnected)
        )
    }
}

/// Statistics about a sync session.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Number of completed snapshot handshakes.
    pub handshakes_completed: u64,
    /// Number of snapshot requests issued.
    pub snapshot_attempts: u64,
    /// Number of snapshot requests that failed or were rejected.
    pub snapshot_failures: u64,
    /// Number of backoff waits taken before retrying a snapshot.
    pub retries: u64,
    /// Number of snapshot responses discarded as stale.
    pub stale_responses: u64,
    /// Outbound patches handed to the transport.
    pub patches_sent: u64,
    /// Outbound patches dropped because the session was not synchronized.
    pub patches_dropped: u64,
    /// Outbound patches the transport failed to send.
    pub patches_failed: u64,
    /// Inbound patches applied to the store.
    pub patches_applied: u64,
    /// Inbound patches rejected by the store.
    pub patches_rejected: u64,
    /// Actions handed to the transport.
    pub actions_sent: u64,
    /// Actions dropped because the session was not synchronized.
    pub actions_dropped: u64,
    /// Time of the last completed handshake.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// State shared between a session and the components it drives.
#[derive(Debug)]
pub struct SessionStatus {
    state: watch::Sender<SyncState>,
    epoch: AtomicU64,
    stats: RwLock<SyncStats>,
}

impl SessionStatus {
    /// Creates a disconnected status at epoch 0.
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(SyncState::Disconnected),
            epoch: AtomicU64::new(0),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Subscribes to state changes. The receiver sees the current state
    /// first and is notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Returns the epoch of the current connection.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Starts a new connection epoch and returns it.
    pub fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Moves to `to` along a legal edge.
    pub fn transition(&self, to: SyncState) -> SyncResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if !state.can_transition_to(to) {
                result = Err(SyncError::InvalidStateTransition {
                    from: format!("{state:?}"),
                    to: format!("{to:?}"),
                });
                return false;
            }
            info!(from = ?*state, to = ?to, epoch = self.epoch(), "sync state changed");
            *state = to;
            true
        });
        result
    }

    /// Returns a copy of the statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Updates the statistics.
    pub fn record(&self, update: impl FnOnce(&mut SyncStats)) {
        update(&mut self.stats.write());
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}
