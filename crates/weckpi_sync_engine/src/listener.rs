//! Inbound application of server patches.

use crate::state::SessionStatus;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};
use weckpi_state::{EchoGuard, StateStore};
use weckpi_sync_protocol::PatchMessage;

/// Applies patches pushed by the core to the local store.
///
/// Every patch is applied with the echo guard held, so the change observer
/// stays silent. The guard is held inside the store's exclusive section, so
/// a local mutation on another thread is never mistaken for a remote one. Failures are logged and swallowed: one malformed message
/// must never stop later messages from being applied, and the guard is
/// released on every path.
pub struct RemoteListener {
    store: Arc<StateStore>,
    guard: EchoGuard,
    status: Arc<SessionStatus>,
}

impl RemoteListener {
    /// Creates a listener applying to `store`.
    pub fn new(store: Arc<StateStore>, guard: EchoGuard, status: Arc<SessionStatus>) -> Self {
        Self {
            store,
            guard,
            status,
        }
    }

    /// Applies one inbound patch. Returns true if the store accepted it.
    pub fn apply(&self, message: &PatchMessage) -> bool {
        let path = match message.field_path() {
            Ok(path) => path,
            Err(e) => {
                warn!(path = %message.path, error = %e, "inbound patch with invalid path dropped");
                self.reject(e.to_string());
                return false;
            }
        };

        debug!(path = %path, value = %message.value, "inbound patch");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.store.exclusive(|| {
                self.guard
                    .with_suppressed(|| self.store.set(&path, message.value.clone()))
            })
        }));

        match outcome {
            Ok(Ok(())) => {
                self.status.record(|s| s.patches_applied += 1);
                true
            }
            Ok(Err(e)) => {
                warn!(path = %path, error = %e, "inbound patch rejected");
                self.reject(e.to_string());
                false
            }
            Err(_) => {
                error!(path = %path, "store listener panicked while applying inbound patch");
                self.reject(format!("listener panicked while applying {path}"));
                false
            }
        }
    }

    fn reject(&self, message: String) {
        self.status.record(|s| {
            s.patches_rejected += 1;
            s.last_error = Some(message);
        });
    }
}
