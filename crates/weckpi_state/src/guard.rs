//! Echo suppression.
//!
//! While an [`EchoGuard`] is held, mutations of the store are considered
//! remote-originated and must not be sent back to the server. The guard is
//! a depth counter: nested holds are legal and an inner release never lifts
//! suppression taken by an outer holder.
//!
//! The counter is shared, not per thread: a mutation made on another thread
//! while suppression is held is treated as remote too. Hold the guard inside
//! [`StateStore::exclusive`](crate::StateStore::exclusive) when other threads
//! may mutate the same store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A shared, depth-counted suppression flag.
///
/// Cloning yields another handle to the same counter.
#[derive(Debug, Clone, Default)]
pub struct EchoGuard {
    depth: Arc<AtomicUsize>,
}

impl EchoGuard {
    /// Creates a guard with no suppression held.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes one level of suppression until the returned token is dropped.
    ///
    /// The token may be held across await points.
    pub fn acquire(&self) -> Suppression {
        self.depth.fetch_add(1, Ordering::SeqCst);
        Suppression {
            depth: Arc::clone(&self.depth),
        }
    }

    /// Runs `f` with suppression held.
    ///
    /// Suppression is lifted when `f` returns, including when it returns an
    /// error or unwinds.
    pub fn with_suppressed<R>(&self, f: impl FnOnce() -> R) -> R {
        let _suppression = self.acquire();
        f()
    }

    /// Returns true while at least one holder is active.
    pub fn is_suppressed(&self) -> bool {
        self.depth() > 0
    }

    /// Returns the current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// One held level of suppression. Released on drop.
#[derive(Debug)]
#[must_use = "suppression is released as soon as the token is dropped"]
pub struct Suppression {
    depth: Arc<AtomicUsize>,
}

impl Drop for Suppression {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}
