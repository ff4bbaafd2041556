//! # WeckPi Sync Engine
//!
//! Keeps a local [`StateStore`](weckpi_state::StateStore) consistent with
//! the authoritative state held by the WeckPi core.
//!
//! This crate provides:
//! - `SyncTransport`, the contract a connection to the core must fulfil
//! - `ChangeObserver`, which turns local store mutations into outbound patches
//! - `RemoteListener`, which applies inbound patches under the echo guard
//! - `SyncSession`, the connection state machine
//!   (disconnected → awaiting snapshot → synchronized)
//! - Retry with exponential backoff for the snapshot handshake
//! - `ChannelTransport`, which frames the protocol over any pluggable
//!   message-oriented `DuplexClient`
//! - `MockTransport` and an in-memory loopback server for tests
//!
//! ## Architecture
//!
//! ```text
//! local intent ─▶ StateStore ─▶ ChangeObserver ─▶ Outbound ─▶ transport ─▶ core
//! core ─▶ transport ─▶ RemoteListener ─(guard held)─▶ StateStore ─▶ ChangeObserver (silent)
//! connect ─▶ SyncSession ─▶ request_snapshot ─(guard held)─▶ StateStore::replace_all
//! ```
//!
//! ## Key Invariants
//!
//! - The server is authoritative; every connect performs a full snapshot handshake
//! - Changes applied on behalf of the server are never sent back
//! - The echo guard is released on every exit path
//! - Nothing is sent unless the session is synchronized; nothing is buffered
//! - Snapshot responses belonging to an older connection are discarded

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod config;
mod error;
mod listener;
mod loopback;
mod observer;
mod session;
mod state;
mod transport;

pub use channel::{ChannelTransport, DuplexClient, LinkSink};
pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use listener::RemoteListener;
pub use loopback::{LoopbackServer, LoopbackTransport};
pub use observer::{ChangeObserver, Outbound};
pub use session::SyncSession;
pub use state::{SessionStatus, SyncState, SyncStats};
pub use transport::{EventStream, MockTransport, SyncTransport, TransportEvent};
