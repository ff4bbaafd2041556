//! # WeckPi Sync Protocol
//!
//! Wire messages exchanged between a WeckPi client and the WeckPi core.
//!
//! This crate provides:
//! - `PatchMessage` for single-field replacements (both directions)
//! - `ActionMessage` for fire-and-forget commands
//! - `Snapshot` for the full tree sent during the handshake
//! - `SyncMessage`, the `{event, data}` envelope, with JSON encoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ActionMessage, PatchMessage, PathStyle, Snapshot, SyncMessage, ACTION_EVENT, PATCH_EVENT,
    SNAPSHOT_EVENT,
};
