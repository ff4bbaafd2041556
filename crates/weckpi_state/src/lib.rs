//! # WeckPi State
//!
//! The locally mirrored application state of a WeckPi client.
//!
//! This crate provides:
//! - `FieldPath` for addressing fields in dotted or JSON-pointer form
//! - `Schema` for declaring the fixed field set of the tree
//! - `StateStore`, the only place mutations land, with synchronous change
//!   notifications
//! - `EchoGuard`, a depth-counted suppression flag used to keep remote
//!   changes from being sent back to their origin
//!
//! ## Key Invariants
//!
//! - The field set is fixed at construction; patches never create fields
//! - Every field holds exactly one value at any instant
//! - A structured field is always replaced wholesale
//! - `replace_all` emits exactly one change batch
//! - Listeners run after the value lock is released, so they may read and
//!   mutate the store
//! - Mutations and their notifications are serialized: batches reach
//!   listeners in sequence order, whichever thread mutates

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod guard;
mod path;
mod schema;
mod store;

pub use error::{StateError, StateResult};
pub use guard::{EchoGuard, Suppression};
pub use path::FieldPath;
pub use schema::{Constraint, FieldKind, FieldSpec, Schema, SchemaBuilder};
pub use store::{
    ChangeBatch, ChangeKind, ChangeListener, FieldChange, ListenerId, SnapshotReport, StateStore,
};

/// Re-exported JSON value type used for every field value.
pub use serde_json::Value;
