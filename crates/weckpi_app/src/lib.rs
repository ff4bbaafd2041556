//! # WeckPi App
//!
//! The WeckPi application state as seen by a rendering layer.
//!
//! This crate provides:
//! - `app_schema`, the fixed field set of the WeckPi tree, with the value
//!   constraints for alarm times and the play queue
//! - `Music` and `Alarm`, typed read accessors and intents over a store
//! - `AlarmWeek::next_alarm`, the lookup the core uses to decide when to
//!   ring
//! - `WeckPiClient`, a facade over a sync session with the named actions
//!
//! Intents only write the store. Whether a write reaches the core is the
//! session's business.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod alarm;
mod client;
mod error;
mod music;
mod schema;

pub use alarm::{format_time, parse_time, Alarm, AlarmDay, AlarmWeek, NextAlarm};
pub use client::WeckPiClient;
pub use error::{AppError, AppResult};
pub use music::{Music, QueueItem, NEXT_SONG, PREVIOUS_SONG, STOP};
pub use schema::{
    app_schema, weekday_key, ALARM_TIME, DEFAULT_ALARM_TIME, DEFAULT_OVERRIDE_TIME, QUEUE_INDEX,
    QUEUE_ITEMS, WEEKDAYS,
};
