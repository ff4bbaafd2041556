//! The WeckPi state tree.

use chrono::Weekday;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use weckpi_state::{Constraint, FieldKind, Schema, StateResult, StateStore};

use crate::alarm::parse_time;
use crate::error::{AppError, AppResult};
use crate::music::QueueItem;

/// Weekdays in ISO order, Monday first.
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Default regular alarm time.
pub const DEFAULT_ALARM_TIME: &str = "08:00:00";

/// Default override alarm time.
pub const DEFAULT_OVERRIDE_TIME: &str = "09:00:00";

/// Returns the key of `day` under `config.alarm`.
pub fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn alarm_time(value: &Value) -> Result<(), String> {
    let raw = value.as_str().ok_or_else(|| "expected a string".to_string())?;
    parse_time(raw).map(drop).map_err(|e| e.to_string())
}

fn queue_items(value: &Value) -> Result<(), String> {
    Vec::<QueueItem>::deserialize(value)
        .map(drop)
        .map_err(|e| e.to_string())
}

fn queue_index(value: &Value) -> Result<(), String> {
    value
        .as_u64()
        .map(drop)
        .ok_or_else(|| format!("{value} is not a non-negative integer"))
}

/// An ISO time of day, as accepted by [`parse_time`].
pub const ALARM_TIME: Constraint = Constraint::new("time", alarm_time);

/// A list of well-formed [`QueueItem`]s.
pub const QUEUE_ITEMS: Constraint = Constraint::new("queue", queue_items);

/// A non-negative integer index.
pub const QUEUE_INDEX: Constraint = Constraint::new("index", queue_index);

/// Builds the schema of the WeckPi state tree.
pub fn app_schema() -> StateResult<Schema> {
    let mut builder = Schema::builder()
        .group(
            "music",
            [
                ("queue", FieldKind::Sequence, json!([])),
                ("queuePosition", FieldKind::Number, json!(0)),
                ("position", FieldKind::Number, json!(0)),
                ("isPlaying", FieldKind::Bool, json!(false)),
                ("shuffle", FieldKind::Bool, json!(false)),
                ("repeat", FieldKind::Bool, json!(false)),
                ("volume", FieldKind::Number, json!(100)),
            ],
        )
        .constrain("music.queue", QUEUE_ITEMS)
        .constrain("music.queuePosition", QUEUE_INDEX)
        .field("initialized", FieldKind::Bool, json!(false));

    for day in WEEKDAYS {
        let prefix = format!("config.alarm.{}", weekday_key(day));
        builder = builder
            .group(
                &prefix,
                [
                    ("active", FieldKind::Bool, json!(true)),
                    ("time", FieldKind::String, json!(DEFAULT_ALARM_TIME)),
                    ("overrideActive", FieldKind::Bool, json!(false)),
                    ("overrideTime", FieldKind::String, json!(DEFAULT_OVERRIDE_TIME)),
                ],
            )
            .constrain(format!("{prefix}.time"), ALARM_TIME)
            .constrain(format!("{prefix}.overrideTime"), ALARM_TIME);
    }

    builder.build()
}

/// Reads a field and decodes it into `T`.
pub(crate) fn read<T: DeserializeOwned>(store: &StateStore, path: &str) -> AppResult<T> {
    let value = store.get_str(path)?;
    serde_json::from_value(value).map_err(|e| AppError::decode(path, e))
}

/// Converts a number for storage, keeping whole numbers integral.
pub(crate) fn number(value: f64) -> AppResult<Value> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return Ok(json!(value as i64));
    }
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or(AppError::InvalidNumber(value))
}
