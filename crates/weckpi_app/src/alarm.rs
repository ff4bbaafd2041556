//! Weekly alarm configuration and next-alarm lookup.

use chrono::{Datelike, Days, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde_json::Value;
use std::fmt;
use tracing::debug;
use weckpi_state::StateStore;

use crate::error::{AppError, AppResult};
use crate::schema::{read, weekday_key, WEEKDAYS};

/// Parses an ISO-8601 local time. Seconds and fractional seconds are
/// optional.
pub fn parse_time(raw: &str) -> AppResult<NaiveTime> {
    let raw = raw.trim();
    raw.parse::<NaiveTime>()
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| AppError::InvalidTime {
            value: raw.to_string(),
        })
}

/// Formats a time the way it is stored in the tree.
pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

/// The alarm settings of one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmDay {
    /// Whether the regular alarm rings.
    pub active: bool,
    /// Regular alarm time.
    pub time: NaiveTime,
    /// Whether the override replaces the regular alarm.
    pub override_active: bool,
    /// Override alarm time.
    pub override_time: NaiveTime,
}

/// The alarm settings of a whole week, indexed Monday first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmWeek {
    days: [AlarmDay; 7],
}

/// The alarm that rings next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextAlarm {
    /// Day the alarm rings on.
    pub weekday: Weekday,
    /// Time it rings at.
    pub time: NaiveTime,
    /// True if this is the override alarm.
    pub is_override: bool,
    /// Days from the reference date, 0 meaning the same day.
    pub days_ahead: u32,
}

impl NextAlarm {
    /// Returns the concrete moment relative to the reference time `now`.
    pub fn at(&self, now: NaiveDateTime) -> NaiveDateTime {
        let date = now
            .date()
            .checked_add_days(Days::new(u64::from(self.days_ahead)))
            .unwrap_or(now.date());
        date.and_time(self.time)
    }
}

impl fmt::Display for NextAlarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", weekday_key(self.weekday), format_time(self.time))?;
        if self.is_override {
            write!(f, " (override)")?;
        }
        Ok(())
    }
}

impl AlarmWeek {
    /// Creates a week from its seven days, Monday first.
    pub fn new(days: [AlarmDay; 7]) -> Self {
        Self { days }
    }

    /// Returns the settings of `weekday`.
    pub fn day(&self, weekday: Weekday) -> &AlarmDay {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    /// Finds the next alarm as seen at `now`.
    ///
    /// Weekdays are scanned starting with today. On each day the override
    /// is checked before the regular alarm. Today's alarms only count if
    /// they are not earlier than the current minute. Returns `None` if no
    /// alarm qualifies within the scan.
    pub fn next_alarm(&self, now: NaiveDateTime) -> Option<NextAlarm> {
        let today = now.weekday();
        let current = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0)?;
        debug!(%current, ?today, "looking up next alarm");

        let mut weekday = today;
        for days_ahead in 0..7 {
            let day = self.day(weekday);
            let upcoming = |time: NaiveTime| days_ahead > 0 || time >= current;

            if day.override_active && upcoming(day.override_time) {
                return Some(NextAlarm {
                    weekday,
                    time: day.override_time,
                    is_override: true,
                    days_ahead,
                });
            }
            if day.active && upcoming(day.time) {
                return Some(NextAlarm {
                    weekday,
                    time: day.time,
                    is_override: false,
                    days_ahead,
                });
            }
            weekday = weekday.succ();
        }
        None
    }
}

/// Read accessors and intents for `config.alarm`.
#[derive(Debug, Clone, Copy)]
pub struct Alarm<'a> {
    store: &'a StateStore,
}

impl<'a> Alarm<'a> {
    /// Creates a view over `store`.
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    /// Reads the settings of `weekday`.
    pub fn day(&self, weekday: Weekday) -> AppResult<AlarmDay> {
        Ok(AlarmDay {
            active: read(self.store, &path(weekday, "active"))?,
            time: self.read_time(weekday, "time")?,
            override_active: read(self.store, &path(weekday, "overrideActive"))?,
            override_time: self.read_time(weekday, "overrideTime")?,
        })
    }

    /// Reads the whole week.
    pub fn week(&self) -> AppResult<AlarmWeek> {
        let mut days = [AlarmDay {
            active: false,
            time: NaiveTime::MIN,
            override_active: false,
            override_time: NaiveTime::MIN,
        }; 7];
        for (slot, weekday) in days.iter_mut().zip(WEEKDAYS) {
            *slot = self.day(weekday)?;
        }
        Ok(AlarmWeek::new(days))
    }

    /// Finds the next alarm as seen at `now`.
    pub fn next_alarm(&self, now: NaiveDateTime) -> AppResult<Option<NextAlarm>> {
        Ok(self.week()?.next_alarm(now))
    }

    /// Enables or disables the regular alarm of `weekday`.
    pub fn set_active(&self, weekday: Weekday, active: bool) -> AppResult<()> {
        self.write(weekday, "active", Value::Bool(active))
    }

    /// Sets the regular alarm time of `weekday`.
    pub fn set_time(&self, weekday: Weekday, time: NaiveTime) -> AppResult<()> {
        self.write(weekday, "time", Value::String(format_time(time)))
    }

    /// Enables or disables the override of `weekday`.
    pub fn set_override_active(&self, weekday: Weekday, active: bool) -> AppResult<()> {
        self.write(weekday, "overrideActive", Value::Bool(active))
    }

    /// Sets the override time of `weekday`.
    pub fn set_override_time(&self, weekday: Weekday, time: NaiveTime) -> AppResult<()> {
        self.write(weekday, "overrideTime", Value::String(format_time(time)))
    }

    fn read_time(&self, weekday: Weekday, field: &str) -> AppResult<NaiveTime> {
        let raw: String = read(self.store, &path(weekday, field))?;
        parse_time(&raw)
    }

    fn write(&self, weekday: Weekday, field: &str, value: Value) -> AppResult<()> {
        Ok(self.store.set_str(&path(weekday, field), value)?)
    }
}

fn path(weekday: Weekday, field: &str) -> String {
    format!("config.alarm.{}.{field}", weekday_key(weekday))
}
