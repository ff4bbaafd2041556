//! Next-alarm command implementation.

use super::{load_store, CommandResult};
use chrono::{Local, NaiveDateTime};
use std::path::Path;
use weckpi_app::{Alarm, NextAlarm};

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Parses the `--at` reference time.
pub fn parse_reference(raw: &str) -> CommandResult<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw.trim(), format).ok())
        .ok_or_else(|| format!("invalid reference time {raw:?}, expected YYYY-MM-DDTHH:MM[:SS]").into())
}

/// Computes the next alarm stored in the snapshot at `path`.
pub fn next_alarm(path: &Path, now: NaiveDateTime) -> CommandResult<Option<NextAlarm>> {
    let store = load_store(path)?;
    Ok(Alarm::new(&store).next_alarm(now)?)
}

/// Runs the next-alarm command.
pub fn run(path: &Path, at: Option<&str>) -> CommandResult<()> {
    let now = match at {
        Some(raw) => parse_reference(raw)?,
        None => Local::now().naive_local(),
    };

    match next_alarm(path, now)? {
        Some(alarm) => {
            println!("Next alarm: {alarm}");
            println!("Rings at:   {}", alarm.at(now).format("%Y-%m-%d %H:%M:%S"));
        }
        None => println!("No alarm scheduled"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::snapshot_file;
    use chrono::Weekday;

    #[test]
    fn reference_formats() {
        assert!(parse_reference("2024-01-03T07:15").is_ok());
        assert!(parse_reference("2024-01-03T07:15:30").is_ok());
        assert!(parse_reference("2024-01-03 07:15:30").is_ok());
        assert!(parse_reference("tomorrow").is_err());
    }

    #[test]
    fn override_from_snapshot() {
        let file = snapshot_file(
            r#"{"config": {"alarm": {"wednesday": {"overrideActive": true, "overrideTime": "06:00:00.000"}}}}"#,
        );
        let now = parse_reference("2024-01-03T05:00").unwrap();
        let alarm = next_alarm(file.path(), now).unwrap().unwrap();
        assert_eq!(alarm.weekday, Weekday::Wed);
        assert!(alarm.is_override);
    }

    #[test]
    fn all_disabled() {
        let days: Vec<String> = weckpi_app::WEEKDAYS
            .iter()
            .map(|d| format!(r#""{}": {{"active": false}}"#, weckpi_app::weekday_key(*d)))
            .collect();
        let file = snapshot_file(&format!(r#"{{"config": {{"alarm": {{{}}}}}}}"#, days.join(",")));
        let now = parse_reference("2024-01-03T05:00").unwrap();
        assert_eq!(next_alarm(file.path(), now).unwrap(), None);
    }

    #[test]
    fn invalid_stored_time_is_an_error() {
        let file = snapshot_file(r#"{"config": {"alarm": {"monday": {"time": "late"}}}}"#);
        let now = parse_reference("2024-01-03T05:00").unwrap();
        assert!(next_alarm(file.path(), now).is_err());
    }
}
