//! Time utilities for spad
//!
//! Provides the wall-clock source used for window evaluation and the
//! parsers for the schedule wire formats:
//!
//! | Schedule type  | Format             | Example            |
//! |----------------|--------------------|--------------------|
//! | Daily, Weekly  | `HH:MM`            | `23:00`            |
//! | Monthly        | `MM-DDTHH:MM`      | `12-01T10:00`      |
//! | OneShot        | `YYYY-MM-DDTHH:MM` | `2018-09-01T10:00` |
//!
//! These formats are a compatibility surface; the parsers accept exactly
//! the layouts above (zero-padded, 24h clock) and nothing else.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `SPA_MOCK_TIME` environment variable can be set
//! to override the system time. The value is interpreted as UTC and the
//! mocked clock advances at the real rate.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)
//!
//! Example:
//! ```bash
//! SPA_MOCK_TIME="2025-12-29 09:59:30" spad --config ./spa.toml
//! ```

use chrono::format::ParseErrorKind;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the mocked start time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "SPA_MOCK_TIME";

const MOCK_TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

static MOCK_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

/// Parse a `SPA_MOCK_TIME` value as a UTC instant
pub fn parse_mock_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), MOCK_TIME_LAYOUT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(debug_assertions)]
#[allow(clippy::disallowed_methods)]
fn read_mock_offset() -> Option<chrono::Duration> {
    let value = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
    let Some(mocked) = parse_mock_time(&value) else {
        tracing::warn!(value = %value, layout = MOCK_TIME_LAYOUT, "Ignoring malformed mock time");
        return None;
    };
    let offset = mocked - Utc::now();
    tracing::info!(start = %mocked, offset_secs = offset.num_seconds(), "Using mock time");
    Some(offset)
}

#[cfg(not(debug_assertions))]
fn read_mock_offset() -> Option<chrono::Duration> {
    None
}

/// Current instant. Shifted by `SPA_MOCK_TIME` in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Utc> {
    let offset = *MOCK_OFFSET.get_or_init(read_mock_offset);
    match offset {
        Some(offset) => Utc::now() + offset,
        None => Utc::now(),
    }
}

/// Errors from parsing the schedule time formats
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeFormatError {
    #[error("'{value}' does not match the {expected} format")]
    Malformed { value: String, expected: &'static str },

    #[error("'{value}' is out of range for the {expected} format")]
    OutOfRange { value: String, expected: &'static str },
}

impl TimeFormatError {
    fn malformed(value: &str, expected: &'static str) -> Self {
        Self::Malformed {
            value: value.to_string(),
            expected,
        }
    }

    fn from_chrono(value: &str, expected: &'static str, error: chrono::ParseError) -> Self {
        match error.kind() {
            ParseErrorKind::OutOfRange | ParseErrorKind::Impossible => Self::OutOfRange {
                value: value.to_string(),
                expected,
            },
            _ => Self::malformed(value, expected),
        }
    }
}

const CLOCK_LAYOUT: &str = "%H:%M";
const MONTH_DAY_LAYOUT: &str = "%m-%dT%H:%M";
const ONE_SHOT_LAYOUT: &str = "%Y-%m-%dT%H:%M";

// chrono accepts unpadded fields, so only values that format back to
// the exact input are taken.
fn require_canonical(
    value: &str,
    canonical: impl fmt::Display,
    expected: &'static str,
) -> Result<(), TimeFormatError> {
    if canonical.to_string() == value {
        Ok(())
    } else {
        Err(TimeFormatError::malformed(value, expected))
    }
}

/// Wall-clock time of day, minute precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub const FORMAT: &'static str = "HH:MM";

    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    /// Parse the `HH:MM` format used by Daily and Weekly schedules
    pub fn parse(s: &str) -> Result<Self, TimeFormatError> {
        let time = NaiveTime::parse_from_str(s, CLOCK_LAYOUT)
            .map_err(|e| TimeFormatError::from_chrono(s, Self::FORMAT, e))?;
        require_canonical(s, time.format(CLOCK_LAYOUT), Self::FORMAT)?;
        Ok(Self::from(time))
    }

    pub fn to_naive_time(self) -> NaiveTime {
        // Fields are range-checked on construction.
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or_default()
    }

    /// Returns minutes since midnight
    pub fn minutes_from_midnight(&self) -> u32 {
        (self.hour as u32) * 60 + (self.minute as u32)
    }
}

impl From<NaiveTime> for WallClock {
    fn from(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }
}

impl PartialOrd for WallClock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WallClock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.minutes_from_midnight()
            .cmp(&other.minutes_from_midnight())
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A yearly-recurring point in time: month, day and wall clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonthDayTime {
    pub month: u8,
    pub day: u8,
    pub clock: WallClock,
}

impl MonthDayTime {
    pub const FORMAT: &'static str = "MM-DDTHH:MM";

    /// Parse the `MM-DDTHH:MM` format used by Monthly schedules.
    ///
    /// The day must exist in the month in at least one year, so `02-29`
    /// is accepted while `02-30` and `04-31` are rejected.
    pub fn parse(s: &str) -> Result<Self, TimeFormatError> {
        // 2000 is a leap year, so every day that can ever exist is valid in it.
        let dt = NaiveDateTime::parse_from_str(&format!("2000-{s}"), ONE_SHOT_LAYOUT)
            .map_err(|e| TimeFormatError::from_chrono(s, Self::FORMAT, e))?;
        require_canonical(s, dt.format(MONTH_DAY_LAYOUT), Self::FORMAT)?;
        Ok(Self {
            month: dt.month() as u8,
            day: dt.day() as u8,
            clock: WallClock::from(dt.time()),
        })
    }

    /// Project onto a calendar year.
    ///
    /// A day that does not exist in `year` (February 29 outside leap
    /// years) rolls over to the following day.
    pub fn in_year(&self, year: i32) -> Option<NaiveDateTime> {
        let date = match NaiveDate::from_ymd_opt(year, self.month as u32, self.day as u32) {
            Some(date) => date,
            None => NaiveDate::from_ymd_opt(year, self.month as u32, self.day as u32 - 1)?.succ_opt()?,
        };
        Some(date.and_time(self.clock.to_naive_time()))
    }
}

/// Absolute layout used by OneShot schedules
pub const ONE_SHOT_FORMAT: &str = "YYYY-MM-DDTHH:MM";

/// Parse the `YYYY-MM-DDTHH:MM` format used by OneShot schedules
pub fn parse_one_shot(s: &str) -> Result<NaiveDateTime, TimeFormatError> {
    let dt = NaiveDateTime::parse_from_str(s, ONE_SHOT_LAYOUT)
        .map_err(|e| TimeFormatError::from_chrono(s, ONE_SHOT_FORMAT, e))?;
    require_canonical(s, dt.format(ONE_SHOT_LAYOUT), ONE_SHOT_FORMAT)?;
    Ok(dt)
}

/// Weekday names in ordinal order, Sunday = 0 through Saturday = 6
pub const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Look up a weekday name (exact, case-sensitive) and return its ordinal
pub fn weekday_ordinal(name: &str) -> Option<u8> {
    WEEKDAY_NAMES
        .iter()
        .position(|n| *n == name)
        .map(|i| i as u8)
}

/// Ordinal of a chrono weekday on the Sunday = 0 scale
pub fn ordinal_of(weekday: Weekday) -> u8 {
    weekday.num_days_from_sunday() as u8
}

/// Compact duration for log output: `500ms`, `45s`, `2m30s`, `1h5m`
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        return format!("{}ms", d.as_millis());
    }

    let secs = d.as_secs();
    let parts = [(secs / 3600, "h"), (secs / 60 % 60, "m"), (secs % 60, "s")];
    parts
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{}{}", n, unit))
        .collect()
}
