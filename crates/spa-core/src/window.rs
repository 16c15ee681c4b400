//! Schedule window evaluation
//!
//! Decides whether an instant falls inside the window a schedule defines.
//! Windows are half-open, `[start, end)`. Wall-clock values are projected
//! onto the calendar of `now` in the schedule's zone:
//!
//! - Daily: today's date. An end before the start wraps past midnight.
//! - Weekly: as Daily, then the day the (possibly shifted) start falls on
//!   must lie in the weekday range, which itself may wrap past Saturday.
//! - Monthly: this year. An end before the start wraps past New Year.
//! - OneShot: absolute; completed for good once the end has passed.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use spa_api::{ScheduleSpec, ScheduleType};
use spa_util::{MonthDayTime, TimeFormatError, WallClock};
use thiserror::Error;

/// Longest daylight-saving gap probed when a local time does not exist
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// Why a schedule's window could not be evaluated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("invalid {field}: {source}")]
    Parse {
        field: &'static str,
        #[source]
        source: TimeFormatError,
    },

    #[error("unknown weekday '{0}'")]
    UnknownWeekday(String),

    #[error("{0} is required for Weekly schedules")]
    MissingWeekday(&'static str),

    #[error("unknown time zone '{0}'")]
    UnknownTimeZone(String),
}

impl WindowError {
    /// Short machine-readable reason, recorded on status conditions
    pub fn kind(&self) -> &'static str {
        match self {
            WindowError::Parse { .. } => "ParseError",
            WindowError::UnknownWeekday(_) | WindowError::MissingWeekday(_) => "UnknownWeekday",
            WindowError::UnknownTimeZone(_) => "UnknownTimeZone",
        }
    }
}

/// Result of evaluating one schedule at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    NotActive,
    Active,
    Suspended,
    /// OneShot only; terminal
    Completed,
    Invalid(WindowError),
}

impl EvaluationOutcome {
    pub fn is_active(&self) -> bool {
        matches!(self, EvaluationOutcome::Active)
    }

    pub fn label(&self) -> &'static str {
        match self {
            EvaluationOutcome::NotActive => "not_active",
            EvaluationOutcome::Active => "active",
            EvaluationOutcome::Suspended => "suspended",
            EvaluationOutcome::Completed => "completed",
            EvaluationOutcome::Invalid(_) => "invalid",
        }
    }
}

/// Evaluate a schedule at `now`.
///
/// Suspension wins over everything, including malformed definitions.
/// Completion is checked before containment.
pub fn evaluate(spec: &ScheduleSpec, now: DateTime<Utc>) -> EvaluationOutcome {
    if spec.suspend {
        return EvaluationOutcome::Suspended;
    }

    match completed(spec, now) {
        Ok(true) => return EvaluationOutcome::Completed,
        Ok(false) => {}
        Err(e) => return EvaluationOutcome::Invalid(e),
    }

    match contains(spec, now) {
        Ok(true) => EvaluationOutcome::Active,
        Ok(false) => EvaluationOutcome::NotActive,
        Err(e) => EvaluationOutcome::Invalid(e),
    }
}

/// Whether `now` falls inside the schedule's window. Ignores `suspend`.
pub fn contains(spec: &ScheduleSpec, now: DateTime<Utc>) -> Result<bool, WindowError> {
    let tz = resolve_zone(spec)?;

    match spec.schedule_type {
        ScheduleType::Daily => {
            let window = daily_window(spec, &tz, now)?;
            Ok(window.contains(now))
        }
        ScheduleType::Weekly => {
            let start_day = weekday(spec.start_day_of_week.as_deref(), "startDayOfWeek")?;
            let end_day = weekday(spec.end_day_of_week.as_deref(), "endDayOfWeek")?;
            let window = daily_window(spec, &tz, now)?;
            let today = window.start_weekday;
            Ok(window.contains(now) && weekday_in_range(today, start_day, end_day))
        }
        ScheduleType::Monthly => {
            let window = monthly_window(spec, &tz, now)?;
            Ok(window.contains(now))
        }
        ScheduleType::OneShot => {
            let window = one_shot_window(spec, &tz)?;
            Ok(window.contains(now))
        }
    }
}

/// Whether a OneShot window has fully passed. Always false for recurring types.
pub fn completed(spec: &ScheduleSpec, now: DateTime<Utc>) -> Result<bool, WindowError> {
    if spec.schedule_type != ScheduleType::OneShot {
        return Ok(false);
    }
    let tz = resolve_zone(spec)?;
    let window = one_shot_window(spec, &tz)?;
    Ok(now >= window.end)
}

/// A concrete window projected around `now`
struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    /// Weekday of the local start date, Sunday = 0
    start_weekday: u8,
}

impl Window {
    fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }
}

fn resolve_zone(spec: &ScheduleSpec) -> Result<Tz, WindowError> {
    match spec.time_zone_name() {
        None => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| WindowError::UnknownTimeZone(name.to_string())),
    }
}

fn weekday(name: Option<&str>, field: &'static str) -> Result<u8, WindowError> {
    let name = name
        .filter(|n| !n.is_empty())
        .ok_or(WindowError::MissingWeekday(field))?;
    spa_util::weekday_ordinal(name).ok_or_else(|| WindowError::UnknownWeekday(name.to_string()))
}

fn parse_error(field: &'static str) -> impl Fn(TimeFormatError) -> WindowError {
    move |source| WindowError::Parse { field, source }
}

/// Map a local wall-clock time to an instant.
///
/// An ambiguous time (clocks turned back) takes the earlier instant; a
/// time skipped by a forward transition takes the first instant after
/// the gap.
fn localize(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt.with_timezone(&Utc);
    }

    (1..=MAX_GAP_MINUTES)
        .find_map(|m| {
            tz.from_local_datetime(&(naive + chrono::Duration::minutes(m)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

fn daily_window(spec: &ScheduleSpec, tz: &Tz, now: DateTime<Utc>) -> Result<Window, WindowError> {
    let start_clock = WallClock::parse(&spec.start_time).map_err(parse_error("startTime"))?;
    let end_clock = WallClock::parse(&spec.end_time).map_err(parse_error("endTime"))?;

    let today = now.with_timezone(tz).date_naive();
    let mut start = today.and_time(start_clock.to_naive_time());
    let mut end = today.and_time(end_clock.to_naive_time());

    if end_clock < start_clock {
        if now < localize(tz, start) {
            start -= chrono::Duration::days(1);
        } else {
            end += chrono::Duration::days(1);
        }
    }

    Ok(Window {
        start: localize(tz, start),
        end: localize(tz, end),
        start_weekday: spa_util::ordinal_of(start.weekday()),
    })
}

/// Weekday range check with wraparound.
///
/// A range whose start comes after its end (Friday..Monday) is rotated so
/// it starts at zero, and `today` is rotated with it.
fn weekday_in_range(today: u8, start: u8, end: u8) -> bool {
    let (mut today, mut start, mut end) = (today, start, end);
    if start > end {
        end = 7 - start + end;
        today = (7 + today - start) % 7;
        start = 0;
    }
    start <= today && today <= end
}

fn monthly_window(spec: &ScheduleSpec, tz: &Tz, now: DateTime<Utc>) -> Result<Window, WindowError> {
    let start_md = MonthDayTime::parse(&spec.start_time).map_err(parse_error("startTime"))?;
    let end_md = MonthDayTime::parse(&spec.end_time).map_err(parse_error("endTime"))?;

    let year = now.with_timezone(tz).year();
    let project = |md: &MonthDayTime, value: &str, field: &'static str, year: i32| {
        md.in_year(year).ok_or_else(|| WindowError::Parse {
            field,
            source: TimeFormatError::OutOfRange {
                value: value.to_string(),
                expected: MonthDayTime::FORMAT,
            },
        })
    };

    let mut start = project(&start_md, &spec.start_time, "startTime", year)?;
    let mut end = project(&end_md, &spec.end_time, "endTime", year)?;

    if end < start {
        if now < localize(tz, start) {
            start = project(&start_md, &spec.start_time, "startTime", year - 1)?;
        } else {
            end = project(&end_md, &spec.end_time, "endTime", year + 1)?;
        }
    }

    Ok(Window {
        start: localize(tz, start),
        end: localize(tz, end),
        start_weekday: spa_util::ordinal_of(start.weekday()),
    })
}

fn one_shot_window(spec: &ScheduleSpec, tz: &Tz) -> Result<Window, WindowError> {
    let start = spa_util::parse_one_shot(&spec.start_time).map_err(parse_error("startTime"))?;
    let end = spa_util::parse_one_shot(&spec.end_time).map_err(parse_error("endTime"))?;

    Ok(Window {
        start: localize(tz, start),
        end: localize(tz, end),
        start_weekday: spa_util::ordinal_of(start.weekday()),
    })
}
