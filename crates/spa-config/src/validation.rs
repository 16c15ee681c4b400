//! Configuration validation

use crate::schema::{RawConfig, RawDaemonConfig, RawSchedule, RawTarget};
use spa_api::ScheduleType;
use spa_util::{MonthDayTime, WallClock};
use std::collections::HashSet;
use thiserror::Error;

/// How a validation problem affects loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The configuration is rejected
    Error,
    /// Loaded anyway; the schedule is reported invalid at runtime
    Warning,
}

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Duplicate target: {0}")]
    DuplicateTarget(String),

    #[error("Duplicate schedule: {0}")]
    DuplicateSchedule(String),

    #[error("Target '{target}': {message}")]
    TargetError { target: String, message: String },

    #[error("Schedule '{schedule}': {message}")]
    ScheduleError { schedule: String, message: String },

    #[error("Schedule '{schedule}' references unknown target '{target}'")]
    UnknownTarget { schedule: String, target: String },

    #[error("Schedule '{schedule}': {message}")]
    InvalidWindow { schedule: String, message: String },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

impl ValidationError {
    pub fn severity(&self) -> Severity {
        match self {
            ValidationError::InvalidWindow { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Error
    }
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_daemon(&config.daemon);

    let mut target_keys = HashSet::new();
    for target in &config.targets {
        let key = format!("{}/{}", target.namespace(), target.name);
        if !target_keys.insert(key.clone()) {
            errors.push(ValidationError::DuplicateTarget(key));
            continue;
        }
        errors.extend(validate_target(target, &key));
    }

    let mut schedule_keys = HashSet::new();
    for schedule in &config.schedules {
        let key = format!("{}/{}", schedule.namespace(), schedule.name);
        if !schedule_keys.insert(key.clone()) {
            errors.push(ValidationError::DuplicateSchedule(key));
            continue;
        }
        errors.extend(validate_schedule(schedule, &key, &target_keys));
    }

    errors
}

fn validate_daemon(daemon: &RawDaemonConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if daemon.resync_interval_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "resync_interval_seconds must be positive".into(),
        ));
    }
    if daemon.workers == Some(0) {
        errors.push(ValidationError::GlobalError("workers must be positive".into()));
    }
    if daemon.backoff_base_ms == Some(0) {
        errors.push(ValidationError::GlobalError(
            "backoff_base_ms must be positive".into(),
        ));
    }
    if let (Some(base_ms), Some(max_secs)) = (daemon.backoff_base_ms, daemon.backoff_max_seconds)
        && base_ms > max_secs.saturating_mul(1000)
    {
        errors.push(ValidationError::GlobalError(
            "backoff_base_ms exceeds backoff_max_seconds".into(),
        ));
    }

    errors
}

fn check_name(name: &str) -> Option<String> {
    if name.is_empty() {
        Some("name cannot be empty".into())
    } else if name.contains('/') {
        Some(format!("name '{}' cannot contain '/'", name))
    } else {
        None
    }
}

fn validate_target(target: &RawTarget, key: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut error = |message: String| {
        errors.push(ValidationError::TargetError {
            target: key.to_string(),
            message,
        })
    };

    if let Some(message) = check_name(&target.name) {
        error(message);
    }
    if let Some(message) = target.namespace.as_deref().and_then(check_name) {
        error(format!("namespace: {}", message));
    }
    if target.max_replicas == 0 {
        error("maxReplicas must be at least 1".into());
    }
    if let Some(min) = target.min_replicas
        && min > target.max_replicas
    {
        error(format!(
            "minReplicas {} exceeds maxReplicas {}",
            min, target.max_replicas
        ));
    }

    errors
}

fn validate_schedule(
    schedule: &RawSchedule,
    key: &str,
    targets: &HashSet<String>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let spec = &schedule.spec;

    if let Some(message) = check_name(&schedule.name) {
        errors.push(ValidationError::ScheduleError {
            schedule: key.to_string(),
            message,
        });
    }

    let target_key = format!("{}/{}", schedule.namespace(), spec.target);
    if !targets.contains(&target_key) {
        errors.push(ValidationError::UnknownTarget {
            schedule: key.to_string(),
            target: target_key,
        });
    }

    if let (Some(min), Some(max)) = (spec.min_replicas, spec.max_replicas)
        && min > max
    {
        errors.push(ValidationError::ScheduleError {
            schedule: key.to_string(),
            message: format!("minReplicas {} exceeds maxReplicas {}", min, max),
        });
    }
    if spec.max_replicas == Some(0) {
        errors.push(ValidationError::ScheduleError {
            schedule: key.to_string(),
            message: "maxReplicas must be at least 1".into(),
        });
    }

    for message in window_problems(schedule) {
        errors.push(ValidationError::InvalidWindow {
            schedule: key.to_string(),
            message,
        });
    }

    errors
}

/// Problems that make the window impossible to evaluate
fn window_problems(schedule: &RawSchedule) -> Vec<String> {
    let spec = &schedule.spec;
    let mut problems = Vec::new();

    let check = |value: &str| -> Result<(), String> {
        match spec.schedule_type {
            ScheduleType::Daily | ScheduleType::Weekly => {
                WallClock::parse(value).map(|_| ()).map_err(|e| e.to_string())
            }
            ScheduleType::Monthly => MonthDayTime::parse(value)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            ScheduleType::OneShot => spa_util::parse_one_shot(value)
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    };
    for (field, value) in [("startTime", &spec.start_time), ("endTime", &spec.end_time)] {
        if let Err(e) = check(value) {
            problems.push(format!("{}: {}", field, e));
        }
    }

    if spec.schedule_type == ScheduleType::Weekly {
        for (field, value) in [
            ("startDayOfWeek", &spec.start_day_of_week),
            ("endDayOfWeek", &spec.end_day_of_week),
        ] {
            match value.as_deref() {
                None | Some("") => {
                    problems.push(format!("{} is required for Weekly schedules", field))
                }
                Some(day) if spa_util::weekday_ordinal(day).is_none() => {
                    problems.push(format!("{}: unknown weekday '{}'", field, day))
                }
                Some(_) => {}
            }
        }
    }

    if let Some(tz) = spec.time_zone_name()
        && tz.parse::<chrono_tz::Tz>().is_err()
    {
        problems.push(format!("unknown time zone '{}'", tz));
    }

    problems
}
