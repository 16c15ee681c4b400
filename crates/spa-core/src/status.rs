//! Lifecycle status tracking
//!
//! Pure functions mapping evaluation results to condition sets. The
//! orchestrator persists the result only when `changed` is set.

use chrono::{DateTime, Utc};
use spa_api::{Condition, ConditionStatus, ConditionType, find_condition};

use crate::EvaluationOutcome;

/// New condition set and whether it differs from the old one
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionUpdate {
    pub conditions: Vec<Condition>,
    pub changed: bool,
}

impl ConditionUpdate {
    fn unchanged(old: &[Condition]) -> Self {
        Self {
            conditions: old.to_vec(),
            changed: false,
        }
    }
}

/// Phase a schedule is in after evaluation and the bounds write.
///
/// `None` for invalid definitions, whose status is left as it was.
pub fn schedule_phase(outcome: &EvaluationOutcome, apply_ok: bool) -> Option<ConditionType> {
    match outcome {
        EvaluationOutcome::Suspended => Some(ConditionType::Suspend),
        EvaluationOutcome::Completed => Some(ConditionType::Completed),
        EvaluationOutcome::Active if apply_ok => Some(ConditionType::Progressing),
        EvaluationOutcome::Active => Some(ConditionType::Degraded),
        EvaluationOutcome::NotActive => Some(ConditionType::Available),
        EvaluationOutcome::Invalid(_) => None,
    }
}

/// Phase of a target after the bounds write
pub fn target_phase(apply_ok: bool) -> ConditionType {
    if apply_ok {
        ConditionType::Available
    } else {
        ConditionType::Degraded
    }
}

/// Default reason recorded on a schedule phase condition
pub fn schedule_reason(phase: ConditionType) -> &'static str {
    match phase {
        ConditionType::Available => "OutsideWindow",
        ConditionType::Suspend => "Suspended",
        ConditionType::Progressing => "InWindow",
        ConditionType::Degraded => "ApplyFailed",
        ConditionType::Completed => "WindowPassed",
    }
}

/// Default reason recorded on a target phase condition
pub fn target_reason(phase: ConditionType) -> &'static str {
    match phase {
        ConditionType::Degraded => "ApplyFailed",
        _ => "BoundsApplied",
    }
}

/// The type of the condition currently `True`, if any
pub fn current_phase(conditions: &[Condition]) -> Option<ConditionType> {
    spa_api::true_condition(conditions).map(|c| c.condition_type)
}

/// Move a condition set to `phase`.
///
/// `phase` becomes `True` with the given reason and message; every other
/// type in `types` becomes `False` with both cleared. Only conditions whose
/// status flips get `now` as their transition time. Once `Completed` is
/// `True` the set never changes again.
pub fn reduce(
    old: &[Condition],
    types: &[ConditionType],
    phase: ConditionType,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> ConditionUpdate {
    if find_condition(old, ConditionType::Completed)
        .is_some_and(|c| c.status == ConditionStatus::True)
    {
        return ConditionUpdate::unchanged(old);
    }

    let conditions: Vec<Condition> = types
        .iter()
        .map(|&condition_type| {
            let (status, reason, message) = if condition_type == phase {
                (ConditionStatus::True, reason, message)
            } else {
                (ConditionStatus::False, "", "")
            };

            let last_transition_time = match find_condition(old, condition_type) {
                Some(current) if current.status == status => current.last_transition_time,
                _ => now,
            };

            Condition {
                condition_type,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time,
            }
        })
        .collect();

    let changed = conditions.as_slice() != old;
    ConditionUpdate { conditions, changed }
}

/// Record an evaluation error without changing any status.
///
/// The reason and message land on the condition currently `True`. A set
/// with no `True` condition gets a single `Available=Unknown` condition
/// carrying the error instead.
pub fn annotate_invalid(
    old: &[Condition],
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> ConditionUpdate {
    let mut conditions = old.to_vec();
    let Some(current) = conditions
        .iter_mut()
        .find(|c| c.status == ConditionStatus::True)
    else {
        return unknown_availability(old, reason, message, now);
    };

    if current.reason == reason && current.message == message {
        return ConditionUpdate::unchanged(old);
    }
    current.reason = reason.to_string();
    current.message = message.to_string();

    ConditionUpdate {
        conditions,
        changed: true,
    }
}

fn unknown_availability(
    old: &[Condition],
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> ConditionUpdate {
    if let [current] = old
        && current.condition_type == ConditionType::Available
        && current.status == ConditionStatus::Unknown
        && current.reason == reason
        && current.message == message
    {
        return ConditionUpdate::unchanged(old);
    }

    ConditionUpdate {
        conditions: vec![Condition {
            condition_type: ConditionType::Available,
            status: ConditionStatus::Unknown,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now,
        }],
        changed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WindowError;
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 9, 3, hour, 0, 0).unwrap()
    }

    fn schedule(old: &[Condition], phase: ConditionType, at: DateTime<Utc>) -> ConditionUpdate {
        reduce(old, &ConditionType::SCHEDULE, phase, schedule_reason(phase), "", at)
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(
            schedule_phase(&EvaluationOutcome::Suspended, true),
            Some(ConditionType::Suspend)
        );
        assert_eq!(
            schedule_phase(&EvaluationOutcome::Completed, false),
            Some(ConditionType::Completed)
        );
        assert_eq!(
            schedule_phase(&EvaluationOutcome::Active, true),
            Some(ConditionType::Progressing)
        );
        assert_eq!(
            schedule_phase(&EvaluationOutcome::Active, false),
            Some(ConditionType::Degraded)
        );
        assert_eq!(
            schedule_phase(&EvaluationOutcome::NotActive, false),
            Some(ConditionType::Available)
        );
        assert_eq!(
            schedule_phase(
                &EvaluationOutcome::Invalid(WindowError::UnknownTimeZone("x".into())),
                true
            ),
            None
        );
        assert_eq!(target_phase(true), ConditionType::Available);
        assert_eq!(target_phase(false), ConditionType::Degraded);
    }

    #[test]
    fn test_first_reduce_sets_every_type() {
        let update = schedule(&[], ConditionType::Available, t(9));
        assert!(update.changed);
        assert_eq!(update.conditions.len(), ConditionType::SCHEDULE.len());
        assert_eq!(current_phase(&update.conditions), Some(ConditionType::Available));
        assert!(update.conditions.iter().all(|c| c.last_transition_time == t(9)));
    }

    #[test]
    fn test_stable_phase_is_unchanged() {
        let first = schedule(&[], ConditionType::Progressing, t(10));
        let second = schedule(&first.conditions, ConditionType::Progressing, t(11));
        assert!(!second.changed);
        assert_eq!(second.conditions, first.conditions);
    }

    #[test]
    fn test_transition_time_moves_only_on_status_change() {
        let first = schedule(&[], ConditionType::Available, t(9));
        let second = schedule(&first.conditions, ConditionType::Progressing, t(10));
        assert!(second.changed);

        let progressing = find_condition(&second.conditions, ConditionType::Progressing).unwrap();
        assert_eq!(progressing.status, ConditionStatus::True);
        assert_eq!(progressing.last_transition_time, t(10));

        let available = find_condition(&second.conditions, ConditionType::Available).unwrap();
        assert_eq!(available.status, ConditionStatus::False);
        assert_eq!(available.last_transition_time, t(10));

        // Suspend stayed False throughout
        let suspend = find_condition(&second.conditions, ConditionType::Suspend).unwrap();
        assert_eq!(suspend.last_transition_time, t(9));
    }

    #[test]
    fn test_reason_refresh_keeps_transition_time() {
        let first = reduce(
            &[],
            &ConditionType::SCHEDULE,
            ConditionType::Degraded,
            "ApplyFailed",
            "conflict",
            t(9),
        );
        let second = reduce(
            &first.conditions,
            &ConditionType::SCHEDULE,
            ConditionType::Degraded,
            "ApplyFailed",
            "store unavailable",
            t(10),
        );
        assert!(second.changed);
        let degraded = find_condition(&second.conditions, ConditionType::Degraded).unwrap();
        assert_eq!(degraded.message, "store unavailable");
        assert_eq!(degraded.last_transition_time, t(9));
    }

    #[test]
    fn test_completed_is_terminal() {
        let done = schedule(&[], ConditionType::Completed, t(20));
        let later = schedule(&done.conditions, ConditionType::Progressing, t(21));
        assert!(!later.changed);
        assert_eq!(current_phase(&later.conditions), Some(ConditionType::Completed));
    }

    #[test]
    fn test_target_conditions() {
        let ok = reduce(
            &[],
            &ConditionType::TARGET,
            target_phase(true),
            target_reason(ConditionType::Available),
            "",
            t(9),
        );
        assert_eq!(ok.conditions.len(), 2);
        assert_eq!(current_phase(&ok.conditions), Some(ConditionType::Available));

        let failed = reduce(
            &ok.conditions,
            &ConditionType::TARGET,
            target_phase(false),
            target_reason(ConditionType::Degraded),
            "rejected",
            t(10),
        );
        assert!(failed.changed);
        assert_eq!(current_phase(&failed.conditions), Some(ConditionType::Degraded));
    }

    #[test]
    fn test_annotate_invalid_keeps_statuses() {
        let active = schedule(&[], ConditionType::Progressing, t(9));
        let update = annotate_invalid(&active.conditions, "ParseError", "invalid startTime", t(10));
        assert!(update.changed);

        for (before, after) in active.conditions.iter().zip(&update.conditions) {
            assert_eq!(before.status, after.status);
            assert_eq!(before.last_transition_time, after.last_transition_time);
        }
        let progressing = find_condition(&update.conditions, ConditionType::Progressing).unwrap();
        assert_eq!(progressing.reason, "ParseError");
        assert_eq!(progressing.message, "invalid startTime");

        let again = annotate_invalid(&update.conditions, "ParseError", "invalid startTime", t(11));
        assert!(!again.changed);
    }

    #[test]
    fn test_annotate_invalid_without_status() {
        let update = annotate_invalid(&[], "UnknownTimeZone", "unknown time zone 'x'", t(9));
        assert!(update.changed);
        assert_eq!(update.conditions.len(), 1);

        let available = &update.conditions[0];
        assert_eq!(available.condition_type, ConditionType::Available);
        assert_eq!(available.status, ConditionStatus::Unknown);
        assert_eq!(available.reason, "UnknownTimeZone");
        assert_eq!(available.last_transition_time, t(9));
        assert_eq!(current_phase(&update.conditions), None);

        let again = annotate_invalid(&update.conditions, "UnknownTimeZone", "unknown time zone 'x'", t(10));
        assert!(!again.changed);

        // A different error replaces the condition
        let other = annotate_invalid(&update.conditions, "ParseError", "invalid startTime", t(11));
        assert!(other.changed);
        assert_eq!(other.conditions[0].reason, "ParseError");
        assert_eq!(other.conditions[0].last_transition_time, t(11));
    }

    #[test]
    fn test_recovery_from_unknown() {
        let invalid = annotate_invalid(&[], "ParseError", "invalid startTime", t(9));
        let valid = schedule(&invalid.conditions, ConditionType::Available, t(10));
        assert!(valid.changed);
        assert_eq!(valid.conditions.len(), ConditionType::SCHEDULE.len());

        let available = find_condition(&valid.conditions, ConditionType::Available).unwrap();
        assert_eq!(available.status, ConditionStatus::True);
        assert_eq!(available.last_transition_time, t(10));
    }
}
