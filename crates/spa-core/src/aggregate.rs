//! Aggregation of every schedule owned by a target into effective bounds

use chrono::{DateTime, Utc};
use spa_api::{EffectiveBounds, MetricTarget, Schedule};
use spa_util::ScheduleId;
use std::collections::BTreeMap;

use crate::{EvaluationOutcome, evaluate};

/// Outcome of one schedule within an aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEvaluation {
    pub id: ScheduleId,
    pub outcome: EvaluationOutcome,
}

/// Combined result for one target at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub bounds: EffectiveBounds,
    /// Sorted by schedule id
    pub outcomes: Vec<ScheduleEvaluation>,
}

impl Aggregation {
    pub fn active_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_active()).count()
    }
}

/// Evaluate every schedule and combine the active ones.
///
/// Each bound is the maximum over the active schedules that specify it,
/// taken independently. Metric lists are merged by name; when several
/// active schedules name the same metric the one with the lowest id wins.
/// The result does not depend on the order of `schedules`.
pub fn aggregate(schedules: &[Schedule], now: DateTime<Utc>) -> Aggregation {
    let mut evaluated: Vec<(&Schedule, EvaluationOutcome)> = schedules
        .iter()
        .map(|schedule| {
            // Completed is terminal, no need to look at the window again
            let outcome = if schedule.is_completed() {
                EvaluationOutcome::Completed
            } else {
                evaluate(&schedule.spec, now)
            };
            (schedule, outcome)
        })
        .collect();
    evaluated.sort_by(|a, b| a.0.id.cmp(&b.0.id));

    let active: Vec<&Schedule> = evaluated
        .iter()
        .filter(|(_, outcome)| outcome.is_active())
        .map(|(schedule, _)| *schedule)
        .collect();

    let bounds = if active.is_empty() {
        EffectiveBounds::UseBaseline
    } else {
        let mut metrics: BTreeMap<&str, &MetricTarget> = BTreeMap::new();
        for schedule in &active {
            for metric in &schedule.spec.metrics {
                metrics.entry(metric.name.as_str()).or_insert(metric);
            }
        }

        EffectiveBounds::Override {
            min_replicas: active.iter().filter_map(|s| s.spec.min_replicas).max(),
            max_replicas: active.iter().filter_map(|s| s.spec.max_replicas).max(),
            metrics: metrics.into_values().cloned().collect(),
        }
    };

    let outcomes = evaluated
        .into_iter()
        .map(|(schedule, outcome)| ScheduleEvaluation {
            id: schedule.id.clone(),
            outcome,
        })
        .collect();

    Aggregation { bounds, outcomes }
}
