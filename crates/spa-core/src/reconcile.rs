//! Per-target reconciliation
//!
//! One pass reads the target's baseline and owned schedules, aggregates
//! them, writes the resulting bounds when they differ from what is
//! applied, and then brings every schedule's and the target's status up
//! to date. Passes are idempotent: re-running at the same instant writes
//! nothing.

use chrono::{DateTime, Utc};
use spa_api::{ConditionType, ReplicaBounds, Schedule};
use spa_store::{AuditEvent, Store, StoreError};
use spa_util::{RunId, ScheduleId, TargetId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    CoreEvent, EvaluationOutcome, ScheduleEvaluation, aggregate, annotate_invalid, current_phase,
    reduce, schedule_phase, schedule_reason, target_phase, target_reason,
};

/// Default interval between periodic passes over every target
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Errors that abort a reconciliation pass
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Writing bounds failed transiently; status was already recorded
    #[error("failed to apply bounds to {target}: {source}")]
    Apply {
        target: TargetId,
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    /// Whether the pass should be retried with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_retryable(),
            ReconcileError::Apply { source, .. } => source.is_retryable(),
        }
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub run_id: RunId,
    pub target: TargetId,
    /// Per-schedule outcomes, sorted by schedule id
    pub outcomes: Vec<ScheduleEvaluation>,
    /// Bounds the target should have
    pub desired: ReplicaBounds,
    /// Whether new bounds were written in this pass
    pub applied: bool,
    /// Version of the applied bounds after the pass, if known
    pub version: Option<u64>,
    /// Non-retryable write failure; the next periodic pass tries again
    pub apply_failure: Option<String>,
    pub events: Vec<CoreEvent>,
    /// When the target should be looked at again
    pub requeue_after: Duration,
}

impl ReconcileReport {
    pub fn invalid_schedules(&self) -> impl Iterator<Item = &ScheduleEvaluation> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, EvaluationOutcome::Invalid(_)))
    }
}

/// Drives reconciliation passes against a store
pub struct Reconciler {
    store: Arc<dyn Store>,
    resync_interval: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, resync_interval: Duration) -> Self {
        Self {
            store,
            resync_interval,
        }
    }

    /// Run one pass for `target` as of `now`
    pub fn reconcile(
        &self,
        target: &TargetId,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let run_id = RunId::new();
        debug!(run_id = %run_id, target = %target, "Reconciling target");

        let baseline = self.store.get_target_baseline(target)?;
        let schedules = self.store.list_schedules(target)?;
        let aggregation = aggregate(&schedules, now);
        let desired = aggregation.bounds.resolve(&baseline);
        let current = self.store.get_applied_bounds(target)?;

        let mut events = Vec::new();

        let write = match &current {
            Some(applied) if applied.bounds == desired => Ok(None),
            _ => self
                .store
                .apply_bounds(target, &desired, current.as_ref().map(|a| a.version))
                .map(Some),
        };

        let applied = matches!(write, Ok(Some(_)));
        let (apply_ok, apply_error, version) = match &write {
            Ok(Some(version)) => {
                info!(
                    run_id = %run_id,
                    target = %target,
                    min_replicas = ?desired.min_replicas,
                    max_replicas = desired.max_replicas,
                    active = aggregation.active_count(),
                    version,
                    "Applied bounds"
                );
                events.push(CoreEvent::BoundsApplied {
                    target: target.clone(),
                    bounds: desired.clone(),
                    version: *version,
                });
                (true, None, Some(*version))
            }
            Ok(None) => {
                debug!(run_id = %run_id, target = %target, "Bounds already applied");
                (true, None, current.as_ref().map(|a| a.version))
            }
            Err(e) => {
                warn!(run_id = %run_id, target = %target, error = %e, "Failed to apply bounds");
                events.push(CoreEvent::ApplyFailed {
                    target: target.clone(),
                    reason: e.to_string(),
                });
                (false, Some(e.to_string()), current.as_ref().map(|a| a.version))
            }
        };

        let by_id: HashMap<&ScheduleId, &Schedule> =
            schedules.iter().map(|s| (&s.id, s)).collect();
        for evaluation in &aggregation.outcomes {
            if let Some(schedule) = by_id.get(&evaluation.id) {
                self.update_schedule_status(
                    schedule,
                    &evaluation.outcome,
                    apply_ok,
                    apply_error.as_deref(),
                    now,
                    &mut events,
                )?;
            }
        }

        self.update_target_status(target, apply_ok, apply_error.as_deref(), now, &mut events)?;

        for event in &events {
            if let Err(e) = self.store.append_audit(AuditEvent::at(event.to_audit(), now)) {
                warn!(target = %target, error = %e, "Failed to append audit event");
            }
        }

        let apply_failure = match write {
            Err(e) if e.is_retryable() => {
                return Err(ReconcileError::Apply {
                    target: target.clone(),
                    source: e,
                });
            }
            Err(e) => Some(e.to_string()),
            Ok(_) => None,
        };

        Ok(ReconcileReport {
            run_id,
            target: target.clone(),
            outcomes: aggregation.outcomes,
            desired,
            applied,
            version,
            apply_failure,
            events,
            requeue_after: self.resync_interval,
        })
    }

    fn update_schedule_status(
        &self,
        schedule: &Schedule,
        outcome: &EvaluationOutcome,
        apply_ok: bool,
        apply_error: Option<&str>,
        now: DateTime<Utc>,
        events: &mut Vec<CoreEvent>,
    ) -> Result<(), StoreError> {
        let Some(phase) = schedule_phase(outcome, apply_ok) else {
            if let EvaluationOutcome::Invalid(e) = outcome {
                warn!(schedule = %schedule.id, reason = e.kind(), error = %e, "Invalid schedule");
                let message = e.to_string();
                let update = annotate_invalid(&schedule.conditions, e.kind(), &message, now);
                if update.changed {
                    self.store.set_schedule_status(&schedule.id, &update.conditions)?;
                    events.push(CoreEvent::ScheduleInvalid {
                        schedule: schedule.id.clone(),
                        reason: e.kind().to_string(),
                        message,
                    });
                }
            }
            return Ok(());
        };

        let message = match phase {
            ConditionType::Degraded => apply_error.unwrap_or_default(),
            _ => "",
        };
        let update = reduce(
            &schedule.conditions,
            &ConditionType::SCHEDULE,
            phase,
            schedule_reason(phase),
            message,
            now,
        );
        if !update.changed {
            return Ok(());
        }

        self.store.set_schedule_status(&schedule.id, &update.conditions)?;

        let from = current_phase(&schedule.conditions);
        if from != Some(phase) {
            info!(schedule = %schedule.id, from = ?from, to = %phase, "Schedule transitioned");
            events.push(CoreEvent::ScheduleTransitioned {
                schedule: schedule.id.clone(),
                from,
                to: phase,
            });
        }
        Ok(())
    }

    fn update_target_status(
        &self,
        target: &TargetId,
        apply_ok: bool,
        apply_error: Option<&str>,
        now: DateTime<Utc>,
        events: &mut Vec<CoreEvent>,
    ) -> Result<(), StoreError> {
        let old = self.store.get_target_status(target)?;
        let phase = target_phase(apply_ok);
        let update = reduce(
            &old,
            &ConditionType::TARGET,
            phase,
            target_reason(phase),
            apply_error.unwrap_or_default(),
            now,
        );
        if !update.changed {
            return Ok(());
        }

        self.store.set_target_status(target, &update.conditions)?;

        let from = current_phase(&old);
        if from != Some(phase) {
            info!(target = %target, from = ?from, to = %phase, "Target transitioned");
            events.push(CoreEvent::TargetTransitioned {
                target: target.clone(),
                from,
                to: phase,
            });
        }
        Ok(())
    }
}
