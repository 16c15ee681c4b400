//! Core events emitted by the reconciler

use spa_api::{ConditionType, ReplicaBounds};
use spa_store::AuditEventType;
use spa_util::{ScheduleId, TargetId};

/// Events emitted by a reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// New bounds written to the target
    BoundsApplied {
        target: TargetId,
        bounds: ReplicaBounds,
        version: u64,
    },

    /// Writing bounds failed
    ApplyFailed {
        target: TargetId,
        reason: String,
    },

    /// A schedule changed phase
    ScheduleTransitioned {
        schedule: ScheduleId,
        from: Option<ConditionType>,
        to: ConditionType,
    },

    /// A schedule definition could not be evaluated (recorded once per change)
    ScheduleInvalid {
        schedule: ScheduleId,
        reason: String,
        message: String,
    },

    /// The target changed phase
    TargetTransitioned {
        target: TargetId,
        from: Option<ConditionType>,
        to: ConditionType,
    },
}

impl CoreEvent {
    pub fn to_audit(&self) -> AuditEventType {
        match self.clone() {
            CoreEvent::BoundsApplied {
                target,
                bounds,
                version,
            } => AuditEventType::BoundsApplied {
                target,
                bounds,
                version,
            },
            CoreEvent::ApplyFailed { target, reason } => {
                AuditEventType::ApplyFailed { target, reason }
            }
            CoreEvent::ScheduleTransitioned { schedule, from, to } => {
                AuditEventType::ScheduleTransitioned { schedule, from, to }
            }
            CoreEvent::ScheduleInvalid {
                schedule,
                reason,
                message,
            } => AuditEventType::ScheduleInvalid {
                schedule,
                reason,
                message,
            },
            CoreEvent::TargetTransitioned { target, from, to } => {
                AuditEventType::TargetTransitioned { target, from, to }
            }
        }
    }
}
