//! Audit event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spa_api::{ConditionType, ReplicaBounds};
use spa_util::{ScheduleId, TargetId};

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Daemon started
    DaemonStarted,

    /// Daemon stopped
    DaemonStopped,

    /// Manifest synced into the store
    ManifestSynced {
        targets: usize,
        schedules: usize,
        changed_targets: usize,
    },

    /// Manifest reload requested
    ConfigReloaded { success: bool },

    /// New bounds written to a target
    BoundsApplied {
        target: TargetId,
        bounds: ReplicaBounds,
        version: u64,
    },

    /// Writing bounds to a target failed
    ApplyFailed { target: TargetId, reason: String },

    /// A schedule moved to a different phase
    ScheduleTransitioned {
        schedule: ScheduleId,
        from: Option<ConditionType>,
        to: ConditionType,
    },

    /// A schedule's window definition could not be evaluated
    ScheduleInvalid {
        schedule: ScheduleId,
        reason: String,
        message: String,
    },

    /// A target moved between Available and Degraded
    TargetTransitioned {
        target: TargetId,
        from: Option<ConditionType>,
        to: ConditionType,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(event, spa_util::now())
    }

    /// Event stamped with an explicit time, e.g. the reconciliation clock
    pub fn at(event: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
