//! Store trait definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spa_api::{Condition, ReplicaBounds, Schedule, ScheduleSpec};
use spa_util::{ScheduleId, TargetId};

use crate::{AuditEvent, StoreResult};

/// Bounds currently written to a target, with their optimistic version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedBounds {
    pub bounds: ReplicaBounds,
    /// Incremented on every successful write
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Targets

    /// Create or update a target's baseline. Returns whether anything changed.
    fn upsert_target(&self, id: &TargetId, baseline: &ReplicaBounds) -> StoreResult<bool>;

    /// Remove a target and its applied bounds. Returns whether it existed.
    fn delete_target(&self, id: &TargetId) -> StoreResult<bool>;

    /// All known targets, sorted by id
    fn list_targets(&self) -> StoreResult<Vec<TargetId>>;

    /// Baseline bounds of a target (`NotFound` if unknown)
    fn get_target_baseline(&self, id: &TargetId) -> StoreResult<ReplicaBounds>;

    /// Last written target conditions
    fn get_target_status(&self, id: &TargetId) -> StoreResult<Vec<Condition>>;

    /// Replace the target conditions
    fn set_target_status(&self, id: &TargetId, conditions: &[Condition]) -> StoreResult<()>;

    // Applied bounds

    /// Bounds last written to a target, if any
    fn get_applied_bounds(&self, id: &TargetId) -> StoreResult<Option<AppliedBounds>>;

    /// Write bounds to a target and return the new version.
    ///
    /// With `expected_version == None` the record must not exist yet;
    /// otherwise the stored version must match. Either mismatch is a
    /// `Conflict`.
    fn apply_bounds(
        &self,
        id: &TargetId,
        bounds: &ReplicaBounds,
        expected_version: Option<u64>,
    ) -> StoreResult<u64>;

    // Schedules

    /// Create or update a schedule definition. Returns whether anything
    /// changed. A changed definition starts over with empty status.
    fn upsert_schedule(&self, id: &ScheduleId, spec: &ScheduleSpec) -> StoreResult<bool>;

    /// Remove a schedule. Returns whether it existed.
    fn delete_schedule(&self, id: &ScheduleId) -> StoreResult<bool>;

    /// All stored schedules, sorted by id
    fn list_all_schedules(&self) -> StoreResult<Vec<Schedule>>;

    /// Schedules owned by a target, sorted by id
    fn list_schedules(&self, target: &TargetId) -> StoreResult<Vec<Schedule>>;

    /// Replace a schedule's conditions
    fn set_schedule_status(&self, id: &ScheduleId, conditions: &[Condition]) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
