//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use spa_api::{Condition, ReplicaBounds, Schedule, ScheduleSpec};
use spa_util::{ScheduleId, TargetId};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{AppliedBounds, AuditEvent, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Scalable targets and their baseline bounds
            CREATE TABLE IF NOT EXISTS targets (
                id TEXT PRIMARY KEY,
                baseline_json TEXT NOT NULL,
                status_json TEXT NOT NULL DEFAULT '[]'
            );

            -- Schedule definitions, owned by a target
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                target_id TEXT NOT NULL,
                spec_json TEXT NOT NULL,
                status_json TEXT NOT NULL DEFAULT '[]'
            );

            -- Bounds currently written to each target
            CREATE TABLE IF NOT EXISTS applied_bounds (
                target_id TEXT PRIMARY KEY,
                bounds_json TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_schedules_target ON schedules(target_id);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| spa_util::now())
}

fn schedule_from_row(
    id: String,
    target_id: String,
    spec_json: &str,
    status_json: &str,
) -> StoreResult<Schedule> {
    Ok(Schedule {
        id: ScheduleId::from(id),
        target: TargetId::from(target_id),
        spec: serde_json::from_str(spec_json)?,
        conditions: serde_json::from_str(status_json)?,
    })
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            events.push(AuditEvent {
                id,
                timestamp: parse_timestamp(&timestamp_str),
                event: serde_json::from_str(&event_json)?,
            });
        }

        Ok(events)
    }

    fn upsert_target(&self, id: &TargetId, baseline: &ReplicaBounds) -> StoreResult<bool> {
        let conn = self.conn()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT baseline_json FROM targets WHERE id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(json) = existing {
            let current: ReplicaBounds = serde_json::from_str(&json)?;
            if &current == baseline {
                return Ok(false);
            }
        }

        conn.execute(
            r#"
            INSERT INTO targets (id, baseline_json)
            VALUES (?, ?)
            ON CONFLICT(id)
            DO UPDATE SET baseline_json = excluded.baseline_json
            "#,
            params![id.as_str(), serde_json::to_string(baseline)?],
        )?;

        debug!(target = %id, "Target baseline stored");
        Ok(true)
    }

    fn delete_target(&self, id: &TargetId) -> StoreResult<bool> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM applied_bounds WHERE target_id = ?",
            [id.as_str()],
        )?;
        let removed = conn.execute("DELETE FROM targets WHERE id = ?", [id.as_str()])?;
        Ok(removed > 0)
    }

    fn list_targets(&self) -> StoreResult<Vec<TargetId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM targets ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut targets = Vec::new();
        for row in rows {
            targets.push(TargetId::from(row?));
        }
        Ok(targets)
    }

    fn get_target_baseline(&self, id: &TargetId) -> StoreResult<ReplicaBounds> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT baseline_json FROM targets WHERE id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Err(StoreError::NotFound(format!("target {}", id))),
        }
    }

    fn get_target_status(&self, id: &TargetId) -> StoreResult<Vec<Condition>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT status_json FROM targets WHERE id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Err(StoreError::NotFound(format!("target {}", id))),
        }
    }

    fn set_target_status(&self, id: &TargetId, conditions: &[Condition]) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE targets SET status_json = ? WHERE id = ?",
            params![serde_json::to_string(conditions)?, id.as_str()],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("target {}", id)));
        }
        debug!(target = %id, "Target status stored");
        Ok(())
    }

    fn get_applied_bounds(&self, id: &TargetId) -> StoreResult<Option<AppliedBounds>> {
        let conn = self.conn()?;
        let row: Option<(String, i64, String)> = conn
            .query_row(
                "SELECT bounds_json, version, updated_at FROM applied_bounds WHERE target_id = ?",
                [id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((bounds_json, version, updated_at)) => Ok(Some(AppliedBounds {
                bounds: serde_json::from_str(&bounds_json)?,
                version: version as u64,
                updated_at: parse_timestamp(&updated_at),
            })),
            None => Ok(None),
        }
    }

    fn apply_bounds(
        &self,
        id: &TargetId,
        bounds: &ReplicaBounds,
        expected_version: Option<u64>,
    ) -> StoreResult<u64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let target_exists = tx
            .query_row("SELECT 1 FROM targets WHERE id = ?", [id.as_str()], |_| Ok(()))
            .optional()?
            .is_some();
        if !target_exists {
            return Err(StoreError::NotFound(format!("target {}", id)));
        }

        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM applied_bounds WHERE target_id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.map(|v| v as u64);

        if current != expected_version {
            return Err(StoreError::Conflict(format!(
                "applied bounds of {}: expected version {:?}, found {:?}",
                id, expected_version, current
            )));
        }

        let version = expected_version.map_or(1, |v| v + 1);
        tx.execute(
            r#"
            INSERT INTO applied_bounds (target_id, bounds_json, version, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(target_id)
            DO UPDATE SET bounds_json = excluded.bounds_json,
                          version = excluded.version,
                          updated_at = excluded.updated_at
            "#,
            params![
                id.as_str(),
                serde_json::to_string(bounds)?,
                version as i64,
                spa_util::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;

        debug!(target = %id, version, "Applied bounds written");
        Ok(version)
    }

    fn upsert_schedule(&self, id: &ScheduleId, spec: &ScheduleSpec) -> StoreResult<bool> {
        let conn = self.conn()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT spec_json FROM schedules WHERE id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(json) = existing {
            let current: ScheduleSpec = serde_json::from_str(&json)?;
            if &current == spec {
                return Ok(false);
            }
        }

        let target = TargetId::new(id.namespace(), &spec.target);
        conn.execute(
            r#"
            INSERT INTO schedules (id, target_id, spec_json)
            VALUES (?, ?, ?)
            ON CONFLICT(id)
            DO UPDATE SET target_id = excluded.target_id,
                          spec_json = excluded.spec_json,
                          status_json = '[]'
            "#,
            params![id.as_str(), target.as_str(), serde_json::to_string(spec)?],
        )?;

        debug!(schedule = %id, target = %target, "Schedule stored");
        Ok(true)
    }

    fn delete_schedule(&self, id: &ScheduleId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM schedules WHERE id = ?", [id.as_str()])?;
        Ok(removed > 0)
    }

    fn list_all_schedules(&self) -> StoreResult<Vec<Schedule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_id, spec_json, status_json FROM schedules ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut schedules = Vec::new();
        for row in rows {
            let (id, target_id, spec_json, status_json) = row?;
            schedules.push(schedule_from_row(id, target_id, &spec_json, &status_json)?);
        }
        Ok(schedules)
    }

    fn list_schedules(&self, target: &TargetId) -> StoreResult<Vec<Schedule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, target_id, spec_json, status_json FROM schedules
            WHERE target_id = ?
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([target.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut schedules = Vec::new();
        for row in rows {
            let (id, target_id, spec_json, status_json) = row?;
            schedules.push(schedule_from_row(id, target_id, &spec_json, &status_json)?);
        }
        Ok(schedules)
    }

    fn set_schedule_status(&self, id: &ScheduleId, conditions: &[Condition]) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE schedules SET status_json = ? WHERE id = ?",
            params![serde_json::to_string(conditions)?, id.as_str()],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("schedule {}", id)));
        }
        debug!(schedule = %id, "Schedule status stored");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::TimeZone;
    use spa_api::{ConditionStatus, ConditionType, MetricTarget, ScheduleType};

    fn bounds(min: Option<u32>, max: u32) -> ReplicaBounds {
        ReplicaBounds {
            min_replicas: min,
            max_replicas: max,
            metrics: vec![],
        }
    }

    fn daily(target: &str) -> ScheduleSpec {
        ScheduleSpec {
            target: target.into(),
            schedule_type: ScheduleType::Daily,
            start_time: "10:00".into(),
            end_time: "19:00".into(),
            start_day_of_week: None,
            end_day_of_week: None,
            time_zone: None,
            suspend: false,
            description: None,
            min_replicas: Some(4),
            max_replicas: Some(8),
            metrics: vec![],
        }
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::DaemonStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::ApplyFailed {
                target: TargetId::new("default", "web"),
                reason: "rejected".into(),
            }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, AuditEventType::ApplyFailed { .. }));
        assert!(matches!(events[1].event, AuditEventType::DaemonStarted));
    }

    #[test]
    fn test_target_upsert_reports_changes() {
        let store = SqliteStore::in_memory().unwrap();
        let id = TargetId::new("default", "web");

        assert!(store.upsert_target(&id, &bounds(Some(2), 10)).unwrap());
        assert!(!store.upsert_target(&id, &bounds(Some(2), 10)).unwrap());
        assert!(store.upsert_target(&id, &bounds(Some(3), 10)).unwrap());

        assert_eq!(store.get_target_baseline(&id).unwrap(), bounds(Some(3), 10));
        assert_eq!(store.list_targets().unwrap(), vec![id]);
    }

    #[test]
    fn test_unknown_target_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let id = TargetId::new("default", "missing");

        assert!(matches!(
            store.get_target_baseline(&id),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.apply_bounds(&id, &bounds(None, 1), None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_apply_bounds_versioning() {
        let store = SqliteStore::in_memory().unwrap();
        let id = TargetId::new("default", "web");
        store.upsert_target(&id, &bounds(Some(2), 10)).unwrap();

        assert!(store.get_applied_bounds(&id).unwrap().is_none());

        // Create-if-absent
        let v1 = store.apply_bounds(&id, &bounds(Some(2), 10), None).unwrap();
        assert_eq!(v1, 1);

        // A second create loses
        let err = store.apply_bounds(&id, &bounds(Some(5), 10), None).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(err.is_retryable());

        // Update with the right version
        let v2 = store.apply_bounds(&id, &bounds(Some(5), 10), Some(v1)).unwrap();
        assert_eq!(v2, 2);

        // Stale version
        assert!(matches!(
            store.apply_bounds(&id, &bounds(Some(6), 10), Some(v1)),
            Err(StoreError::Conflict(_))
        ));

        let applied = store.get_applied_bounds(&id).unwrap().unwrap();
        assert_eq!(applied.version, 2);
        assert_eq!(applied.bounds, bounds(Some(5), 10));
    }

    #[test]
    fn test_schedules_are_listed_by_owner() {
        let store = SqliteStore::in_memory().unwrap();
        let web = TargetId::new("default", "web");
        let api = TargetId::new("default", "api");

        store
            .upsert_schedule(&ScheduleId::new("default", "b"), &daily("web"))
            .unwrap();
        store
            .upsert_schedule(&ScheduleId::new("default", "a"), &daily("web"))
            .unwrap();
        store
            .upsert_schedule(&ScheduleId::new("default", "c"), &daily("api"))
            .unwrap();
        store
            .upsert_schedule(&ScheduleId::new("other", "d"), &daily("web"))
            .unwrap();

        let owned = store.list_schedules(&web).unwrap();
        let ids: Vec<_> = owned.iter().map(|s| s.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["default/a", "default/b"]);
        assert!(owned.iter().all(|s| s.target == web));

        assert_eq!(store.list_schedules(&api).unwrap().len(), 1);
        assert_eq!(store.list_all_schedules().unwrap().len(), 4);
    }

    #[test]
    fn test_schedule_status_roundtrip_and_reset() {
        let store = SqliteStore::in_memory().unwrap();
        let id = ScheduleId::new("default", "nightly");
        let target = TargetId::new("default", "web");

        assert!(store.upsert_schedule(&id, &daily("web")).unwrap());
        assert!(!store.upsert_schedule(&id, &daily("web")).unwrap());

        let conditions = vec![Condition {
            condition_type: ConditionType::Available,
            status: ConditionStatus::True,
            reason: String::new(),
            message: String::new(),
            last_transition_time: Utc.with_ymd_and_hms(2018, 9, 3, 10, 0, 0).unwrap(),
        }];
        store.set_schedule_status(&id, &conditions).unwrap();
        assert_eq!(store.list_schedules(&target).unwrap()[0].conditions, conditions);

        // Changing the definition starts over with empty status
        let mut changed = daily("web");
        changed.metrics.push(MetricTarget {
            name: "cpu".into(),
            spec: serde_json::json!({"averageUtilization": 60}),
        });
        assert!(store.upsert_schedule(&id, &changed).unwrap());
        assert!(store.list_schedules(&target).unwrap()[0].conditions.is_empty());

        assert!(store.delete_schedule(&id).unwrap());
        assert!(!store.delete_schedule(&id).unwrap());
        assert!(matches!(
            store.set_schedule_status(&id, &conditions),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_target_drops_applied_bounds() {
        let store = SqliteStore::in_memory().unwrap();
        let id = TargetId::new("default", "web");
        store.upsert_target(&id, &bounds(None, 3)).unwrap();
        store.apply_bounds(&id, &bounds(None, 3), None).unwrap();

        assert!(store.delete_target(&id).unwrap());
        assert!(store.get_applied_bounds(&id).unwrap().is_none());
        assert!(store.list_targets().unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spad.db");
        let id = TargetId::new("default", "web");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_target(&id, &bounds(Some(1), 4)).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_target_baseline(&id).unwrap(), bounds(Some(1), 4));
    }
}
