//! Integration tests for spad
//!
//! These tests drive the same pieces the daemon wires together: a manifest
//! loaded from disk, synced into an on-disk store and reconciled at fixed
//! points in time.

use chrono::{DateTime, TimeZone, Utc};
use spa_api::{ConditionStatus, ConditionType, ReplicaBounds};
use spa_config::{load_config, parse_config, Manifest};
use spa_core::{current_phase, sync_manifest, Reconciler, SyncSummary, WorkQueue};
use spa_store::{AuditEventType, SqliteStore, Store};
use spa_util::{database_path, Backoff, ScheduleId, TargetId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn sample_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../spa.example.toml")
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn web() -> TargetId {
    TargetId::new("default", "web")
}

fn reports() -> TargetId {
    TargetId::new("batch", "reports")
}

struct Harness {
    dir: TempDir,
    store: Arc<SqliteStore>,
    reconciler: Reconciler,
}

impl Harness {
    fn new(manifest: &Manifest) -> (Self, SyncSummary) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(database_path(dir.path())).unwrap());
        let summary = sync_manifest(store.as_ref(), manifest).unwrap();
        let reconciler = Reconciler::new(store.clone(), manifest.daemon.resync_interval);
        (
            Self {
                dir,
                store,
                reconciler,
            },
            summary,
        )
    }

    fn schedule_phase(&self, target: &TargetId, name: &str) -> Option<ConditionType> {
        self.store
            .list_schedules(target)
            .unwrap()
            .into_iter()
            .find(|s| s.id.name() == name)
            .and_then(|s| current_phase(&s.conditions))
    }

    fn applied(&self, target: &TargetId) -> ReplicaBounds {
        self.store.get_applied_bounds(target).unwrap().unwrap().bounds
    }
}

#[test]
fn test_sample_config_is_valid() {
    let manifest = load_config(sample_config_path()).unwrap();
    assert_eq!(manifest.targets.len(), 2);
    assert_eq!(manifest.schedules.len(), 4);
    assert!(manifest.warnings.is_empty());
    assert_eq!(manifest.daemon.workers, 4);
    assert_eq!(manifest.daemon.resync_interval, Duration::from_secs(30));
}

#[test]
fn test_weekly_window_in_tokyo() {
    let manifest = load_config(sample_config_path()).unwrap();
    let (harness, summary) = Harness::new(&manifest);
    assert_eq!(summary.changed.len(), 2);

    // Monday 10:00 in Tokyo
    let report = harness
        .reconciler
        .reconcile(&web(), utc(2024, 1, 8, 1, 0))
        .unwrap();
    assert!(report.applied);
    assert_eq!(report.desired.min_replicas, Some(5));
    assert_eq!(report.desired.max_replicas, 20);
    // No schedule metrics, so the baseline's are kept
    assert_eq!(report.desired.metrics.len(), 1);
    assert_eq!(report.desired.metrics[0].name, "cpu");

    assert_eq!(
        harness.schedule_phase(&web(), "business-hours"),
        Some(ConditionType::Progressing)
    );
    assert_eq!(
        harness.schedule_phase(&web(), "launch"),
        Some(ConditionType::Available)
    );
    assert_eq!(
        harness.schedule_phase(&web(), "year-end"),
        Some(ConditionType::Available)
    );

    // Saturday: back to the baseline
    let report = harness
        .reconciler
        .reconcile(&web(), utc(2024, 1, 13, 1, 0))
        .unwrap();
    assert!(report.applied);
    assert_eq!(report.version, Some(2));
    assert_eq!(report.desired, manifest.targets[0].baseline);
    assert_eq!(
        harness.schedule_phase(&web(), "business-hours"),
        Some(ConditionType::Available)
    );
}

#[test]
fn test_state_survives_reopen() {
    let manifest = load_config(sample_config_path()).unwrap();
    let (harness, _) = Harness::new(&manifest);
    harness
        .reconciler
        .reconcile(&reports(), utc(2024, 1, 8, 1, 0))
        .unwrap();

    let path = database_path(harness.dir.path());
    let reopened = Arc::new(SqliteStore::open(&path).unwrap());
    let applied = reopened.get_applied_bounds(&reports()).unwrap().unwrap();
    assert_eq!(applied.version, 1);
    assert_eq!(applied.bounds.min_replicas, Some(2));
    assert_eq!(applied.bounds.max_replicas, 8);

    // A restarted daemon re-syncing the same manifest changes nothing
    let summary = sync_manifest(reopened.as_ref(), &manifest).unwrap();
    assert!(summary.changed.is_empty());

    let reconciler = Reconciler::new(reopened.clone(), manifest.daemon.resync_interval);
    let report = reconciler.reconcile(&reports(), utc(2024, 1, 8, 1, 5)).unwrap();
    assert!(!report.applied);
    assert!(report.events.is_empty());
    assert_eq!(report.version, Some(1));
}

#[test]
fn test_monthly_window_replaces_metrics() {
    let manifest = load_config(sample_config_path()).unwrap();
    let (harness, _) = Harness::new(&manifest);

    // Tuesday 10:00 in New York, midnight in Tokyo
    let report = harness
        .reconciler
        .reconcile(&web(), utc(2024, 12, 10, 15, 0))
        .unwrap();
    assert_eq!(report.desired.min_replicas, Some(8));
    assert_eq!(report.desired.max_replicas, 10);
    assert_eq!(report.desired.metrics.len(), 1);
    let metric = &report.desired.metrics[0];
    assert_eq!(metric.name, "requests-per-second");
    assert_eq!(metric.spec["averageValue"], "100");
}

#[test]
fn test_overlapping_windows_take_the_maximum() {
    let manifest = parse_config(
        r#"
        config_version = 1

        [[targets]]
        name = "web"
        minReplicas = 2
        maxReplicas = 10

        [[schedules]]
        name = "lunch"
        target = "web"
        type = "Daily"
        startTime = "11:00"
        endTime = "14:00"
        minReplicas = 6
        maxReplicas = 12

        [[schedules]]
        name = "afternoon"
        target = "web"
        type = "Daily"
        startTime = "13:00"
        endTime = "17:00"
        minReplicas = 4
        maxReplicas = 30
        "#,
    )
    .unwrap();
    let (harness, _) = Harness::new(&manifest);

    let report = harness
        .reconciler
        .reconcile(&web(), utc(2024, 3, 1, 13, 30))
        .unwrap();
    assert_eq!(report.desired.min_replicas, Some(6));
    assert_eq!(report.desired.max_replicas, 30);

    // Only the afternoon window is left
    harness
        .reconciler
        .reconcile(&web(), utc(2024, 3, 1, 15, 0))
        .unwrap();
    let applied = harness.applied(&web());
    assert_eq!(applied.min_replicas, Some(4));
    assert_eq!(applied.max_replicas, 30);
}

#[test]
fn test_reload_drops_removed_schedule() {
    let manifest = load_config(sample_config_path()).unwrap();
    let (harness, _) = Harness::new(&manifest);
    let monday = utc(2024, 1, 8, 1, 0);
    harness.reconciler.reconcile(&web(), monday).unwrap();
    assert_eq!(harness.applied(&web()).min_replicas, Some(5));

    let content = std::fs::read_to_string(sample_config_path()).unwrap();
    let trimmed = content.replace("name = \"business-hours\"", "name = \"late-hours\"");
    let trimmed = trimmed.replace("startTime = \"09:00\"", "startTime = \"19:00\"");
    let trimmed = trimmed.replace("endTime = \"18:00\"", "endTime = \"23:00\"");
    let reloaded = parse_config(&trimmed).unwrap();

    let summary = sync_manifest(harness.store.as_ref(), &reloaded).unwrap();
    assert_eq!(summary.changed.iter().collect::<Vec<_>>(), vec![&web()]);
    assert!(summary.removed.is_empty());

    let report = harness.reconciler.reconcile(&web(), monday).unwrap();
    assert!(report.applied);
    assert_eq!(report.desired, manifest.targets[0].baseline);
    assert!(harness.schedule_phase(&web(), "business-hours").is_none());
    assert_eq!(
        harness.schedule_phase(&web(), "late-hours"),
        Some(ConditionType::Available)
    );
}

#[test]
fn test_invalid_schedule_does_not_block_others() {
    let manifest = parse_config(
        r#"
        config_version = 1

        [[targets]]
        name = "web"
        maxReplicas = 10

        [[schedules]]
        name = "broken"
        target = "web"
        type = "Daily"
        startTime = "10:00"
        endTime = "18:00"
        timeZone = "Mars/Olympus"
        minReplicas = 50

        [[schedules]]
        name = "daytime"
        target = "web"
        type = "Daily"
        startTime = "09:00"
        endTime = "17:00"
        minReplicas = 3
        "#,
    )
    .unwrap();
    assert_eq!(manifest.warnings.len(), 1);
    let (harness, _) = Harness::new(&manifest);

    for minute in [0, 1] {
        let report = harness
            .reconciler
            .reconcile(&web(), utc(2024, 3, 1, 12, minute))
            .unwrap();
        assert_eq!(report.desired.min_replicas, Some(3));
        assert_eq!(report.invalid_schedules().count(), 1);
    }

    assert!(harness.schedule_phase(&web(), "broken").is_none());
    assert_eq!(
        harness.schedule_phase(&web(), "daytime"),
        Some(ConditionType::Progressing)
    );

    let broken = harness
        .store
        .list_schedules(&web())
        .unwrap()
        .into_iter()
        .find(|s| s.id.name() == "broken")
        .unwrap();
    assert_eq!(broken.conditions.len(), 1);
    assert_eq!(broken.conditions[0].condition_type, ConditionType::Available);
    assert_eq!(broken.conditions[0].status, ConditionStatus::Unknown);
    assert_eq!(broken.conditions[0].reason, "UnknownTimeZone");

    let invalid = harness
        .store
        .get_recent_audits(100)
        .unwrap()
        .into_iter()
        .filter(|a| {
            matches!(
                &a.event,
                AuditEventType::ScheduleInvalid { reason, .. } if reason == "UnknownTimeZone"
            )
        })
        .count();
    assert_eq!(invalid, 1, "an unchanged error is recorded once");
}

#[test]
fn test_one_shot_completes_and_stays_completed() {
    let manifest = load_config(sample_config_path()).unwrap();
    let (harness, _) = Harness::new(&manifest);
    let launch = ScheduleId::new("default", "launch");

    // 2026-11-01 10:00 in Berlin
    let report = harness
        .reconciler
        .reconcile(&web(), utc(2026, 11, 1, 9, 0))
        .unwrap();
    assert_eq!(report.desired.min_replicas, Some(12));
    assert_eq!(report.desired.max_replicas, 30);

    harness
        .reconciler
        .reconcile(&web(), utc(2026, 11, 2, 12, 0))
        .unwrap();
    assert_eq!(
        harness.schedule_phase(&web(), "launch"),
        Some(ConditionType::Completed)
    );

    let later = harness
        .reconciler
        .reconcile(&web(), utc(2026, 11, 3, 12, 0))
        .unwrap();
    assert!(later.events.is_empty());

    let stored = harness
        .store
        .list_schedules(&web())
        .unwrap()
        .into_iter()
        .find(|s| s.id == launch)
        .unwrap();
    let completed = stored
        .conditions
        .iter()
        .find(|c| c.condition_type == ConditionType::Completed)
        .unwrap();
    assert_eq!(completed.status, ConditionStatus::True);
    assert_eq!(completed.last_transition_time, utc(2026, 11, 2, 12, 0));
}

#[test]
fn test_audit_log_records_transitions() {
    let manifest = load_config(sample_config_path()).unwrap();
    let (harness, _) = Harness::new(&manifest);
    harness
        .reconciler
        .reconcile(&web(), utc(2024, 1, 8, 1, 0))
        .unwrap();

    let audits = harness.store.get_recent_audits(100).unwrap();
    assert!(audits.iter().any(|a| matches!(
        &a.event,
        AuditEventType::BoundsApplied { target, version: 1, .. } if *target == web()
    )));
    assert!(audits.iter().any(|a| matches!(
        &a.event,
        AuditEventType::ScheduleTransitioned { schedule, from: None, to: ConditionType::Progressing }
            if schedule.name() == "business-hours"
    )));
    assert!(audits.iter().any(|a| matches!(
        &a.event,
        AuditEventType::TargetTransitioned { from: None, to: ConditionType::Available, .. }
    )));
}

#[tokio::test]
async fn test_targets_reconcile_concurrently() {
    let manifest = load_config(sample_config_path()).unwrap();
    let (harness, _) = Harness::new(&manifest);
    let reconciler = Arc::new(harness.reconciler);
    let now = utc(2024, 1, 8, 1, 0);

    let handles: Vec<_> = [web(), reports()]
        .into_iter()
        .map(|target| {
            let reconciler = reconciler.clone();
            tokio::task::spawn_blocking(move || reconciler.reconcile(&target, now))
        })
        .collect();

    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert!(report.applied);
        assert_eq!(report.version, Some(1));
    }

    assert_eq!(harness.store.list_targets().unwrap().len(), 2);
    assert_eq!(
        harness.store.get_applied_bounds(&reports()).unwrap().unwrap().bounds.max_replicas,
        8
    );
}

#[test]
fn test_retry_flow_with_backoff() {
    let mut queue = WorkQueue::new();
    let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(300));
    let start = Instant::now();

    queue.add(web());
    let target = queue.pop().unwrap();

    // A conflicting write is retried after the backoff delay
    let delay = backoff.next_delay(&target);
    assert_eq!(delay, Duration::from_millis(500));
    queue.add_at(target.clone(), start + delay);
    queue.done(&target);
    assert!(queue.pop().is_none());

    // A manifest change in the meantime supersedes the pending retry
    queue.add(web());
    assert_eq!(queue.delayed_len(), 0);
    let target = queue.pop().unwrap();
    assert_eq!(backoff.next_delay(&target), Duration::from_secs(1));

    backoff.reset(&target);
    queue.add_at(target.clone(), start + Duration::from_secs(30));
    queue.done(&target);
    assert_eq!(queue.promote_due(start + Duration::from_secs(29)), 0);
    assert_eq!(queue.promote_due(start + Duration::from_secs(30)), 1);
    assert_eq!(queue.pop(), Some(web()));
}
