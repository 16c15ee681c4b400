//! Manifest synchronisation into the store
//!
//! Makes the stored targets and schedules match a loaded manifest and
//! reports which targets need a reconciliation pass because of it.

use spa_config::Manifest;
use spa_store::{Store, StoreResult};
use spa_util::{ScheduleId, TargetId};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// What a manifest sync changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    pub targets: usize,
    pub schedules: usize,
    /// Surviving targets whose baseline or schedules changed
    pub changed: BTreeSet<TargetId>,
    /// Targets no longer declared
    pub removed: BTreeSet<TargetId>,
}

/// Bring the store in line with `manifest`
pub fn sync_manifest(store: &dyn Store, manifest: &Manifest) -> StoreResult<SyncSummary> {
    let mut summary = SyncSummary {
        targets: manifest.targets.len(),
        schedules: manifest.schedules.len(),
        ..Default::default()
    };

    let declared_targets: HashSet<&TargetId> = manifest.targets.iter().map(|t| &t.id).collect();
    for target in &manifest.targets {
        if store.upsert_target(&target.id, &target.baseline)? {
            debug!(target = %target.id, "Target baseline changed");
            summary.changed.insert(target.id.clone());
        }
    }

    let stored_schedules: HashMap<ScheduleId, TargetId> = store
        .list_all_schedules()?
        .into_iter()
        .map(|s| (s.id, s.target))
        .collect();

    let declared_schedules: HashSet<&ScheduleId> =
        manifest.schedules.iter().map(|s| &s.id).collect();
    for schedule in &manifest.schedules {
        if store.upsert_schedule(&schedule.id, &schedule.spec)? {
            debug!(schedule = %schedule.id, "Schedule changed");
            summary.changed.insert(schedule.target());
            if let Some(previous) = stored_schedules.get(&schedule.id) {
                summary.changed.insert(previous.clone());
            }
        }
    }

    for (id, target) in &stored_schedules {
        if !declared_schedules.contains(id) && store.delete_schedule(id)? {
            debug!(schedule = %id, "Schedule removed");
            summary.changed.insert(target.clone());
        }
    }

    for id in store.list_targets()? {
        if !declared_targets.contains(&id) && store.delete_target(&id)? {
            debug!(target = %id, "Target removed");
            summary.removed.insert(id);
        }
    }

    summary.changed.retain(|id| declared_targets.contains(id));

    info!(
        targets = summary.targets,
        schedules = summary.schedules,
        changed = summary.changed.len(),
        removed = summary.removed.len(),
        "Manifest synced"
    );
    Ok(summary)
}
