//! Validated daemon settings and target/schedule manifest

use crate::schema::{RawConfig, RawDaemonConfig};
use crate::validation::ValidationError;
use spa_api::{ReplicaBounds, ScheduleSpec};
use spa_util::{ScheduleId, TargetId};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_RESYNC_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_SECONDS: u64 = 300;

/// Validated configuration ready for use by the daemon
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Daemon configuration
    pub daemon: DaemonConfig,

    /// Targets, in file order
    pub targets: Vec<TargetDefinition>,

    /// Schedules, in file order
    pub schedules: Vec<ScheduleDefinition>,

    /// Non-fatal problems found while validating
    pub warnings: Vec<ValidationError>,
}

impl Manifest {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig, warnings: Vec<ValidationError>) -> Self {
        let targets = raw
            .targets
            .into_iter()
            .map(|t| TargetDefinition {
                id: TargetId::new(t.namespace(), &t.name),
                baseline: ReplicaBounds {
                    min_replicas: t.min_replicas,
                    max_replicas: t.max_replicas,
                    metrics: t.metrics,
                },
            })
            .collect();

        let schedules = raw
            .schedules
            .into_iter()
            .map(|s| ScheduleDefinition {
                id: ScheduleId::new(s.namespace(), &s.name),
                spec: s.spec,
            })
            .collect();

        Self {
            daemon: DaemonConfig::from_raw(raw.daemon),
            targets,
            schedules,
            warnings,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub resync_interval: Duration,
    pub workers: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl DaemonConfig {
    fn from_raw(raw: RawDaemonConfig) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            resync_interval: raw
                .resync_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.resync_interval),
            workers: raw.workers.unwrap_or(defaults.workers),
            backoff_base: raw
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_max: raw
                .backoff_max_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_max),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: spa_util::default_data_dir(),
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECONDS),
            workers: DEFAULT_WORKERS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECONDS),
        }
    }
}

/// A target and its baseline bounds
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDefinition {
    pub id: TargetId,
    pub baseline: ReplicaBounds,
}

/// A schedule as declared in the manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDefinition {
    pub id: ScheduleId,
    pub spec: ScheduleSpec,
}

impl ScheduleDefinition {
    /// Target owning this schedule
    pub fn target(&self) -> TargetId {
        TargetId::new(self.id.namespace(), &self.spec.target)
    }
}
