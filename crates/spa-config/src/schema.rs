//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use spa_api::{MetricTarget, ScheduleSpec};
use std::path::PathBuf;

/// Namespace used when a target or schedule does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global daemon settings
    #[serde(default)]
    pub daemon: RawDaemonConfig,

    /// Scalable targets and their baseline bounds
    #[serde(default)]
    pub targets: Vec<RawTarget>,

    /// Schedule definitions
    #[serde(default)]
    pub schedules: Vec<RawSchedule>,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDaemonConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Seconds between periodic passes over every target
    pub resync_interval_seconds: Option<u64>,

    /// Maximum concurrent reconciliations
    pub workers: Option<usize>,

    /// First retry delay after a transient failure
    pub backoff_base_ms: Option<u64>,

    /// Upper bound for the retry delay
    pub backoff_max_seconds: Option<u64>,
}

/// Raw target definition
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTarget {
    pub namespace: Option<String>,
    pub name: String,
    pub min_replicas: Option<u32>,
    pub max_replicas: u32,
    #[serde(default)]
    pub metrics: Vec<MetricTarget>,
}

/// Raw schedule definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSchedule {
    pub namespace: Option<String>,
    pub name: String,
    #[serde(flatten)]
    pub spec: ScheduleSpec,
}

impl RawTarget {
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

impl RawSchedule {
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}
