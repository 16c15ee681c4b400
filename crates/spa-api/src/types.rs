//! Schedule and replica bound types

use serde::{Deserialize, Serialize};
use spa_util::{ScheduleId, TargetId};

use crate::{Condition, ConditionStatus, ConditionType, find_condition};

/// Kind of time window a schedule describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleType {
    /// Every day between two wall-clock times
    Daily,
    /// A wall-clock range on a range of weekdays
    Weekly,
    /// Every year between two month/day/time points
    Monthly,
    /// A single absolute range; completes once it has passed
    OneShot,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Daily => "Daily",
            ScheduleType::Weekly => "Weekly",
            ScheduleType::Monthly => "Monthly",
            ScheduleType::OneShot => "OneShot",
        }
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An autoscaling metric target, carried through without interpretation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTarget {
    /// Metric name, used to merge metric lists from several schedules
    pub name: String,
    /// Opaque metric definition
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// Definition of one schedule window and the bounds it imposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    /// Name of the owning target, in the schedule's namespace
    pub target: String,

    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,

    pub start_time: String,
    pub end_time: String,

    /// Weekly only
    #[serde(default)]
    pub start_day_of_week: Option<String>,
    /// Weekly only
    #[serde(default)]
    pub end_day_of_week: Option<String>,

    /// IANA zone name; absent or empty means UTC
    #[serde(default)]
    pub time_zone: Option<String>,

    #[serde(default)]
    pub suspend: bool,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub min_replicas: Option<u32>,
    #[serde(default)]
    pub max_replicas: Option<u32>,
    #[serde(default)]
    pub metrics: Vec<MetricTarget>,
}

impl ScheduleSpec {
    /// Configured zone name, treating an empty string as unset
    pub fn time_zone_name(&self) -> Option<&str> {
        self.time_zone.as_deref().filter(|tz| !tz.is_empty())
    }
}

/// A stored schedule: identity, definition and last written status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub target: TargetId,
    pub spec: ScheduleSpec,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Schedule {
    pub fn new(id: ScheduleId, spec: ScheduleSpec) -> Self {
        let target = TargetId::new(id.namespace(), &spec.target);
        Self {
            id,
            target,
            spec,
            conditions: Vec::new(),
        }
    }

    /// Whether the stored status already records the window as completed
    pub fn is_completed(&self) -> bool {
        find_condition(&self.conditions, ConditionType::Completed)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}

/// Replica bounds of a target: its baseline, or what is currently applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaBounds {
    #[serde(default)]
    pub min_replicas: Option<u32>,
    pub max_replicas: u32,
    #[serde(default)]
    pub metrics: Vec<MetricTarget>,
}

/// Result of combining every active schedule of a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectiveBounds {
    /// No schedule is active; the baseline applies
    UseBaseline,
    /// At least one schedule is active
    Override {
        min_replicas: Option<u32>,
        max_replicas: Option<u32>,
        metrics: Vec<MetricTarget>,
    },
}

impl EffectiveBounds {
    /// Concrete bounds to write to the target.
    ///
    /// Fields no active schedule specified come from the baseline, and the
    /// maximum is never left below the minimum.
    pub fn resolve(&self, baseline: &ReplicaBounds) -> ReplicaBounds {
        match self {
            EffectiveBounds::UseBaseline => baseline.clone(),
            EffectiveBounds::Override {
                min_replicas,
                max_replicas,
                metrics,
            } => {
                let min_replicas = min_replicas.or(baseline.min_replicas);
                let mut max_replicas = max_replicas.unwrap_or(baseline.max_replicas);
                if let Some(min) = min_replicas {
                    max_replicas = max_replicas.max(min);
                }
                let metrics = if metrics.is_empty() {
                    baseline.metrics.clone()
                } else {
                    metrics.clone()
                };
                ReplicaBounds {
                    min_replicas,
                    max_replicas,
                    metrics,
                }
            }
        }
    }
}
