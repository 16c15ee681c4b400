//! Status conditions recorded on schedules and targets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition types, keyed uniquely within a condition list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    Available,
    Suspend,
    Progressing,
    Degraded,
    Completed,
}

impl ConditionType {
    /// Every condition type a schedule carries
    pub const SCHEDULE: [ConditionType; 5] = [
        ConditionType::Available,
        ConditionType::Suspend,
        ConditionType::Progressing,
        ConditionType::Degraded,
        ConditionType::Completed,
    ];

    /// Every condition type a target carries
    pub const TARGET: [ConditionType; 2] = [ConditionType::Available, ConditionType::Degraded];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Available => "Available",
            ConditionType::Suspend => "Suspend",
            ConditionType::Progressing => "Progressing",
            ConditionType::Degraded => "Degraded",
            ConditionType::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One observed aspect of an object's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// Only moves when `status` changes
    pub last_transition_time: DateTime<Utc>,
}

/// Look up a condition by type
pub fn find_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// The condition currently reporting `True`, if any
pub fn true_condition(conditions: &[Condition]) -> Option<&Condition> {
    conditions.iter().find(|c| c.status == ConditionStatus::True)
}
