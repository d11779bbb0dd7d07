//! Health state published by the monitoring supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::namespace::Namespace;

/// Probe-driven liveness state of a registrable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// No probe has completed yet.
    Unknown,
    Healthy,
    Unhealthy,
    /// Target removed or its entity disabled; probing stopped.
    Disabled,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Health subrecord persisted on the entity and merged into read snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub state: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ok_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub consecutive_successes: u32,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            last_probe_at: None,
            last_ok_at: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }
}

/// A state transition emitted on the supervisor's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub namespace: Namespace,
    pub entity_type: EntityType,
    pub path: String,
    pub previous: HealthState,
    pub current: HealthState,
    pub at: DateTime<Utc>,
}
