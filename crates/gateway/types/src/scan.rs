//! Security scan records produced for newly registered entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityType;

/// Unique identifier for a security scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(Uuid);

impl ScanId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scan:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
}

impl ScanStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Passed | ScanStatus::Failed | ScanStatus::Error
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Info,
    Low,
    Medium,
    High,
}

/// One finding produced by a scan check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFinding {
    /// Stable machine code, e.g. `insecure-proxy-scheme`.
    pub code: String,
    pub severity: FindingSeverity,
    pub message: String,
}

/// Result of an async scan initiated on registration.
///
/// Scan records are retained after entity deletion for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityScanRecord {
    pub scan_id: ScanId,
    pub entity_path: String,
    pub entity_type: EntityType,
    pub status: ScanStatus,
    #[serde(default)]
    pub findings: Vec<ScanFinding>,
    pub scanned_at: DateTime<Utc>,
}

impl SecurityScanRecord {
    /// A freshly enqueued scan for the given entity.
    pub fn pending(entity_path: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            scan_id: ScanId::generate(),
            entity_path: entity_path.into(),
            entity_type,
            status: ScanStatus::Pending,
            findings: Vec::new(),
            scanned_at: Utc::now(),
        }
    }
}
