//! Shared device and job model.
//!
//! Value types exchanged between the hub, the external registry and the
//! staging store. The staging representation of a [`DeviceRecord`] is one
//! JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::BridgeError;

// ============================================================================
// Hub Devices
// ============================================================================

/// Hub-side device status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Enabled,
    Disabled,
}

/// What an import batch should do with a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    #[default]
    None,
    Create,
    Delete,
}

/// Symmetric key pair provisioned for a new hub device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricKeys {
    pub primary_key: String,
    pub secondary_key: String,
}

/// A device as known to the hub registry.
///
/// Identity is the `id`; comparisons between registries are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub change_kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<SymmetricKeys>,
}

impl DeviceRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tags: BTreeMap::new(),
            status: DeviceStatus::Enabled,
            status_reason: None,
            change_kind: ChangeKind::None,
            authentication: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_change_kind(mut self, kind: ChangeKind) -> Self {
        self.change_kind = kind;
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

// ============================================================================
// External Devices
// ============================================================================

/// Opaque record returned by the external registry.
///
/// Only the registry adapter knows how to interpret it; everyone else treats
/// it as a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalDeviceRecord(Value);

impl ExternalDeviceRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// String value of a top-level property, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for ExternalDeviceRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// One page of external registry records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalDevicePage {
    pub records: Vec<ExternalDeviceRecord>,
    pub has_more: bool,
}

impl ExternalDevicePage {
    /// The final, empty page.
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            has_more: false,
        }
    }
}

// ============================================================================
// Bulk Jobs
// ============================================================================

/// Kind of hub-side bulk job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Export,
    Import,
}

/// Status of a hub-side bulk job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

impl JobStatus {
    /// Terminal statuses end polling immediately
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Non-terminal statuses are worth polling again
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for JobStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" | "queued" | "enqueued" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" | "completed" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "unknown" => Ok(JobStatus::Unknown),
            _ => Err(BridgeError::OperationFailed(format!(
                "Invalid job status: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A submitted hub-side bulk job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
}

impl SyncJob {
    pub fn new(job_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            status: JobStatus::Pending,
        }
    }
}
