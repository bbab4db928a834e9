use bridge_traits::device::JobStatus;
use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Retryable failure of an external call
    #[error("Transient external error: {0}")]
    Transient(String),

    /// Non-retryable failure of an external call
    #[error("Permanent external error: {0}")]
    Permanent(String),

    #[error("Device {device_id} failed validation: {message}")]
    PermanentValidation { device_id: String, message: String },

    #[error("Device {device_id} still missing {missing:?} after {attempts} readiness checks")]
    ReadinessTimeout {
        device_id: String,
        missing: Vec<String>,
        attempts: u32,
    },

    #[error("Creating device {device_id} failed after {attempts} attempts: {message}")]
    CreationFailed {
        device_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Deleting device {device_id} failed after {attempts} attempts: {message}")]
    DeleteFailed {
        device_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Job {job_id} did not reach a terminal status after {attempts} polls")]
    JobNotReady { job_id: String, attempts: u32 },

    #[error("Job {job_id} ended with status {status}")]
    JobFailed { job_id: String, status: JobStatus },

    #[error("Hub job quota exceeded: {0}")]
    JobQuotaExceeded(String),

    #[error("Duplicate device id {device_id} in {collection} collection")]
    DuplicateDeviceId {
        device_id: String,
        collection: String,
    },

    #[error("Fetching external page {page_index} failed: {message}")]
    PageFetch { page_index: u32, message: String },

    #[error(
        "Workflow {instance_id} diverged from its history at step {sequence}: \
         expected {expected}, found {found}"
    )]
    NonDeterministic {
        instance_id: String,
        sequence: u64,
        expected: String,
        found: String,
    },

    #[error("Effect log error: {0}")]
    EffectLog(String),

    #[error("Synchronizer is disabled")]
    Disabled,

    #[error("Reconciliation {run_id} is already in progress")]
    SyncInProgress { run_id: String },

    #[error("Unknown external registry: {0}")]
    UnknownRegistry(String),

    #[error("Staging store error: {0}")]
    Staging(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::QuotaExceeded(message) => SyncError::JobQuotaExceeded(message),
            e if e.is_transient() => SyncError::Transient(e.to_string()),
            e => SyncError::Permanent(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(error: sqlx::Error) -> Self {
        SyncError::Database(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
