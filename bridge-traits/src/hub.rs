//! Hub Registry Capability
//!
//! The primary registry: device CRUD, tag metadata and asynchronous bulk
//! export/import jobs that read and write through the staging store.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::device::{DeviceRecord, SyncJob};
use crate::error::Result;
use crate::registry::{CreateOutcome, DeleteOutcome};

/// One page of a direct device listing
#[derive(Debug, Clone, Default)]
pub struct HubDevicePage {
    pub devices: Vec<DeviceRecord>,
    /// Token for the next page; `None` on the last page
    pub continuation: Option<String>,
}

/// Location of a bulk job's input or output blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBlob {
    /// Time-boxed access URI for the staging container
    pub container_uri: String,
    pub blob_name: String,
}

/// Hub registry trait
///
/// `submit_*_job` return [`BridgeError::QuotaExceeded`](crate::error::BridgeError::QuotaExceeded)
/// when the hub refuses another concurrent job.
#[async_trait]
pub trait HubRegistry: Send + Sync {
    /// List devices directly, one page at a time
    async fn list_devices(
        &self,
        continuation: Option<String>,
        page_size: usize,
    ) -> Result<HubDevicePage>;

    /// Start an export of every device into `output`
    async fn submit_export_job(&self, output: &JobBlob) -> Result<SyncJob>;

    /// Start an import reading line-delimited device changes from `input`
    async fn submit_import_job(&self, input: &JobBlob, output: &JobBlob) -> Result<SyncJob>;

    /// Current state of a submitted job
    async fn get_job(&self, job_id: &str) -> Result<SyncJob>;

    /// Point lookup of one hub device, `None` when absent.
    ///
    /// Not used by the bulk or per-device workflows; hosts call it to check a
    /// device before dispatching a lifecycle event.
    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>>;

    async fn create_device(&self, device: &DeviceRecord) -> Result<CreateOutcome>;

    async fn delete_device(&self, device_id: &str) -> Result<DeleteOutcome>;

    /// Replace status and tags of an existing device
    async fn update_device(&self, device: &DeviceRecord) -> Result<()>;

    /// Twin-style tag metadata; `None` when the device does not exist yet
    async fn get_device_tags(&self, device_id: &str) -> Result<Option<BTreeMap<String, String>>>;
}
