//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::device::{
    DeviceRecord, ExternalDevicePage, ExternalDeviceRecord, JobKind, JobStatus, SyncJob,
};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::hub::{HubDevicePage, HubRegistry, JobBlob};
use bridge_traits::registry::{CreateOutcome, DeleteOutcome, ExternalRegistry};
use bridge_traits::staging::{AccessPermissions, BlobReader, StagingStore};
use bridge_traits::time::ManualClock;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_runtime::config::{RetrySettings, SyncSettings};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{Mutex, Notify};

pub const EUI: &str = "EUI";
pub const PROFILE: &str = "deviceProfileId";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

pub fn fast_retry(max_attempts: u32) -> RetrySettings {
    RetrySettings {
        initial_interval: Duration::from_secs(10),
        max_interval: Duration::from_secs(60),
        max_attempts,
        total_timeout: Duration::from_secs(24 * 60 * 60),
    }
}

pub fn settings() -> SyncSettings {
    SyncSettings::builder()
        .readiness(fast_retry(5))
        .external_call(fast_retry(3))
        .export_job_poll(fast_retry(3))
        .import_job_poll(fast_retry(3))
        .build()
        .unwrap()
}

/// Ready-to-create tag set with a valid EUI
pub fn ready_tags(eui: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (EUI.to_string(), eui.to_string()),
        (PROFILE.to_string(), "profile-1".to_string()),
    ])
}

pub fn external(name: &str) -> ExternalDeviceRecord {
    ExternalDeviceRecord::new(json!({
        "name": name,
        "EUI": format!("{:0>16}", name),
        "deviceProfileId": "profile-1",
        "ref": format!("ref-{}", name),
    }))
}

pub fn hub_device(id: &str) -> DeviceRecord {
    DeviceRecord::new(id).with_tag(EUI, format!("{:0>16}", id))
}

fn bridge_result(call: Scripted) -> BridgeResult<()> {
    match call {
        Scripted::Ok => Ok(()),
        Scripted::AlreadyExists => Err(BridgeError::AlreadyExists("scripted".into())),
        Scripted::NotFound => Err(BridgeError::NotFound("scripted".into())),
        Scripted::Transient => Err(BridgeError::Transient("scripted".into())),
        Scripted::Permanent => Err(BridgeError::Permanent("scripted".into())),
        Scripted::Quota => Err(BridgeError::QuotaExceeded("scripted".into())),
    }
}

/// Scripted response of one remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Ok,
    AlreadyExists,
    NotFound,
    Transient,
    Permanent,
    Quota,
}

// ============================================================================
// Staging
// ============================================================================

#[derive(Default)]
pub struct MemoryStaging {
    containers: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    pub deleted_containers: Mutex<Vec<String>>,
}

impl MemoryStaging {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn blob(&self, container: &str, blob: &str) -> Option<String> {
        self.containers
            .lock()
            .await
            .get(container)
            .and_then(|blobs| blobs.get(blob))
            .map(|data| String::from_utf8_lossy(data).to_string())
    }

    pub async fn has_container(&self, container: &str) -> bool {
        self.containers.lock().await.contains_key(container)
    }

    pub async fn blob_names(&self, container: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .containers
            .lock()
            .await
            .get(container)
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub async fn write(&self, container: &str, blob: &str, data: &str) {
        self.containers
            .lock()
            .await
            .entry(container.to_string())
            .or_default()
            .insert(blob.to_string(), data.as_bytes().to_vec());
    }
}

/// Container named by an access URI of the form `memory://{container}?...`
pub fn container_of(uri: &str) -> String {
    uri.trim_start_matches("memory://")
        .split('?')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl StagingStore for MemoryStaging {
    async fn create_container(&self, container: &str) -> BridgeResult<()> {
        self.containers
            .lock()
            .await
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn put_blob(&self, container: &str, blob: &str, data: Bytes) -> BridgeResult<()> {
        let mut containers = self.containers.lock().await;
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| BridgeError::NotFound(format!("container {}", container)))?;
        blobs.insert(blob.to_string(), data.to_vec());
        Ok(())
    }

    async fn append_blob(&self, container: &str, blob: &str, data: Bytes) -> BridgeResult<()> {
        let mut containers = self.containers.lock().await;
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| BridgeError::NotFound(format!("container {}", container)))?;
        blobs.entry(blob.to_string()).or_default().extend_from_slice(&data);
        Ok(())
    }

    async fn open_blob(&self, container: &str, blob: &str) -> BridgeResult<BlobReader> {
        let data = self
            .containers
            .lock()
            .await
            .get(container)
            .and_then(|blobs| blobs.get(blob))
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("{}/{}", container, blob)))?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn generate_access_uri(
        &self,
        container: &str,
        permissions: AccessPermissions,
        expires_at: DateTime<Utc>,
    ) -> BridgeResult<String> {
        Ok(format!(
            "memory://{}?sp={}&se={}",
            container,
            permissions.as_flags(),
            expires_at.timestamp()
        ))
    }

    async fn delete_container(&self, container: &str) -> BridgeResult<()> {
        self.containers.lock().await.remove(container);
        self.deleted_containers
            .lock()
            .await
            .push(container.to_string());
        Ok(())
    }
}

// ============================================================================
// Hub
// ============================================================================

pub struct FakeHub {
    staging: Arc<MemoryStaging>,
    pub devices: Mutex<BTreeMap<String, DeviceRecord>>,
    /// Scripted `get_device_tags` answers; the stored device is used once empty
    tag_answers: Mutex<VecDeque<Option<BTreeMap<String, String>>>>,
    /// Status sequence per job kind; the last one repeats
    job_statuses: Mutex<HashMap<JobKind, VecDeque<JobStatus>>>,
    jobs: Mutex<HashMap<String, JobKind>>,
    export_submission: Mutex<Scripted>,
    export_gate: Mutex<Option<Arc<Notify>>>,
    /// Lines read from the import blob when the import job was submitted
    pub imported: Mutex<Vec<DeviceRecord>>,
    pub updated: Mutex<Vec<DeviceRecord>>,
    failing_ids: Mutex<Vec<String>>,
    pub export_submissions: AtomicU32,
    pub import_submissions: AtomicU32,
    pub tag_reads: AtomicU32,
    pub job_polls: AtomicU32,
    pub listings: AtomicU32,
}

impl FakeHub {
    pub fn new(staging: Arc<MemoryStaging>, devices: Vec<DeviceRecord>) -> Arc<Self> {
        Arc::new(Self {
            staging,
            devices: Mutex::new(devices.into_iter().map(|d| (d.id.clone(), d)).collect()),
            tag_answers: Mutex::new(VecDeque::new()),
            job_statuses: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            export_submission: Mutex::new(Scripted::Ok),
            export_gate: Mutex::new(None),
            imported: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
            failing_ids: Mutex::new(Vec::new()),
            export_submissions: AtomicU32::new(0),
            import_submissions: AtomicU32::new(0),
            tag_reads: AtomicU32::new(0),
            job_polls: AtomicU32::new(0),
            listings: AtomicU32::new(0),
        })
    }

    pub async fn script_tags(&self, answers: Vec<Option<BTreeMap<String, String>>>) {
        *self.tag_answers.lock().await = answers.into();
    }

    pub async fn script_job(&self, kind: JobKind, statuses: Vec<JobStatus>) {
        self.job_statuses.lock().await.insert(kind, statuses.into());
    }

    pub async fn script_export_submission(&self, call: Scripted) {
        *self.export_submission.lock().await = call;
    }

    /// Block export submissions until the returned gate is notified.
    pub async fn gate_export(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.export_gate.lock().await = Some(gate.clone());
        gate
    }

    /// Device operations on these ids fail permanently.
    pub async fn fail_devices(&self, ids: &[&str]) {
        *self.failing_ids.lock().await = ids.iter().map(|id| id.to_string()).collect();
    }

    pub async fn device_ids(&self) -> Vec<String> {
        self.devices.lock().await.keys().cloned().collect()
    }

    async fn check_failing(&self, device_id: &str) -> BridgeResult<()> {
        if self.failing_ids.lock().await.iter().any(|id| id == device_id) {
            return Err(BridgeError::Permanent(format!("{} rejected", device_id)));
        }
        Ok(())
    }

    async fn new_job(&self, kind: JobKind) -> SyncJob {
        let mut jobs = self.jobs.lock().await;
        let job_id = format!("{:?}-{}", kind, jobs.len() + 1).to_lowercase();
        jobs.insert(job_id.clone(), kind);
        SyncJob::new(job_id, kind)
    }
}

#[async_trait]
impl HubRegistry for FakeHub {
    async fn list_devices(
        &self,
        continuation: Option<String>,
        page_size: usize,
    ) -> BridgeResult<HubDevicePage> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let devices: Vec<DeviceRecord> = self.devices.lock().await.values().cloned().collect();
        let start: usize = continuation.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + page_size).min(devices.len());
        Ok(HubDevicePage {
            devices: devices[start..end].to_vec(),
            continuation: (end < devices.len()).then(|| end.to_string()),
        })
    }

    async fn submit_export_job(&self, output: &JobBlob) -> BridgeResult<SyncJob> {
        self.export_submissions.fetch_add(1, Ordering::SeqCst);
        let gate = self.export_gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        bridge_result(*self.export_submission.lock().await)?;

        let mut lines = String::from("Export started\n");
        for device in self.devices.lock().await.values() {
            lines.push_str(&serde_json::to_string(device).unwrap());
            lines.push('\n');
        }
        self.staging
            .write(&container_of(&output.container_uri), &output.blob_name, &lines)
            .await;
        Ok(self.new_job(JobKind::Export).await)
    }

    async fn submit_import_job(&self, input: &JobBlob, _output: &JobBlob) -> BridgeResult<SyncJob> {
        self.import_submissions.fetch_add(1, Ordering::SeqCst);
        let reader = self
            .staging
            .open_blob(&container_of(&input.container_uri), &input.blob_name)
            .await?;
        let mut lines = reader.lines();
        let mut imported = Vec::new();
        while let Some(line) = lines.next_line().await? {
            imported.push(serde_json::from_str(&line).unwrap());
        }
        *self.imported.lock().await = imported;
        Ok(self.new_job(JobKind::Import).await)
    }

    async fn get_job(&self, job_id: &str) -> BridgeResult<SyncJob> {
        self.job_polls.fetch_add(1, Ordering::SeqCst);
        let kind = *self
            .jobs
            .lock()
            .await
            .get(job_id)
            .ok_or_else(|| BridgeError::NotFound(job_id.to_string()))?;

        let mut statuses = self.job_statuses.lock().await;
        let status = match statuses.get_mut(&kind) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(JobStatus::Succeeded),
            Some(queue) => queue.front().copied().unwrap_or(JobStatus::Succeeded),
            None => JobStatus::Succeeded,
        };

        let mut job = SyncJob::new(job_id, kind);
        job.status = status;
        Ok(job)
    }

    async fn get_device(&self, device_id: &str) -> BridgeResult<Option<DeviceRecord>> {
        Ok(self.devices.lock().await.get(device_id).cloned())
    }

    async fn create_device(&self, device: &DeviceRecord) -> BridgeResult<CreateOutcome> {
        self.check_failing(&device.id).await?;
        let mut devices = self.devices.lock().await;
        if devices.contains_key(&device.id) {
            return Ok(CreateOutcome::AlreadyExisted);
        }
        devices.insert(device.id.clone(), device.clone());
        Ok(CreateOutcome::Created)
    }

    async fn delete_device(&self, device_id: &str) -> BridgeResult<DeleteOutcome> {
        self.check_failing(device_id).await?;
        Ok(match self.devices.lock().await.remove(device_id) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyAbsent,
        })
    }

    async fn update_device(&self, device: &DeviceRecord) -> BridgeResult<()> {
        self.check_failing(&device.id).await?;
        self.devices
            .lock()
            .await
            .insert(device.id.clone(), device.clone());
        self.updated.lock().await.push(device.clone());
        Ok(())
    }

    async fn get_device_tags(&self, device_id: &str) -> BridgeResult<Option<BTreeMap<String, String>>> {
        self.tag_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(answer) = self.tag_answers.lock().await.pop_front() {
            return Ok(answer);
        }
        Ok(self
            .devices
            .lock()
            .await
            .get(device_id)
            .map(|device| device.tags.clone()))
    }
}

// ============================================================================
// External registry
// ============================================================================

pub struct FakeRegistry {
    pages: Mutex<Vec<Vec<ExternalDeviceRecord>>>,
    /// Every page reports `has_more` and carries one record
    endless: bool,
    /// Clock advanced on every page fetch
    page_latency: Option<(Arc<ManualClock>, chrono::Duration)>,
    failing_page: Mutex<Option<u32>>,
    create_script: Mutex<VecDeque<Scripted>>,
    delete_script: Mutex<VecDeque<Scripted>>,
    pub created: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    pub deleted: Mutex<Vec<String>>,
    pub page_fetches: AtomicU32,
    pub create_calls: AtomicU32,
    pub delete_calls: AtomicU32,
}

impl FakeRegistry {
    pub fn with_pages(pages: Vec<Vec<ExternalDeviceRecord>>) -> Self {
        Self {
            pages: Mutex::new(pages),
            endless: false,
            page_latency: None,
            failing_page: Mutex::new(None),
            create_script: Mutex::new(VecDeque::new()),
            delete_script: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            page_fetches: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
        }
    }

    pub fn new() -> Self {
        Self::with_pages(Vec::new())
    }

    pub fn endless(clock: Arc<ManualClock>, latency: chrono::Duration) -> Self {
        Self {
            endless: true,
            page_latency: Some((clock, latency)),
            ..Self::new()
        }
    }

    pub fn with_latency(mut self, clock: Arc<ManualClock>, latency: chrono::Duration) -> Self {
        self.page_latency = Some((clock, latency));
        self
    }

    pub async fn fail_page(&self, page_index: u32) {
        *self.failing_page.lock().await = Some(page_index);
    }

    pub async fn script_create(&self, calls: Vec<Scripted>) {
        *self.create_script.lock().await = calls.into();
    }

    pub async fn script_delete(&self, calls: Vec<Scripted>) {
        *self.delete_script.lock().await = calls.into();
    }
}

#[async_trait]
impl ExternalRegistry for FakeRegistry {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_page(&self, page_index: u32) -> BridgeResult<ExternalDevicePage> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, latency)) = &self.page_latency {
            clock.advance(*latency);
        }
        if *self.failing_page.lock().await == Some(page_index) {
            return Err(BridgeError::Transient(format!("page {} timed out", page_index)));
        }
        if self.endless {
            return Ok(ExternalDevicePage {
                records: vec![external(&format!("endless-{}", page_index))],
                has_more: true,
            });
        }

        let pages = self.pages.lock().await;
        Ok(match pages.get(page_index as usize) {
            Some(records) => ExternalDevicePage {
                records: records.clone(),
                has_more: !records.is_empty(),
            },
            None => ExternalDevicePage::empty(),
        })
    }

    async fn create(
        &self,
        device_id: &str,
        properties: &BTreeMap<String, String>,
    ) -> BridgeResult<CreateOutcome> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let call = self.create_script.lock().await.pop_front().unwrap_or(Scripted::Ok);
        bridge_result(call)?;
        self.created
            .lock()
            .await
            .push((device_id.to_string(), properties.clone()));
        Ok(CreateOutcome::Created)
    }

    async fn delete(&self, device: &DeviceRecord) -> BridgeResult<DeleteOutcome> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let call = self.delete_script.lock().await.pop_front().unwrap_or(Scripted::Ok);
        bridge_result(call)?;
        self.deleted.lock().await.push(device.id.clone());
        Ok(DeleteOutcome::Deleted)
    }

    fn extract_device_id(&self, record: &ExternalDeviceRecord) -> BridgeResult<String> {
        record
            .get_str("name")
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Permanent("record has no name".into()))
    }

    fn required_properties(&self) -> Vec<String> {
        vec![EUI.to_string(), PROFILE.to_string()]
    }

    fn validate_properties(&self, properties: &BTreeMap<String, String>) -> BridgeResult<()> {
        match properties.get(EUI) {
            Some(eui) if eui.chars().count() == 16 => Ok(()),
            _ => Err(BridgeError::Permanent(
                "Property EUI should have 16 characters".into(),
            )),
        }
    }

    fn to_hub_device(&self, record: &ExternalDeviceRecord) -> BridgeResult<DeviceRecord> {
        let mut device = DeviceRecord::new(self.extract_device_id(record)?);
        for name in self.required_properties() {
            if let Some(value) = record.get_str(&name) {
                device.tags.insert(name, value.to_string());
            }
        }
        Ok(device)
    }
}
