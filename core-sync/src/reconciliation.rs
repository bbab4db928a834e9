//! # Reconciliation Orchestrator
//!
//! Full resynchronization of the hub against the external registry.
//!
//! ## Workflow
//!
//! 1. Create the run's staging container (named after the run id)
//! 2. Optionally submit a hub export job writing `devices.txt`
//! 3. Copy external registry pages into staging, one bounded
//!    [`PagedBulkTransfer`] invocation per effect, until exhausted
//! 4. Wait for the export job
//! 5. Diff external against hub devices and stage the change set as
//!    `devices-to-import.txt`
//! 6. Apply: a hub import job when the change volume reaches the configured
//!    threshold, otherwise per-device manual batches
//! 7. Delete the staging container
//!
//! Any failure in steps 1-6 aborts the run without applying a partial change
//! set and leaves the container in place. In the manual path, failures of
//! single devices are counted and never abort the run.

use bridge_traits::device::{ChangeKind, DeviceRecord, DeviceStatus, SyncJob};
use bridge_traits::hub::{HubRegistry, JobBlob};
use bridge_traits::registry::{CreateOutcome, DeleteOutcome, ExternalRegistry};
use bridge_traits::staging::{AccessPermissions, StagingStore};
use bridge_traits::time::Clock;
use core_runtime::config::{
    SyncSettings, EXPORT_ACCESS_WINDOW, IMPORT_ACCESS_WINDOW, IMPORT_GRACE_DELAY,
    MANUAL_BATCH_SIZE, PAGE_RETRIEVAL_BUDGET,
};
use core_runtime::events::{CoreEvent, DeviceEvent, EventBus, ReconciliationEvent};
use futures::TryFutureExt;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::differ::{ChangeSetSummary, DeviceSetDiffer};
use crate::error::{Result, SyncError};
use crate::job_poller::JobPoller;
use crate::retry::RetryPolicy;
use crate::transfer::{
    list_hub_devices, read_lines, read_range, staging_error, write_import_batch, PageCursor,
    PageTransferResult, PagedBulkTransfer, EXPORT_BLOB, IMPORT_BLOB, IMPORT_RESULTS_BLOB,
};
use crate::workflow::{EffectError, WorkflowContext};

/// Status reason recorded on soft-deleted hub devices
pub const SOFT_DELETE_REASON: &str = "Deleted by external system";

/// Outcome of one manual batch effect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchApplyResult {
    /// Lines read from the import batch
    pub lines: u64,
    pub created: u64,
    pub deleted: u64,
    /// Idempotent no-ops and lines without a change kind
    pub skipped: u64,
    pub failed_device_ids: Vec<String>,
}

impl BatchApplyResult {
    fn absorb(&mut self, other: BatchApplyResult) {
        self.lines += other.lines;
        self.created += other.created;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed_device_ids.extend(other.failed_device_ids);
    }
}

/// How the staged change set was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyMode {
    NoChanges,
    ImportJob { job_id: String },
    Manual(BatchApplyResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub run_id: String,
    pub external_devices: u64,
    pub pages_fetched: u32,
    pub changes: ChangeSetSummary,
    pub apply: ApplyMode,
}

/// Top-level bulk workflow.
#[derive(Clone)]
pub struct ReconciliationOrchestrator {
    hub: Arc<dyn HubRegistry>,
    registry: Arc<dyn ExternalRegistry>,
    staging: Arc<dyn StagingStore>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    page_budget: Duration,
    event_bus: Option<EventBus>,
}

impl ReconciliationOrchestrator {
    pub fn new(
        hub: Arc<dyn HubRegistry>,
        registry: Arc<dyn ExternalRegistry>,
        staging: Arc<dyn StagingStore>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            hub,
            registry,
            staging,
            clock,
            settings,
            page_budget: PAGE_RETRIEVAL_BUDGET,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_page_budget(mut self, budget: Duration) -> Self {
        self.page_budget = budget;
        self
    }

    #[instrument(skip(self, ctx), fields(run_id = %ctx.instance_id()))]
    pub async fn run(&self, ctx: &mut WorkflowContext) -> Result<ReconciliationReport> {
        let run_id = ctx.instance_id().to_string();
        if !ctx.is_replaying() {
            info!(use_export_job = self.settings.use_export_job, "Reconciliation started");
        }
        self.emit(
            ctx,
            ReconciliationEvent::Started {
                run_id: run_id.clone(),
                use_export_job: self.settings.use_export_job,
            },
        );

        match self.execute(ctx, &run_id).await {
            Ok(report) => {
                if !ctx.is_replaying() {
                    info!(
                        external_devices = report.external_devices,
                        creates = report.changes.creates,
                        deletes = report.changes.deletes,
                        "Reconciliation completed"
                    );
                }
                let import_job_id = match &report.apply {
                    ApplyMode::ImportJob { job_id } => Some(job_id.clone()),
                    _ => None,
                };
                self.emit(
                    ctx,
                    ReconciliationEvent::Completed {
                        run_id,
                        external_devices: report.external_devices,
                        creates: report.changes.creates,
                        deletes: report.changes.deletes,
                        import_job_id,
                    },
                );
                Ok(report)
            }
            Err(e) => {
                if !ctx.is_replaying() {
                    error!(error = %e, "Reconciliation failed");
                }
                self.emit(
                    ctx,
                    ReconciliationEvent::Failed {
                        run_id,
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        run_id: &str,
    ) -> Result<ReconciliationReport> {
        let container = run_id;

        ctx.call("create_staging_container", || async {
            self.staging
                .create_container(container)
                .await
                .map_err(|e| EffectError::from(staging_error(container, e)))
        })
        .await??;

        let export_job = if self.settings.use_export_job {
            Some(self.submit_export_job(ctx, container).await?)
        } else {
            None
        };

        let cursor = self.retrieve_pages(ctx, container).await?;
        self.emit(
            ctx,
            ReconciliationEvent::PagesRetrieved {
                run_id: run_id.to_string(),
                last_page_index: cursor.last_page_index.unwrap_or(0),
                items_processed: cursor.items_processed,
            },
        );

        if let Some(job) = &export_job {
            let policy = RetryPolicy::from(self.settings.export_job_poll);
            self.await_job(ctx, run_id, &job.job_id, &policy).await?;
        }

        let pages = cursor.fetched_pages();
        let changes: ChangeSetSummary = ctx
            .call("stage_device_changes", || async {
                self.stage_changes(container, pages)
                    .await
                    .map_err(EffectError::from)
            })
            .await??;

        if !ctx.is_replaying() {
            info!(
                creates = changes.creates,
                deletes = changes.deletes,
                "Change set staged"
            );
        }

        let apply = self.apply_changes(ctx, run_id, changes).await?;

        ctx.call("delete_staging_container", || async {
            self.staging
                .delete_container(container)
                .await
                .map_err(|e| EffectError::from(staging_error(container, e)))
        })
        .await??;

        Ok(ReconciliationReport {
            run_id: run_id.to_string(),
            external_devices: cursor.items_processed,
            pages_fetched: cursor.fetched_pages().len() as u32,
            changes,
            apply,
        })
    }

    async fn submit_export_job(&self, ctx: &mut WorkflowContext, container: &str) -> Result<SyncJob> {
        let job: SyncJob = ctx
            .call("submit_export_job", || async {
                let expires_at = self.clock.now() + window(EXPORT_ACCESS_WINDOW);
                let container_uri = self
                    .staging
                    .generate_access_uri(container, AccessPermissions::READ_WRITE_DELETE, expires_at)
                    .await?;
                self.hub
                    .submit_export_job(&JobBlob {
                        container_uri,
                        blob_name: EXPORT_BLOB.to_string(),
                    })
                    .await
            }
            .map_err(EffectError::from))
            .await??;

        if !ctx.is_replaying() {
            info!(job_id = %job.job_id, "Export job submitted");
        }
        Ok(job)
    }

    async fn retrieve_pages(&self, ctx: &mut WorkflowContext, container: &str) -> Result<PageCursor> {
        let transfer = PagedBulkTransfer::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.staging),
            Arc::clone(&self.clock),
        )
        .with_budget(self.page_budget);
        let mut cursor = PageCursor::default();

        loop {
            let start_page = cursor.next_page;
            let result: PageTransferResult = ctx
                .call(&format!("retrieve_external_pages:{}", start_page), || async {
                    transfer
                        .retrieve(container, start_page)
                        .await
                        .map_err(EffectError::from)
                })
                .await??;
            cursor.advance(&result);

            if !ctx.is_replaying() {
                info!(
                    start_page,
                    last_page_index = result.last_page_index,
                    items = result.items_processed,
                    has_more = result.has_more,
                    "External pages retrieved"
                );
            }
            if !result.has_more {
                return Ok(cursor);
            }
        }
    }

    async fn await_job(
        &self,
        ctx: &mut WorkflowContext,
        run_id: &str,
        job_id: &str,
        policy: &RetryPolicy,
    ) -> Result<()> {
        let poller = JobPoller::new(Arc::clone(&self.hub));
        match poller.wait_for_completion(ctx, job_id, policy).await {
            Err(SyncError::JobNotReady { job_id, attempts }) => {
                self.emit(
                    ctx,
                    ReconciliationEvent::JobNotComplete {
                        run_id: run_id.to_string(),
                        job_id: job_id.clone(),
                    },
                );
                Err(SyncError::JobNotReady { job_id, attempts })
            }
            Err(SyncError::JobFailed { job_id, status }) => {
                self.emit(
                    ctx,
                    ReconciliationEvent::JobFailed {
                        run_id: run_id.to_string(),
                        job_id: job_id.clone(),
                        status: status.to_string(),
                    },
                );
                Err(SyncError::JobFailed { job_id, status })
            }
            other => other,
        }
    }

    /// Diff staged external pages against the hub and write the import batch.
    async fn stage_changes(&self, container: &str, pages: Range<u32>) -> Result<ChangeSetSummary> {
        let destination = if self.settings.use_export_job {
            let mut devices = Vec::new();
            read_lines(self.staging.as_ref(), container, EXPORT_BLOB, |device: DeviceRecord| {
                devices.push(device);
                Ok(())
            })
            .await?;
            devices
        } else {
            list_hub_devices(self.hub.as_ref()).await?
        };

        let mut differ = DeviceSetDiffer::new(destination)?;
        let registry = Arc::clone(&self.registry);
        let transfer = PagedBulkTransfer::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.staging),
            Arc::clone(&self.clock),
        );
        transfer
            .for_each_staged(container, pages, |record| {
                let device_id = registry.extract_device_id(&record)?;
                differ.observe(&device_id, || {
                    registry.to_hub_device(&record).map_err(SyncError::from)
                })
            })
            .await?;

        let diff = differ.finish();
        let summary = diff.summary();
        write_import_batch(self.staging.as_ref(), container, diff).await?;
        Ok(summary)
    }

    async fn apply_changes(
        &self,
        ctx: &mut WorkflowContext,
        run_id: &str,
        changes: ChangeSetSummary,
    ) -> Result<ApplyMode> {
        let total = changes.total();
        if total == 0 {
            return Ok(ApplyMode::NoChanges);
        }

        let threshold = self.settings.change_job_threshold as u64;
        if threshold == 0 || threshold <= total {
            self.apply_with_import_job(ctx, run_id).await
        } else {
            self.apply_manually(ctx, run_id).await
        }
    }

    async fn apply_with_import_job(
        &self,
        ctx: &mut WorkflowContext,
        run_id: &str,
    ) -> Result<ApplyMode> {
        let container = run_id;
        let job: SyncJob = ctx
            .call("submit_import_job", || async {
                let expires_at = self.clock.now() + window(IMPORT_ACCESS_WINDOW);
                let container_uri = self
                    .staging
                    .generate_access_uri(container, AccessPermissions::READ_WRITE_DELETE, expires_at)
                    .await?;
                let input = JobBlob {
                    container_uri: container_uri.clone(),
                    blob_name: IMPORT_BLOB.to_string(),
                };
                let output = JobBlob {
                    container_uri,
                    blob_name: IMPORT_RESULTS_BLOB.to_string(),
                };
                self.hub.submit_import_job(&input, &output).await
            }
            .map_err(EffectError::from))
            .await??;

        if !ctx.is_replaying() {
            info!(job_id = %job.job_id, "Import job submitted");
        }

        ctx.sleep(IMPORT_GRACE_DELAY).await?;
        let policy = RetryPolicy::from(self.settings.import_job_poll);
        self.await_job(ctx, run_id, &job.job_id, &policy).await?;

        Ok(ApplyMode::ImportJob { job_id: job.job_id })
    }

    async fn apply_manually(&self, ctx: &mut WorkflowContext, run_id: &str) -> Result<ApplyMode> {
        let container = run_id;
        let mut summary = BatchApplyResult::default();
        let mut offset = 0;

        loop {
            let batch: BatchApplyResult = ctx
                .call(&format!("apply_manual_batch:{}", offset), || async {
                    self.apply_batch(container, offset)
                        .await
                        .map_err(EffectError::from)
                })
                .await??;

            let lines = batch.lines as usize;
            if !ctx.is_replaying() && !batch.failed_device_ids.is_empty() {
                warn!(
                    offset,
                    failed = batch.failed_device_ids.len(),
                    "Manual batch had per-device failures"
                );
            }
            summary.absorb(batch);

            if lines < MANUAL_BATCH_SIZE {
                break;
            }
            offset += MANUAL_BATCH_SIZE;
        }

        Ok(ApplyMode::Manual(summary))
    }

    async fn apply_batch(&self, container: &str, offset: usize) -> Result<BatchApplyResult> {
        let devices: Vec<DeviceRecord> =
            read_range(self.staging.as_ref(), container, IMPORT_BLOB, offset, MANUAL_BATCH_SIZE)
                .await?;
        let mut result = BatchApplyResult {
            lines: devices.len() as u64,
            ..Default::default()
        };

        for device in devices {
            match device.change_kind {
                ChangeKind::Create => self.apply_create(device, &mut result).await,
                ChangeKind::Delete => self.apply_delete(device, &mut result).await,
                ChangeKind::None => result.skipped += 1,
            }
        }

        Ok(result)
    }

    async fn apply_create(&self, device: DeviceRecord, result: &mut BatchApplyResult) {
        let device = device.with_change_kind(ChangeKind::None);
        match self.hub.create_device(&device).await {
            Ok(CreateOutcome::Created) => {
                result.created += 1;
                self.publish(DeviceEvent::HubDeviceCreated {
                    device_id: device.id,
                });
            }
            Ok(CreateOutcome::AlreadyExisted) => result.skipped += 1,
            Err(e) if e.is_already_exists() => result.skipped += 1,
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "Hub device creation failed");
                result.failed_device_ids.push(device.id);
            }
        }
    }

    async fn apply_delete(&self, device: DeviceRecord, result: &mut BatchApplyResult) {
        let soft = self.settings.soft_delete;
        let applied = if soft {
            let mut disabled = device.clone().with_change_kind(ChangeKind::None);
            disabled.status = DeviceStatus::Disabled;
            disabled.status_reason = Some(SOFT_DELETE_REASON.to_string());
            self.hub.update_device(&disabled).await.map(|_| true)
        } else {
            match self.hub.delete_device(&device.id).await {
                Ok(outcome) => Ok(outcome == DeleteOutcome::Deleted),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            }
        };

        match applied {
            Ok(true) => {
                result.deleted += 1;
                self.publish(DeviceEvent::HubDeviceDeleted {
                    device_id: device.id,
                    soft,
                });
            }
            Ok(false) => result.skipped += 1,
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "Hub device deletion failed");
                result.failed_device_ids.push(device.id);
            }
        }
    }

    fn emit(&self, ctx: &WorkflowContext, event: ReconciliationEvent) {
        if let (Some(bus), false) = (&self.event_bus, ctx.is_replaying()) {
            bus.emit(CoreEvent::Reconciliation(event));
        }
    }

    /// Events raised from inside an effect
    fn publish(&self, event: DeviceEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Device(event));
        }
    }
}

fn window(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(1))
}
