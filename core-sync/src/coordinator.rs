//! # Sync Coordinator
//!
//! Entry point wiring the orchestrators to their collaborators.
//!
//! ## Overview
//!
//! The `SyncCoordinator` owns the explicit [`SyncSettings`] and the injected
//! capabilities, and:
//! - runs full reconciliations, one at a time
//! - dispatches incremental hub lifecycle events, applying them directly
//!   when possible and falling back to durable per-device workflows
//! - fans out bulk deletes with per-device failure isolation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{DeviceLifecycleEvent, SyncCoordinator};
//!
//! # async fn example(coordinator: SyncCoordinator) -> core_sync::Result<()> {
//! let report = coordinator.reconcile().await?;
//! println!("{} creates, {} deletes", report.changes.creates, report.changes.deletes);
//!
//! coordinator
//!     .handle_event(DeviceLifecycleEvent::Deleted {
//!         device_id: "dev-1".to_string(),
//!         tags: Default::default(),
//!     })
//!     .await;
//! # Ok(())
//! # }
//! ```

use bridge_traits::device::DeviceRecord;
use bridge_traits::hub::HubRegistry;
use bridge_traits::registry::{CreateOutcome, DeleteOutcome, ExternalRegistry};
use bridge_traits::staging::StagingStore;
use bridge_traits::time::{Clock, Timer};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, DeviceEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::device_workflows::{
    DeviceDeleteOrchestrator, DeviceDeleteReport, DeviceSyncOrchestrator, DeviceSyncReport,
};
use crate::error::{Result, SyncError};
use crate::reconciliation::{ReconciliationOrchestrator, ReconciliationReport};
use crate::retry::RetryPolicy;
use crate::workflow::{EffectLog, WorkflowContext};

/// Already-parsed hub lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceLifecycleEvent {
    Created {
        device_id: String,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
    Deleted {
        device_id: String,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
}

/// What [`SyncCoordinator::handle_event`] did with an event
#[derive(Debug)]
pub enum EventDisposition {
    /// Applied directly against the external registry
    Created(CreateOutcome),
    Deleted(DeleteOutcome),
    /// Permanently refused; never retried
    Rejected(SyncError),
    /// Handed to a durable workflow
    CreateScheduled {
        instance_id: String,
        handle: JoinHandle<Result<DeviceSyncReport>>,
    },
    DeleteScheduled {
        instance_id: String,
        handle: JoinHandle<Result<DeviceDeleteReport>>,
    },
}

/// Injected collaborators
#[derive(Clone)]
pub struct SyncDependencies {
    pub hub: Arc<dyn HubRegistry>,
    pub registry: Arc<dyn ExternalRegistry>,
    pub staging: Arc<dyn StagingStore>,
    pub effect_log: Arc<dyn EffectLog>,
    pub clock: Arc<dyn Clock>,
    pub timer: Arc<dyn Timer>,
}

pub struct SyncCoordinator {
    settings: SyncSettings,
    deps: SyncDependencies,
    event_bus: EventBus,
    /// Run id of the reconciliation in progress
    active_run: Arc<Mutex<Option<String>>>,
}

impl SyncCoordinator {
    /// Create a coordinator after validating `settings`.
    pub fn new(settings: SyncSettings, deps: SyncDependencies, event_bus: EventBus) -> Result<Self> {
        settings.validate()?;
        info!(
            registry = deps.registry.name(),
            use_export_job = settings.use_export_job,
            change_job_threshold = settings.change_job_threshold,
            "Sync coordinator initialized"
        );

        Ok(Self {
            settings,
            deps,
            event_bus,
            active_run: Arc::new(Mutex::new(None)),
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // ========================================================================
    // Bulk reconciliation
    // ========================================================================

    /// Start a new reconciliation run and wait for it to finish.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let run_id = format!("reconcile-{}", Uuid::new_v4());
        self.run_reconciliation(run_id).await
    }

    /// Re-execute a run from its recorded history.
    pub async fn resume_reconciliation(&self, run_id: &str) -> Result<ReconciliationReport> {
        self.run_reconciliation(run_id.to_string()).await
    }

    pub async fn active_run(&self) -> Option<String> {
        self.active_run.lock().await.clone()
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn run_reconciliation(&self, run_id: String) -> Result<ReconciliationReport> {
        if !self.settings.synchronizer_enabled {
            return Err(SyncError::Disabled);
        }

        {
            let mut active = self.active_run.lock().await;
            if let Some(current) = active.as_ref() {
                return Err(SyncError::SyncInProgress {
                    run_id: current.clone(),
                });
            }
            *active = Some(run_id.clone());
        }

        let orchestrator = ReconciliationOrchestrator::new(
            Arc::clone(&self.deps.hub),
            Arc::clone(&self.deps.registry),
            Arc::clone(&self.deps.staging),
            Arc::clone(&self.deps.clock),
            self.settings.clone(),
        )
        .with_event_bus(self.event_bus.clone());

        let result = async {
            let mut ctx = self.load_context(&run_id).await?;
            orchestrator.run(&mut ctx).await
        }
        .await;

        *self.active_run.lock().await = None;

        if result.is_ok() {
            self.purge_history(&run_id).await;
        }
        result
    }

    // ========================================================================
    // Incremental events
    // ========================================================================

    /// Apply a lifecycle event, directly if possible.
    ///
    /// Creation is attempted directly only when the event tags already carry
    /// every required property. Transient failures and incomplete tags hand
    /// the event to a durable workflow.
    #[instrument(skip(self, event))]
    pub async fn handle_event(&self, event: DeviceLifecycleEvent) -> EventDisposition {
        match event {
            DeviceLifecycleEvent::Created { device_id, tags } => {
                self.handle_created(device_id, tags).await
            }
            DeviceLifecycleEvent::Deleted { device_id, tags } => {
                let mut device = DeviceRecord::new(device_id);
                device.tags = tags;
                self.handle_deleted(device).await
            }
        }
    }

    async fn handle_created(
        &self,
        device_id: String,
        tags: BTreeMap<String, String>,
    ) -> EventDisposition {
        let registry = &self.deps.registry;

        if registry.missing_properties(&tags).is_empty() {
            let properties = registry.select_properties(&tags);
            if let Err(e) = registry.validate_properties(&properties) {
                let failure = SyncError::PermanentValidation {
                    device_id: device_id.clone(),
                    message: e.to_string(),
                };
                warn!(device_id = %device_id, error = %failure, "Rejected device creation");
                self.publish(DeviceEvent::ExternalDeviceCreationFailed {
                    device_id,
                    registry: registry.name().to_string(),
                    reason: failure.to_string(),
                });
                return EventDisposition::Rejected(failure);
            }

            match registry.create(&device_id, &properties).await {
                Ok(outcome) => return self.created_directly(device_id, outcome),
                Err(e) if e.is_already_exists() => {
                    return self.created_directly(device_id, CreateOutcome::AlreadyExisted)
                }
                Err(e) if !e.is_transient() => {
                    warn!(device_id = %device_id, error = %e, "Direct device creation failed");
                    self.publish(DeviceEvent::ExternalDeviceCreationFailed {
                        device_id,
                        registry: registry.name().to_string(),
                        reason: e.to_string(),
                    });
                    return EventDisposition::Rejected(SyncError::from(e));
                }
                Err(e) => {
                    debug!(device_id = %device_id, error = %e, "Direct creation failed transiently");
                }
            }
        }

        let (instance_id, handle) = self.spawn_device_create(device_id);
        EventDisposition::CreateScheduled {
            instance_id,
            handle,
        }
    }

    fn created_directly(&self, device_id: String, outcome: CreateOutcome) -> EventDisposition {
        info!(device_id = %device_id, outcome = ?outcome, "External device created directly");
        self.publish(DeviceEvent::ExternalDeviceCreated {
            device_id,
            registry: self.deps.registry.name().to_string(),
            already_existed: outcome == CreateOutcome::AlreadyExisted,
        });
        EventDisposition::Created(outcome)
    }

    async fn handle_deleted(&self, device: DeviceRecord) -> EventDisposition {
        let registry = &self.deps.registry;
        let outcome = match registry.delete(&device).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_not_found() => DeleteOutcome::AlreadyAbsent,
            Err(e) => {
                debug!(device_id = %device.id, error = %e, "Direct deletion failed, scheduling workflow");
                let (instance_id, handle) = self.spawn_device_delete(device);
                return EventDisposition::DeleteScheduled {
                    instance_id,
                    handle,
                };
            }
        };

        info!(device_id = %device.id, outcome = ?outcome, "External device deleted directly");
        self.publish(DeviceEvent::ExternalDeviceDeleted {
            device_id: device.id,
            registry: registry.name().to_string(),
            already_absent: outcome == DeleteOutcome::AlreadyAbsent,
        });
        EventDisposition::Deleted(outcome)
    }

    // ========================================================================
    // Per-device workflows
    // ========================================================================

    /// Start a durable create workflow as an independent task.
    pub fn spawn_device_create(
        &self,
        device_id: String,
    ) -> (String, JoinHandle<Result<DeviceSyncReport>>) {
        let instance_id = format!("device-create-{}-{}", device_id, Uuid::new_v4());
        let orchestrator = self.create_orchestrator();
        let deps = self.deps.clone();
        let id = instance_id.clone();

        let handle = tokio::spawn(async move {
            let mut ctx = WorkflowContext::load(
                id.clone(),
                Arc::clone(&deps.effect_log),
                Arc::clone(&deps.clock),
                Arc::clone(&deps.timer),
            )
            .await?;
            let report = orchestrator.run(&mut ctx, &device_id).await?;
            purge(deps.effect_log.as_ref(), &id).await;
            Ok(report)
        });

        (instance_id, handle)
    }

    /// Start a durable delete workflow as an independent task.
    pub fn spawn_device_delete(
        &self,
        device: DeviceRecord,
    ) -> (String, JoinHandle<Result<DeviceDeleteReport>>) {
        let instance_id = format!("device-delete-{}-{}", device.id, Uuid::new_v4());
        let orchestrator = self.delete_orchestrator();
        let deps = self.deps.clone();
        let id = instance_id.clone();

        let handle = tokio::spawn(async move {
            let mut ctx = WorkflowContext::load(
                id.clone(),
                Arc::clone(&deps.effect_log),
                Arc::clone(&deps.clock),
                Arc::clone(&deps.timer),
            )
            .await?;
            let report = orchestrator.run(&mut ctx, &device).await?;
            purge(deps.effect_log.as_ref(), &id).await;
            Ok(report)
        });

        (instance_id, handle)
    }

    /// Re-execute an interrupted create workflow in place.
    pub async fn resume_device_create(
        &self,
        instance_id: &str,
        device_id: &str,
    ) -> Result<DeviceSyncReport> {
        let mut ctx = self.load_context(instance_id).await?;
        let report = self.create_orchestrator().run(&mut ctx, device_id).await?;
        self.purge_history(instance_id).await;
        Ok(report)
    }

    /// Re-execute an interrupted delete workflow in place.
    pub async fn resume_device_delete(
        &self,
        instance_id: &str,
        device: &DeviceRecord,
    ) -> Result<DeviceDeleteReport> {
        let mut ctx = self.load_context(instance_id).await?;
        let report = self.delete_orchestrator().run(&mut ctx, device).await?;
        self.purge_history(instance_id).await;
        Ok(report)
    }

    /// Delete many devices concurrently, one workflow each.
    ///
    /// Returns one entry per input device, in input order.
    pub async fn delete_devices(&self, devices: Vec<DeviceRecord>) -> Vec<Result<DeviceDeleteReport>> {
        let handles: Vec<_> = devices
            .into_iter()
            .map(|device| self.spawn_device_delete(device).1)
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(SyncError::Internal(format!("Delete workflow task failed: {}", e)))
                })
            })
            .collect()
    }

    fn create_orchestrator(&self) -> DeviceSyncOrchestrator {
        DeviceSyncOrchestrator::new(
            Arc::clone(&self.deps.hub),
            Arc::clone(&self.deps.registry),
            RetryPolicy::from(self.settings.readiness),
            RetryPolicy::from(self.settings.external_call),
        )
        .with_event_bus(self.event_bus.clone())
    }

    fn delete_orchestrator(&self) -> DeviceDeleteOrchestrator {
        DeviceDeleteOrchestrator::new(
            Arc::clone(&self.deps.registry),
            RetryPolicy::from(self.settings.external_call),
        )
        .with_event_bus(self.event_bus.clone())
    }

    async fn load_context(&self, instance_id: &str) -> Result<WorkflowContext> {
        WorkflowContext::load(
            instance_id,
            Arc::clone(&self.deps.effect_log),
            Arc::clone(&self.deps.clock),
            Arc::clone(&self.deps.timer),
        )
        .await
    }

    async fn purge_history(&self, instance_id: &str) {
        purge(self.deps.effect_log.as_ref(), instance_id).await;
    }

    fn publish(&self, event: DeviceEvent) {
        self.event_bus.emit(CoreEvent::Device(event));
    }
}

async fn purge(log: &dyn EffectLog, instance_id: &str) {
    if let Err(e) = log.purge(instance_id).await {
        warn!(instance_id, error = %e, "Failed to purge workflow history");
    }
}
