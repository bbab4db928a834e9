//! # Per-Device Workflows
//!
//! Durable orchestrations that mirror a single hub lifecycle event into the
//! external registry.
//!
//! ## Create
//!
//! ```text
//! AwaitingReadiness ──ready──▶ Verified ──valid──▶ Creating ──▶ Succeeded
//!        │                        │                   │
//!        └──timeout──▶ Failed ◀───┴──invalid          └──exhausted──▶ Failed
//! ```
//!
//! A device is *ready* once the hub reports every property the registry
//! requires in its tags. Tags are filled in asynchronously after the device
//! appears, so readiness is polled under the readiness policy. Validation
//! failures are permanent and never retried.
//!
//! ## Delete
//!
//! `Deleting ──▶ Succeeded | Failed`. A device that is already gone from the
//! registry counts as success; failures of one device never affect others.

use bridge_traits::device::DeviceRecord;
use bridge_traits::hub::HubRegistry;
use bridge_traits::registry::{CreateOutcome, DeleteOutcome, ExternalRegistry};
use core_runtime::events::{CoreEvent, DeviceEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use crate::workflow::{EffectError, RetryError, WorkflowContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSyncState {
    AwaitingReadiness,
    Verified,
    Creating,
    Deleting,
    Succeeded,
    Failed,
}

impl DeviceSyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceSyncState::Succeeded | DeviceSyncState::Failed)
    }
}

/// Final state of a create workflow
#[derive(Debug)]
pub struct DeviceSyncReport {
    pub device_id: String,
    pub state: DeviceSyncState,
    /// Every state visited, in order
    pub transitions: Vec<DeviceSyncState>,
    pub outcome: Option<CreateOutcome>,
    pub failure: Option<SyncError>,
}

impl DeviceSyncReport {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            state: DeviceSyncState::AwaitingReadiness,
            transitions: vec![DeviceSyncState::AwaitingReadiness],
            outcome: None,
            failure: None,
        }
    }

    fn transition(&mut self, state: DeviceSyncState) {
        self.state = state;
        self.transitions.push(state);
    }

    pub fn is_success(&self) -> bool {
        self.state == DeviceSyncState::Succeeded
    }
}

/// Final state of a delete workflow
#[derive(Debug)]
pub struct DeviceDeleteReport {
    pub device_id: String,
    pub state: DeviceSyncState,
    pub transitions: Vec<DeviceSyncState>,
    pub outcome: Option<DeleteOutcome>,
    pub failure: Option<SyncError>,
}

impl DeviceDeleteReport {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            state: DeviceSyncState::Deleting,
            transitions: vec![DeviceSyncState::Deleting],
            outcome: None,
            failure: None,
        }
    }

    fn transition(&mut self, state: DeviceSyncState) {
        self.state = state;
        self.transitions.push(state);
    }

    pub fn is_success(&self) -> bool {
        self.state == DeviceSyncState::Succeeded
    }
}

// ============================================================================
// Create
// ============================================================================

/// Mirrors a hub device creation into the external registry.
#[derive(Clone)]
pub struct DeviceSyncOrchestrator {
    hub: Arc<dyn HubRegistry>,
    registry: Arc<dyn ExternalRegistry>,
    readiness: RetryPolicy,
    external_call: RetryPolicy,
    event_bus: Option<EventBus>,
}

impl DeviceSyncOrchestrator {
    pub fn new(
        hub: Arc<dyn HubRegistry>,
        registry: Arc<dyn ExternalRegistry>,
        readiness: RetryPolicy,
        external_call: RetryPolicy,
    ) -> Self {
        Self {
            hub,
            registry,
            readiness,
            external_call,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Drive the workflow for `device_id` to a terminal state.
    ///
    /// Device-level failures end up in the report; `Err` is reserved for
    /// engine failures such as a diverging history.
    pub async fn run(&self, ctx: &mut WorkflowContext, device_id: &str) -> Result<DeviceSyncReport> {
        let mut report = DeviceSyncReport::new(device_id);

        let properties = match self.await_readiness(ctx, device_id).await? {
            Ok(properties) => properties,
            Err(failure) => return Ok(self.fail(ctx, report, failure)),
        };
        report.transition(DeviceSyncState::Verified);

        if let Err(e) = self.registry.validate_properties(&properties) {
            let failure = SyncError::PermanentValidation {
                device_id: device_id.to_string(),
                message: e.to_string(),
            };
            return Ok(self.fail(ctx, report, failure));
        }
        report.transition(DeviceSyncState::Creating);

        let registry = Arc::clone(&self.registry);
        let created = ctx
            .call_with_retry("create_external_device", &self.external_call, |_| {
                let registry = Arc::clone(&registry);
                let device_id = device_id.to_string();
                let properties = properties.clone();
                async move {
                    match registry.create(&device_id, &properties).await {
                        Ok(outcome) => Ok(outcome),
                        Err(e) if e.is_already_exists() => Ok(CreateOutcome::AlreadyExisted),
                        Err(e) => Err(EffectError::from(e)),
                    }
                }
            })
            .await?;

        match created {
            Ok(outcome) => {
                report.transition(DeviceSyncState::Succeeded);
                report.outcome = Some(outcome);
                if !ctx.is_replaying() {
                    info!(
                        device_id,
                        registry = self.registry.name(),
                        outcome = ?outcome,
                        "External device created"
                    );
                }
                self.emit(
                    ctx,
                    DeviceEvent::ExternalDeviceCreated {
                        device_id: device_id.to_string(),
                        registry: self.registry.name().to_string(),
                        already_existed: outcome == CreateOutcome::AlreadyExisted,
                    },
                );
                Ok(report)
            }
            Err(retry) => {
                let failure = SyncError::CreationFailed {
                    device_id: device_id.to_string(),
                    attempts: retry.attempts(),
                    message: retry.error().message.clone(),
                };
                Ok(self.fail(ctx, report, failure))
            }
        }
    }

    async fn await_readiness(
        &self,
        ctx: &mut WorkflowContext,
        device_id: &str,
    ) -> Result<std::result::Result<BTreeMap<String, String>, SyncError>> {
        let hub = Arc::clone(&self.hub);
        let registry = Arc::clone(&self.registry);

        let probed = ctx
            .call_with_retry("await_device_readiness", &self.readiness, |_| {
                let hub = Arc::clone(&hub);
                let registry = Arc::clone(&registry);
                let device_id = device_id.to_string();
                async move {
                    let tags = match hub.get_device_tags(&device_id).await {
                        Ok(Some(tags)) => tags,
                        Ok(None) => {
                            return Err(EffectError::transient(format!(
                                "Device {} not visible in hub yet",
                                device_id
                            ))
                            .with_details(registry.required_properties()))
                        }
                        Err(e) => return Err(EffectError::from(e)),
                    };

                    let missing = registry.missing_properties(&tags);
                    if missing.is_empty() {
                        Ok(registry.select_properties(&tags))
                    } else {
                        Err(EffectError::transient(format!(
                            "Device {} is missing {}",
                            device_id,
                            missing.join(", ")
                        ))
                        .with_details(missing))
                    }
                }
            })
            .await?;

        Ok(probed.map_err(|retry| match retry {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => SyncError::ReadinessTimeout {
                device_id: device_id.to_string(),
                missing: last_error.details,
                attempts,
            },
            RetryError::Permanent { error, .. } => SyncError::from(error),
        }))
    }

    fn fail(
        &self,
        ctx: &WorkflowContext,
        mut report: DeviceSyncReport,
        failure: SyncError,
    ) -> DeviceSyncReport {
        if !ctx.is_replaying() {
            warn!(
                device_id = %report.device_id,
                state = ?report.state,
                error = %failure,
                "Device synchronization failed"
            );
        }

        let event = match &failure {
            SyncError::ReadinessTimeout { missing, .. } => DeviceEvent::ReadinessCheckFailed {
                device_id: report.device_id.clone(),
                missing_properties: missing.clone(),
            },
            other => DeviceEvent::ExternalDeviceCreationFailed {
                device_id: report.device_id.clone(),
                registry: self.registry.name().to_string(),
                reason: other.to_string(),
            },
        };
        self.emit(ctx, event);

        report.transition(DeviceSyncState::Failed);
        report.failure = Some(failure);
        report
    }

    fn emit(&self, ctx: &WorkflowContext, event: DeviceEvent) {
        if let (Some(bus), false) = (&self.event_bus, ctx.is_replaying()) {
            bus.emit(CoreEvent::Device(event));
        }
    }
}

// ============================================================================
// Delete
// ============================================================================

/// Mirrors a hub device deletion into the external registry.
#[derive(Clone)]
pub struct DeviceDeleteOrchestrator {
    registry: Arc<dyn ExternalRegistry>,
    external_call: RetryPolicy,
    event_bus: Option<EventBus>,
}

impl DeviceDeleteOrchestrator {
    pub fn new(registry: Arc<dyn ExternalRegistry>, external_call: RetryPolicy) -> Self {
        Self {
            registry,
            external_call,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub async fn run(
        &self,
        ctx: &mut WorkflowContext,
        device: &DeviceRecord,
    ) -> Result<DeviceDeleteReport> {
        let registry = Arc::clone(&self.registry);
        let deleted = ctx
            .call_with_retry("delete_external_device", &self.external_call, |_| {
                let registry = Arc::clone(&registry);
                let device = device.clone();
                async move {
                    match registry.delete(&device).await {
                        Ok(outcome) => Ok(outcome),
                        Err(e) if e.is_not_found() => Ok(DeleteOutcome::AlreadyAbsent),
                        Err(e) => Err(EffectError::from(e)),
                    }
                }
            })
            .await?;

        let registry_name = self.registry.name().to_string();
        let mut report = DeviceDeleteReport::new(&device.id);
        match deleted {
            Ok(outcome) => {
                if !ctx.is_replaying() {
                    info!(device_id = %device.id, registry = %registry_name, outcome = ?outcome, "External device deleted");
                }
                self.emit(
                    ctx,
                    DeviceEvent::ExternalDeviceDeleted {
                        device_id: device.id.clone(),
                        registry: registry_name,
                        already_absent: outcome == DeleteOutcome::AlreadyAbsent,
                    },
                );
                report.outcome = Some(outcome);
                report.transition(DeviceSyncState::Succeeded);
            }
            Err(retry) => {
                let failure = SyncError::DeleteFailed {
                    device_id: device.id.clone(),
                    attempts: retry.attempts(),
                    message: retry.error().message.clone(),
                };
                if !ctx.is_replaying() {
                    warn!(device_id = %device.id, registry = %registry_name, error = %failure, "External device deletion failed");
                }
                self.emit(
                    ctx,
                    DeviceEvent::ExternalDeviceDeleteFailed {
                        device_id: device.id.clone(),
                        registry: registry_name,
                        reason: failure.to_string(),
                    },
                );
                report.failure = Some(failure);
                report.transition(DeviceSyncState::Failed);
            }
        }

        Ok(report)
    }

    fn emit(&self, ctx: &WorkflowContext, event: DeviceEvent) {
        if let (Some(bus), false) = (&self.event_bus, ctx.is_replaying()) {
            bus.emit(CoreEvent::Device(event));
        }
    }
}
