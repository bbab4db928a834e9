//! Integration tests for the per-device create and delete workflows

mod support;

use bridge_traits::device::DeviceRecord;
use bridge_traits::registry::{CreateOutcome, DeleteOutcome};
use bridge_traits::time::ManualClock;
use core_runtime::events::{CoreEvent, DeviceEvent, EventBus, Receiver};
use core_sync::{
    DeviceDeleteOrchestrator, DeviceDeleteReport, DeviceSyncOrchestrator, DeviceSyncReport,
    DeviceSyncState, EffectLog, InMemoryEffectLog, RetryPolicy, SyncError, WorkflowContext,
};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use support::*;

const DEVICE: &str = "dev-1";
const VALID_EUI: &str = "0004A30B001C0530";

struct Fixture {
    clock: Arc<ManualClock>,
    hub: Arc<FakeHub>,
    registry: Arc<FakeRegistry>,
    log: Arc<InMemoryEffectLog>,
    bus: EventBus,
}

impl Fixture {
    fn new(hub_devices: Vec<DeviceRecord>) -> Self {
        Self {
            clock: manual_clock(),
            hub: FakeHub::new(MemoryStaging::new(), hub_devices),
            registry: Arc::new(FakeRegistry::new()),
            log: Arc::new(InMemoryEffectLog::new()),
            bus: EventBus::new(32),
        }
    }

    fn with_ready_device() -> Self {
        let mut device = DeviceRecord::new(DEVICE);
        device.tags = ready_tags(VALID_EUI);
        Self::new(vec![device])
    }

    async fn context(&self, instance_id: &str) -> WorkflowContext {
        WorkflowContext::load(
            instance_id,
            self.log.clone() as Arc<dyn EffectLog>,
            self.clock.clone(),
            self.clock.clone(),
        )
        .await
        .unwrap()
    }

    async fn create(&self) -> DeviceSyncReport {
        let settings = settings();
        let orchestrator = DeviceSyncOrchestrator::new(
            self.hub.clone(),
            self.registry.clone(),
            RetryPolicy::from(settings.readiness),
            RetryPolicy::from(settings.external_call),
        )
        .with_event_bus(self.bus.clone());
        let mut ctx = self.context("create-1").await;
        orchestrator.run(&mut ctx, DEVICE).await.unwrap()
    }

    async fn delete(&self, device: &DeviceRecord) -> DeviceDeleteReport {
        let orchestrator =
            DeviceDeleteOrchestrator::new(self.registry.clone(), RetryPolicy::from(settings().external_call))
                .with_event_bus(self.bus.clone());
        let mut ctx = self.context("delete-1").await;
        orchestrator.run(&mut ctx, device).await.unwrap()
    }
}

fn device_events(rx: &mut Receiver<CoreEvent>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Device(event) = event {
            events.push(event);
        }
    }
    events
}

// ============================================================================
// Create workflow
// ============================================================================

#[tokio::test]
async fn test_create_waits_for_metadata_to_arrive() {
    let fixture = Fixture::with_ready_device();
    let partial = BTreeMap::from([(EUI.to_string(), VALID_EUI.to_string())]);
    fixture.hub.script_tags(vec![None, Some(partial)]).await;

    let report = fixture.create().await;

    assert!(report.is_success());
    assert_eq!(
        report.transitions,
        vec![
            DeviceSyncState::AwaitingReadiness,
            DeviceSyncState::Verified,
            DeviceSyncState::Creating,
            DeviceSyncState::Succeeded,
        ]
    );
    assert_eq!(report.outcome, Some(CreateOutcome::Created));
    assert_eq!(fixture.hub.tag_reads.load(Ordering::SeqCst), 3);

    let created = fixture.registry.created.lock().await.clone();
    assert_eq!(created, vec![(DEVICE.to_string(), ready_tags(VALID_EUI))]);
}

#[tokio::test]
async fn test_readiness_timeout_reports_missing_properties() {
    let fixture = Fixture::new(vec![hub_device(DEVICE)]);
    let mut events = fixture.bus.subscribe();

    let report = fixture.create().await;

    assert_eq!(report.state, DeviceSyncState::Failed);
    match report.failure {
        Some(SyncError::ReadinessTimeout { missing, attempts, .. }) => {
            assert_eq!(missing, vec![PROFILE.to_string()]);
            assert_eq!(attempts, 5);
        }
        other => panic!("expected readiness timeout, got {:?}", other),
    }
    assert_eq!(fixture.registry.create_calls.load(Ordering::SeqCst), 0);
    assert!(device_events(&mut events).iter().any(|e| matches!(
        e,
        DeviceEvent::ReadinessCheckFailed { missing_properties, .. } if missing_properties == &vec![PROFILE.to_string()]
    )));
}

#[tokio::test]
async fn test_invalid_properties_fail_without_retry() {
    let mut device = DeviceRecord::new(DEVICE);
    device.tags = ready_tags("123");
    let fixture = Fixture::new(vec![device]);

    let report = fixture.create().await;

    assert!(matches!(
        report.failure,
        Some(SyncError::PermanentValidation { ref message, .. }) if message.contains("16 characters")
    ));
    assert_eq!(
        report.transitions,
        vec![
            DeviceSyncState::AwaitingReadiness,
            DeviceSyncState::Verified,
            DeviceSyncState::Failed,
        ]
    );
    assert_eq!(fixture.hub.tag_reads.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.registry.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_create_retries_transient_failures() {
    let fixture = Fixture::with_ready_device();
    fixture
        .registry
        .script_create(vec![Scripted::Transient, Scripted::Transient])
        .await;

    let report = fixture.create().await;

    assert!(report.is_success());
    assert_eq!(fixture.registry.create_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_create_treats_existing_device_as_success() {
    let fixture = Fixture::with_ready_device();
    fixture.registry.script_create(vec![Scripted::AlreadyExists]).await;
    let mut events = fixture.bus.subscribe();

    let report = fixture.create().await;

    assert_eq!(report.outcome, Some(CreateOutcome::AlreadyExisted));
    assert!(device_events(&mut events).iter().any(|e| matches!(
        e,
        DeviceEvent::ExternalDeviceCreated { already_existed: true, .. }
    )));
}

#[tokio::test]
async fn test_permanent_create_failure_is_not_retried() {
    let fixture = Fixture::with_ready_device();
    fixture.registry.script_create(vec![Scripted::Permanent]).await;

    let report = fixture.create().await;

    assert!(matches!(
        report.failure,
        Some(SyncError::CreationFailed { attempts: 1, .. })
    ));
    assert_eq!(fixture.registry.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_create_exhausts_external_call_attempts() {
    let fixture = Fixture::with_ready_device();
    fixture
        .registry
        .script_create(vec![Scripted::Transient; 3])
        .await;

    let report = fixture.create().await;

    assert!(matches!(
        report.failure,
        Some(SyncError::CreationFailed { attempts: 3, .. })
    ));
    assert!(fixture.registry.created.lock().await.is_empty());
}

#[tokio::test]
async fn test_replayed_create_does_not_call_registry_again() {
    let fixture = Fixture::with_ready_device();
    fixture.registry.script_create(vec![Scripted::Transient]).await;
    let first = fixture.create().await;
    let calls = fixture.registry.create_calls.load(Ordering::SeqCst);
    let reads = fixture.hub.tag_reads.load(Ordering::SeqCst);

    let replayed = fixture.create().await;

    assert_eq!(replayed.transitions, first.transitions);
    assert_eq!(replayed.outcome, first.outcome);
    assert_eq!(fixture.registry.create_calls.load(Ordering::SeqCst), calls);
    assert_eq!(fixture.hub.tag_reads.load(Ordering::SeqCst), reads);
}

// ============================================================================
// Delete workflow
// ============================================================================

#[tokio::test]
async fn test_delete_missing_device_is_success() {
    let fixture = Fixture::new(Vec::new());
    fixture.registry.script_delete(vec![Scripted::NotFound]).await;
    let mut events = fixture.bus.subscribe();

    let report = fixture.delete(&hub_device(DEVICE)).await;

    assert!(report.is_success());
    assert_eq!(report.outcome, Some(DeleteOutcome::AlreadyAbsent));
    assert!(device_events(&mut events).iter().any(|e| matches!(
        e,
        DeviceEvent::ExternalDeviceDeleted { already_absent: true, .. }
    )));
}

#[tokio::test]
async fn test_delete_retries_then_reports_failure() {
    let fixture = Fixture::new(Vec::new());
    fixture
        .registry
        .script_delete(vec![Scripted::Transient; 3])
        .await;
    let mut events = fixture.bus.subscribe();

    let report = fixture.delete(&hub_device(DEVICE)).await;

    assert_eq!(report.state, DeviceSyncState::Failed);
    assert_eq!(
        report.transitions,
        vec![DeviceSyncState::Deleting, DeviceSyncState::Failed]
    );
    assert!(matches!(
        report.failure,
        Some(SyncError::DeleteFailed { attempts: 3, .. })
    ));
    assert_eq!(fixture.registry.delete_calls.load(Ordering::SeqCst), 3);
    assert!(device_events(&mut events)
        .iter()
        .any(|e| matches!(e, DeviceEvent::ExternalDeviceDeleteFailed { .. })));
}

#[tokio::test]
async fn test_delete_removes_external_device() {
    let fixture = Fixture::new(Vec::new());

    let report = fixture.delete(&hub_device(DEVICE)).await;

    assert_eq!(report.outcome, Some(DeleteOutcome::Deleted));
    assert_eq!(
        report.transitions,
        vec![DeviceSyncState::Deleting, DeviceSyncState::Succeeded]
    );
    assert_eq!(fixture.registry.deleted.lock().await.clone(), vec![DEVICE]);
}
