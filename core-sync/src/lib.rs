//! # Device Synchronization Core
//!
//! Keeps the hub registry and an external device registry eventually
//! consistent.
//!
//! ## Overview
//!
//! - Full reconciliation: page the external registry into staging, diff it
//!   against the hub and apply the change set through a bulk import job or
//!   manual batches
//! - Incremental sync: mirror single hub create/delete events into the
//!   external registry through per-device state machines
//!
//! Every orchestration runs on a [`WorkflowContext`], which records each
//! external effect so a re-executed run reuses recorded results instead of
//! repeating calls.
//!
//! ## Components
//!
//! - **Retry Policy** (`retry`): bounded exponential backoff
//! - **Workflow Context** (`workflow`): effect log and replay engine
//! - **Effect History** (`history`): SQLite effect log
//! - **Job Poller** (`job_poller`): waits for hub bulk jobs
//! - **Bulk Transfer** (`transfer`): paged retrieval and staging formats
//! - **Device Set Differ** (`differ`): create/delete deltas
//! - **Device Workflows** (`device_workflows`): create and delete machines
//! - **Reconciliation** (`reconciliation`): the top-level bulk workflow
//! - **Registry Catalog** (`catalog`): registry selection by name
//! - **Sync Coordinator** (`coordinator`): entry point and event dispatch

pub mod catalog;
pub mod coordinator;
pub mod device_workflows;
pub mod differ;
pub mod error;
pub mod history;
pub mod job_poller;
pub mod reconciliation;
pub mod retry;
pub mod transfer;
pub mod workflow;

pub use catalog::{RegistryCatalog, RegistryContext, RegistryFactory};
pub use coordinator::{DeviceLifecycleEvent, EventDisposition, SyncCoordinator, SyncDependencies};
pub use device_workflows::{
    DeviceDeleteOrchestrator, DeviceDeleteReport, DeviceSyncOrchestrator, DeviceSyncReport,
    DeviceSyncState,
};
pub use differ::{diff, ChangeSetSummary, DeviceDiff, DeviceSetDiffer};
pub use error::{Result, SyncError};
pub use history::SqliteEffectLog;
pub use job_poller::JobPoller;
pub use reconciliation::{
    ApplyMode, BatchApplyResult, ReconciliationOrchestrator, ReconciliationReport,
};
pub use retry::RetryPolicy;
pub use transfer::{PageCursor, PageTransferResult, PagedBulkTransfer};
pub use workflow::{
    EffectError, EffectErrorKind, EffectLog, EffectRecord, EffectResult, InMemoryEffectLog,
    RecordedOutcome, RetryError, WorkflowContext,
};
