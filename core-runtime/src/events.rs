//! # Event Bus System
//!
//! Typed lifecycle events broadcast over `tokio::sync::broadcast`, so that
//! hosts can observe per-device workflows and reconciliation runs without
//! coupling to the orchestration code.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DeviceEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus.emit(CoreEvent::Device(DeviceEvent::ExternalDeviceCreated {
//!     device_id: "dev-1".to_string(),
//!     registry: "actility".to_string(),
//!     already_existed: false,
//! }));
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Device(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Subscribers may receive `RecvError::Lagged(n)` when they fall behind;
//! this is non-fatal. `RecvError::Closed` signals shutdown.
//! Emitting with no subscribers is not an error for producers.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::RecvError;
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Credential acquisition events
    Auth(AuthEvent),
    /// Per-device workflow events
    Device(DeviceEvent),
    /// Bulk reconciliation events
    Reconciliation(ReconciliationEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Device(e) => e.description(),
            CoreEvent::Reconciliation(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::TokenAcquisitionFailed { .. })
            | CoreEvent::Device(DeviceEvent::ExternalDeviceCreationFailed { .. })
            | CoreEvent::Device(DeviceEvent::ExternalDeviceDeleteFailed { .. })
            | CoreEvent::Device(DeviceEvent::ReadinessCheckFailed { .. })
            | CoreEvent::Reconciliation(ReconciliationEvent::JobFailed { .. })
            | CoreEvent::Reconciliation(ReconciliationEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Reconciliation(ReconciliationEvent::JobNotComplete { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Reconciliation(ReconciliationEvent::Completed { .. })
            | CoreEvent::Device(DeviceEvent::ExternalDeviceCreated { .. })
            | CoreEvent::Device(DeviceEvent::ExternalDeviceDeleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// An upstream token request was issued.
    TokenAcquired {
        endpoint: String,
        /// Unix epoch seconds
        valid_until: i64,
    },
    /// The upstream token request failed; the cache entry was dropped.
    TokenAcquisitionFailed { endpoint: String, message: String },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::TokenAcquired { .. } => "Access token acquired",
            AuthEvent::TokenAcquisitionFailed { .. } => "Access token acquisition failed",
        }
    }
}

// ============================================================================
// Device Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DeviceEvent {
    ExternalDeviceCreated {
        device_id: String,
        registry: String,
        already_existed: bool,
    },
    ExternalDeviceCreationFailed {
        device_id: String,
        registry: String,
        reason: String,
    },
    ExternalDeviceDeleted {
        device_id: String,
        registry: String,
        already_absent: bool,
    },
    ExternalDeviceDeleteFailed {
        device_id: String,
        registry: String,
        reason: String,
    },
    /// Required properties never showed up in the hub tags.
    ReadinessCheckFailed {
        device_id: String,
        missing_properties: Vec<String>,
    },
    HubDeviceCreated { device_id: String },
    HubDeviceDeleted { device_id: String, soft: bool },
}

impl DeviceEvent {
    fn description(&self) -> &str {
        match self {
            DeviceEvent::ExternalDeviceCreated { .. } => "External device created",
            DeviceEvent::ExternalDeviceCreationFailed { .. } => "External device creation failed",
            DeviceEvent::ExternalDeviceDeleted { .. } => "External device deleted",
            DeviceEvent::ExternalDeviceDeleteFailed { .. } => "External device deletion failed",
            DeviceEvent::ReadinessCheckFailed { .. } => "Device metadata never became ready",
            DeviceEvent::HubDeviceCreated { .. } => "Hub device created",
            DeviceEvent::HubDeviceDeleted { .. } => "Hub device deleted",
        }
    }
}

// ============================================================================
// Reconciliation Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ReconciliationEvent {
    Started { run_id: String, use_export_job: bool },
    PagesRetrieved {
        run_id: String,
        last_page_index: u32,
        items_processed: u64,
    },
    /// A job was still running when its polling budget ran out.
    JobNotComplete { run_id: String, job_id: String },
    JobFailed {
        run_id: String,
        job_id: String,
        status: String,
    },
    Completed {
        run_id: String,
        external_devices: u64,
        creates: u64,
        deletes: u64,
        import_job_id: Option<String>,
    },
    Failed { run_id: String, message: String },
}

impl ReconciliationEvent {
    fn description(&self) -> &str {
        match self {
            ReconciliationEvent::Started { .. } => "Reconciliation started",
            ReconciliationEvent::PagesRetrieved { .. } => "External registry pages retrieved",
            ReconciliationEvent::JobNotComplete { .. } => "Hub job did not complete in time",
            ReconciliationEvent::JobFailed { .. } => "Hub job failed",
            ReconciliationEvent::Completed { .. } => "Reconciliation completed",
            ReconciliationEvent::Failed { .. } => "Reconciliation failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event; zero when
    /// nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new subscriber receiving all future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
