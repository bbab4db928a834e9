//! # Bridge Traits
//!
//! Capability traits at the collaborator boundary of the device synchroniser.
//!
//! ## Overview
//!
//! The synchronisation core never talks to a network or a disk directly. Each
//! trait here represents a capability the core requires and that a host
//! (or a test) provides: registries, staging storage, HTTP transport and time.
//!
//! ## Traits
//!
//! ### Registries
//! - [`ExternalRegistry`](registry::ExternalRegistry) - Network-operator device directory
//! - [`HubRegistry`](hub::HubRegistry) - Primary registry with bulk export/import jobs
//!
//! ### Storage & Networking
//! - [`StagingStore`](staging::StagingStore) - Per-run containers of line-delimited blobs
//! - [`HttpClient`](http::HttpClient) - Single-shot async HTTP operations
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`Timer`](time::Timer) - Absolute-deadline sleeping
//!
//! ## Error Handling
//!
//! All traits use [`BridgeError`](error::BridgeError). Implementations must
//! classify failures (`Transient`, `Permanent`, `NotFound`, `AlreadyExists`,
//! `QuotaExceeded`) so that retry decisions can be made upstream without
//! inspecting messages.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; implementations are shared across
//! concurrently running workflows behind `Arc`.

pub mod device;
pub mod error;
pub mod http;
pub mod hub;
pub mod registry;
pub mod staging;
pub mod time;

pub use device::{
    ChangeKind, DeviceRecord, DeviceStatus, ExternalDevicePage, ExternalDeviceRecord, JobKind,
    JobStatus, SymmetricKeys, SyncJob,
};
pub use error::BridgeError;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use hub::{HubDevicePage, HubRegistry, JobBlob};
pub use registry::{CreateOutcome, DeleteOutcome, ExternalRegistry};
pub use staging::{AccessPermissions, BlobReader, StagingStore};
pub use time::{Clock, ManualClock, SystemClock, Timer};
