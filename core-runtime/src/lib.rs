//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the device synchroniser:
//! - Logging and tracing bootstrap
//! - Explicit synchronisation settings
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its logging conventions,
//! its settings value and the broadcast channel used to publish device and
//! reconciliation events.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
