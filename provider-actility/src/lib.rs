//! # Actility Provider
//!
//! Implements the `ExternalRegistry` capability for the Actility
//! network-operator REST API.
//!
//! ## Overview
//!
//! This module provides:
//! - Paged device listing (`pageIndex` is 1-based on the wire)
//! - Device provisioning with the hub tags required by the operator
//! - Device removal looked up by EUI
//! - Bearer tokens from the shared `TokenCache` (client-credentials grant)
//! - Hub device templates with freshly generated symmetric keys

pub mod config;
pub mod error;
pub mod registry;
mod types;

pub use config::ActilityConfig;
pub use error::{ActilityError, Result};
pub use registry::{ActilityRegistry, REGISTRY_NAME};
