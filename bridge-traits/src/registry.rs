//! External Registry Capability
//!
//! Contract every network-operator registry adapter fulfils. Adapters are
//! selected by name at startup, so the orchestration code only ever sees
//! `Arc<dyn ExternalRegistry>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::device::{DeviceRecord, ExternalDeviceRecord, ExternalDevicePage};
use crate::error::Result;

/// Result of a create call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    Created,
    /// The device was already there; nothing to do.
    AlreadyExisted,
}

/// Result of a delete call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    /// The device was already gone; nothing to do.
    AlreadyAbsent,
}

/// External device registry adapter
///
/// Failures are classified through [`BridgeError`](crate::error::BridgeError):
/// `Transient` for network and 5xx-class failures, `Permanent` for everything
/// that will not succeed on retry. Idempotent outcomes are never errors; they
/// come back as [`CreateOutcome::AlreadyExisted`] or
/// [`DeleteOutcome::AlreadyAbsent`].
///
/// # Example
///
/// ```ignore
/// use bridge_traits::registry::ExternalRegistry;
///
/// async fn count_first_page(registry: &dyn ExternalRegistry) -> Result<usize> {
///     let page = registry.list_page(0).await?;
///     Ok(page.records.len())
/// }
/// ```
#[async_trait]
pub trait ExternalRegistry: Send + Sync {
    /// Registry name used in logs and events
    fn name(&self) -> &str;

    /// Fetch one page of records.
    ///
    /// `page_index` is 0-based. A "not found" answer from the registry maps
    /// to [`ExternalDevicePage::empty`].
    async fn list_page(&self, page_index: u32) -> Result<ExternalDevicePage>;

    /// Provision a device with the given registry properties
    async fn create(
        &self,
        device_id: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<CreateOutcome>;

    /// Remove the external counterpart of a hub device
    async fn delete(&self, device: &DeviceRecord) -> Result<DeleteOutcome>;

    /// Hub device id for an external record
    fn extract_device_id(&self, record: &ExternalDeviceRecord) -> Result<String>;

    /// Properties that must be present in hub tags before provisioning
    fn required_properties(&self) -> Vec<String>;

    /// Registry-specific format rules; failures are permanent
    fn validate_properties(&self, properties: &BTreeMap<String, String>) -> Result<()>;

    /// Build the hub device that mirrors an external record
    fn to_hub_device(&self, record: &ExternalDeviceRecord) -> Result<DeviceRecord>;

    /// Required properties absent from `tags`, in declaration order
    fn missing_properties(&self, tags: &BTreeMap<String, String>) -> Vec<String> {
        self.required_properties()
            .into_iter()
            .filter(|name| !tags.contains_key(name))
            .collect()
    }

    /// The subset of `tags` holding required properties
    fn select_properties(&self, tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        self.required_properties()
            .into_iter()
            .filter_map(|name| tags.get(&name).map(|value| (name, value.clone())))
            .collect()
    }
}
