//! Actility API payloads

use serde::Deserialize;
use serde_json::Value;

/// Entry of a device lookup by EUI
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DeviceSummary {
    #[serde(rename = "ref", default)]
    device_ref: Value,
}

impl DeviceSummary {
    /// Registry reference used in the delete URL
    pub fn reference(&self) -> Option<String> {
        match &self.device_ref {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
