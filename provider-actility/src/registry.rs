//! Actility device registry
//!
//! Implements `ExternalRegistry` on top of the Actility REST API.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::device::{DeviceRecord, ExternalDevicePage, ExternalDeviceRecord, SymmetricKeys};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::registry::{CreateOutcome, DeleteOutcome, ExternalRegistry};
use core_auth::{AccessToken, TokenCache};
use rand::RngCore;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::ActilityConfig;
use crate::error::{ActilityError, Result};
use crate::types::DeviceSummary;

/// Name under which the registry is selected
pub const REGISTRY_NAME: &str = "actility";

/// Record property holding the hub device id
const ID_PROPERTY: &str = "name";
/// Record property holding the registry reference
const REF_PROPERTY: &str = "ref";
const EUI_PROPERTY: &str = "EUI";
const EUI_LENGTH: usize = 16;

const REQUIRED_PROPERTIES: [&str; 5] = [
    EUI_PROPERTY,
    "activationType",
    "deviceProfileId",
    "applicationEUI",
    "applicationKey",
];

/// Bytes per generated symmetric key
const KEY_LENGTH: usize = 32;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Actility registry adapter
///
/// Every call is single-shot; retrying is up to the caller.
///
/// # Example
///
/// ```ignore
/// use provider_actility::{ActilityConfig, ActilityRegistry};
///
/// let registry = ActilityRegistry::new(ActilityConfig::from_env()?, http_client, token_cache)?;
/// let first_page = registry.list_page(0).await?;
/// ```
pub struct ActilityRegistry {
    config: ActilityConfig,
    http_client: Arc<dyn HttpClient>,
    token_cache: Arc<TokenCache>,
}

impl ActilityRegistry {
    pub fn new(
        config: ActilityConfig,
        http_client: Arc<dyn HttpClient>,
        token_cache: Arc<TokenCache>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            http_client,
            token_cache,
        })
    }

    async fn token(&self) -> Result<AccessToken> {
        let token = self
            .token_cache
            .get(
                &self.config.token_uri,
                &self.config.credentials,
                self.config.token_validity,
            )
            .await?;
        Ok(token)
    }

    async fn send(&self, method: HttpMethod, url: String, body: Option<&Value>) -> Result<HttpResponse> {
        let token = self.token().await?;
        let mut request = HttpRequest::new(method, url)
            .bearer_token(token.as_str())
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT);
        if let Some(body) = body {
            request = request.json(body)?;
        }

        Ok(self.http_client.execute(request).await?)
    }

    fn api_error(response: &HttpResponse) -> ActilityError {
        ActilityError::ApiError {
            status_code: response.status,
            message: response
                .text()
                .unwrap_or_else(|_| "Unable to read error response".to_string()),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_page(&self, page_index: u32) -> Result<ExternalDevicePage> {
        // The API counts pages from 1.
        let url = format!("{}?pageIndex={}", self.config.devices_uri, page_index + 1);
        let response = self.send(HttpMethod::Get, url, None).await?;

        // An exhausted listing answers 404.
        if response.status == 404 {
            debug!(page_index, "Device listing exhausted");
            return Ok(ExternalDevicePage::empty());
        }
        if !response.is_success() {
            return Err(Self::api_error(&response));
        }

        let records: Vec<Value> = response
            .json()
            .map_err(|e| ActilityError::ParseError(e.to_string()))?;
        debug!(page_index, records = records.len(), "Fetched device page");

        Ok(ExternalDevicePage {
            has_more: !records.is_empty(),
            records: records.into_iter().map(ExternalDeviceRecord::new).collect(),
        })
    }

    #[instrument(skip(self, properties))]
    async fn provision(
        &self,
        device_id: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<CreateOutcome> {
        let mut payload = Map::new();
        payload.insert(ID_PROPERTY.to_string(), Value::from(device_id));
        for (key, value) in properties {
            payload.insert(key.clone(), Value::from(value.as_str()));
        }

        let response = self
            .send(
                HttpMethod::Post,
                self.config.devices_uri.clone(),
                Some(&Value::Object(payload)),
            )
            .await?;

        match response.status {
            409 => {
                info!(device_id, "Device already provisioned");
                Ok(CreateOutcome::AlreadyExisted)
            }
            _ if response.is_success() => {
                info!(device_id, "Device provisioned");
                Ok(CreateOutcome::Created)
            }
            _ => Err(Self::api_error(&response)),
        }
    }

    #[instrument(skip(self, device), fields(device_id = %device.id))]
    async fn remove(&self, device: &DeviceRecord) -> Result<DeleteOutcome> {
        let eui = device
            .tag(EUI_PROPERTY)
            .ok_or_else(|| ActilityError::MissingProperty {
                device_id: device.id.clone(),
                property: EUI_PROPERTY.to_string(),
            })?;

        let lookup_url = format!(
            "{}?deviceEUI={}",
            self.config.devices_uri,
            urlencoding::encode(eui)
        );
        let response = self.send(HttpMethod::Get, lookup_url, None).await?;
        if !response.is_success() {
            return Err(Self::api_error(&response));
        }

        let matches: Vec<DeviceSummary> = response
            .json()
            .map_err(|e| ActilityError::ParseError(e.to_string()))?;
        let device_ref = match matches.as_slice() {
            [] => {
                debug!(eui, "No device registered for EUI");
                return Ok(DeleteOutcome::AlreadyAbsent);
            }
            [only] => only.reference().ok_or_else(|| {
                ActilityError::ParseError(format!("Device lookup for EUI {} has no ref", eui))
            })?,
            _ => {
                warn!(eui, count = matches.len(), "EUI matches several devices");
                return Err(ActilityError::AmbiguousDevice {
                    eui: eui.to_string(),
                    count: matches.len(),
                });
            }
        };

        let delete_url = format!(
            "{}/{}",
            self.config.devices_uri,
            urlencoding::encode(&device_ref)
        );
        let response = self.send(HttpMethod::Delete, delete_url, None).await?;
        match response.status {
            404 => Ok(DeleteOutcome::AlreadyAbsent),
            _ if response.is_success() => {
                info!(device_ref = %device_ref, "Device removed");
                Ok(DeleteOutcome::Deleted)
            }
            _ => Err(Self::api_error(&response)),
        }
    }
}

/// Random symmetric key, base64 encoded
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut key);
    STANDARD.encode(key)
}

/// Tag value for a record property; non-string JSON is kept in its JSON form.
fn property_value(record: &ExternalDeviceRecord, name: &str) -> Option<String> {
    match record.as_value().get(name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ExternalRegistry for ActilityRegistry {
    fn name(&self) -> &str {
        REGISTRY_NAME
    }

    async fn list_page(&self, page_index: u32) -> BridgeResult<ExternalDevicePage> {
        Ok(self.fetch_page(page_index).await?)
    }

    async fn create(
        &self,
        device_id: &str,
        properties: &BTreeMap<String, String>,
    ) -> BridgeResult<CreateOutcome> {
        Ok(self.provision(device_id, properties).await?)
    }

    async fn delete(&self, device: &DeviceRecord) -> BridgeResult<DeleteOutcome> {
        Ok(self.remove(device).await?)
    }

    fn extract_device_id(&self, record: &ExternalDeviceRecord) -> BridgeResult<String> {
        property_value(record, ID_PROPERTY).ok_or_else(|| {
            BridgeError::Permanent(format!("Device record has no {} property", ID_PROPERTY))
        })
    }

    fn required_properties(&self) -> Vec<String> {
        REQUIRED_PROPERTIES.iter().map(|p| p.to_string()).collect()
    }

    fn validate_properties(&self, properties: &BTreeMap<String, String>) -> BridgeResult<()> {
        let eui = properties
            .get(EUI_PROPERTY)
            .ok_or_else(|| BridgeError::Permanent("Property EUI not found".to_string()))?;

        let length = eui.chars().count();
        if length != EUI_LENGTH {
            return Err(BridgeError::Permanent(format!(
                "Property EUI should have 16 characters. Value: {}. Length: {}",
                eui, length
            )));
        }
        Ok(())
    }

    fn to_hub_device(&self, record: &ExternalDeviceRecord) -> BridgeResult<DeviceRecord> {
        let mut device = DeviceRecord::new(self.extract_device_id(record)?);
        for name in REQUIRED_PROPERTIES.iter().chain(&[REF_PROPERTY]) {
            if let Some(value) = property_value(record, name) {
                device.tags.insert(name.to_string(), value);
            }
        }
        device.authentication = Some(SymmetricKeys {
            primary_key: generate_key(),
            secondary_key: generate_key(),
        });
        Ok(device)
    }
}
