//! Error types for the Actility provider

use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use thiserror::Error;

/// Actility provider errors
#[derive(Error, Debug)]
pub enum ActilityError {
    /// Missing or malformed provider settings
    #[error("Invalid Actility configuration: {0}")]
    Config(String),

    #[error("Could not obtain API token: {0}")]
    Auth(#[from] AuthError),

    /// API request returned a non-success status
    #[error("Actility API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Lookup by EUI did not return exactly one device
    #[error("Get device by EUI {eui} returned {count} devices, expected 1 device")]
    AmbiguousDevice { eui: String, count: usize },

    /// Hub device lacks a property the API needs
    #[error("Device {device_id} has no {property} tag")]
    MissingProperty { device_id: String, property: String },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Actility operations
pub type Result<T> = std::result::Result<T, ActilityError>;

impl From<ActilityError> for BridgeError {
    fn from(error: ActilityError) -> Self {
        match error {
            ActilityError::ApiError {
                status_code,
                message,
            } => classify_status(status_code, message),
            ActilityError::Auth(AuthError::InvalidConfig(msg)) => {
                BridgeError::Permanent(format!("Invalid token configuration: {}", msg))
            }
            ActilityError::Auth(e) => BridgeError::Transient(e.to_string()),
            ActilityError::BridgeError(e) => e,
            e @ (ActilityError::Config(_)
            | ActilityError::AmbiguousDevice { .. }
            | ActilityError::MissingProperty { .. }
            | ActilityError::ParseError(_)) => BridgeError::Permanent(e.to_string()),
        }
    }
}

/// Map an HTTP status to the bridge classification.
///
/// 404 not found, 409 already exists, 408/429/5xx transient, anything else
/// permanent.
pub fn classify_status(status_code: u16, message: String) -> BridgeError {
    let message = format!("status {}: {}", status_code, message);
    match status_code {
        404 => BridgeError::NotFound(message),
        409 => BridgeError::AlreadyExists(message),
        408 | 429 | 500..=599 => BridgeError::Transient(message),
        _ => BridgeError::Permanent(message),
    }
}
