//! Actility API settings.

use core_auth::ClientCredentials;
use std::fmt;
use std::time::Duration;

use crate::error::{ActilityError, Result};

/// How long an acquired API token is reused
pub const TOKEN_VALIDITY: Duration = Duration::from_secs(6 * 24 * 60 * 60);

pub const TOKEN_URI_VAR: &str = "actility_api_token_uri";
pub const CLIENT_ID_VAR: &str = "actility_api_client_id";
pub const CLIENT_SECRET_VAR: &str = "actility_api_client_secret";
pub const DEVICES_URI_VAR: &str = "actility_api_devices_uri";

#[derive(Clone)]
pub struct ActilityConfig {
    pub token_uri: String,
    pub devices_uri: String,
    pub credentials: ClientCredentials,
    pub token_validity: Duration,
}

impl ActilityConfig {
    /// Read the four `actility_api_*` variables from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String> {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ActilityError::Config(format!("{} is not set", name)))
        };

        let config = Self {
            token_uri: required(TOKEN_URI_VAR)?,
            devices_uri: required(DEVICES_URI_VAR)?
                .trim_end_matches('/')
                .to_string(),
            credentials: ClientCredentials::new(
                required(CLIENT_ID_VAR)?,
                required(CLIENT_SECRET_VAR)?,
            ),
            token_validity: TOKEN_VALIDITY,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, uri) in [(TOKEN_URI_VAR, &self.token_uri), (DEVICES_URI_VAR, &self.devices_uri)] {
            if !(uri.starts_with("https://") || uri.starts_with("http://")) {
                return Err(ActilityError::Config(format!(
                    "{} must be an http(s) URI, got {}",
                    name, uri
                )));
            }
        }
        if self.token_validity.is_zero() {
            return Err(ActilityError::Config(
                "token_validity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ActilityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActilityConfig")
            .field("token_uri", &self.token_uri)
            .field("devices_uri", &self.devices_uri)
            .field("credentials", &self.credentials)
            .field("token_validity", &self.token_validity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            (TOKEN_URI_VAR, "https://auth.actility.example/token"),
            (CLIENT_ID_VAR, "sync-client"),
            (CLIENT_SECRET_VAR, "hunter2"),
            (DEVICES_URI_VAR, "https://api.actility.example/devices/"),
        ]
    }

    #[test]
    fn test_from_lookup_reads_all_settings() {
        let config = ActilityConfig::from_lookup(lookup(&complete())).unwrap();

        assert_eq!(config.devices_uri, "https://api.actility.example/devices");
        assert_eq!(config.credentials.client_id, "sync-client");
        assert_eq!(config.token_validity, Duration::from_secs(518_400));
    }

    #[test]
    fn test_missing_setting_is_reported_by_name() {
        let mut vars = complete();
        vars.retain(|(name, _)| *name != CLIENT_SECRET_VAR);

        let err = ActilityConfig::from_lookup(lookup(&vars)).unwrap_err();

        assert!(err.to_string().contains(CLIENT_SECRET_VAR));
    }

    #[test]
    fn test_rejects_non_http_uri() {
        let mut vars = complete();
        vars[0] = (TOKEN_URI_VAR, "auth.actility.example/token");

        assert!(matches!(
            ActilityConfig::from_lookup(lookup(&vars)),
            Err(ActilityError::Config(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = ActilityConfig::from_lookup(lookup(&complete())).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
