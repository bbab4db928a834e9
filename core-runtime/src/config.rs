//! # Synchronisation Settings
//!
//! Explicit configuration value handed to every component at construction
//! time.
//!
//! ## Overview
//!
//! `SyncSettings` is built once, either from the process environment
//! ([`SyncSettings::from_env`]) or through the builder, and then cloned into
//! the components that need it. Integer settings read from the environment
//! fall back to their default when unparsable and are clamped to a minimum.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SyncSettings;
//! use std::time::Duration;
//!
//! let settings = SyncSettings::builder()
//!     .use_export_job(false)
//!     .change_job_threshold(0)
//!     .readiness_interval(Duration::from_secs(15))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use std::time::Duration;

/// Back-off multiplier shared by every retry policy.
pub const BACKOFF_COEFFICIENT: f64 = 2.0;

/// Wall-clock budget of one external page-retrieval invocation.
pub const PAGE_RETRIEVAL_BUDGET: Duration = Duration::from_secs(3 * 60);

/// Import lines applied per manual batch.
pub const MANUAL_BATCH_SIZE: usize = 100;

/// Wait between import job submission and the first status check.
pub const IMPORT_GRACE_DELAY: Duration = Duration::from_secs(30);

/// Validity of the staging access URI handed to export jobs.
pub const EXPORT_ACCESS_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Validity of the staging access URI handed to import jobs.
pub const IMPORT_ACCESS_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Page size for direct hub listings.
pub const HUB_LISTING_PAGE_SIZE: usize = 500;

/// Interval, cap, attempt count and total budget of one retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub total_timeout: Duration,
}

/// Settings for the synchroniser
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Export hub devices through a bulk job instead of listing them
    pub use_export_job: bool,
    /// Change count at which the bulk import job is used; 0 always uses it
    pub change_job_threshold: usize,
    /// Waiting for the hub tags to carry every required property
    pub readiness: RetrySettings,
    /// External registry create and delete calls
    pub external_call: RetrySettings,
    /// Polling the export job
    pub export_job_poll: RetrySettings,
    /// Polling the import job
    pub import_job_poll: RetrySettings,
    /// Registry adapter selected from the catalog
    pub external_system_name: String,
    /// Bulk reconciliation enabled
    pub synchronizer_enabled: bool,
    /// Disable hub devices instead of deleting them
    pub soft_delete: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            use_export_job: true,
            change_job_threshold: 100,
            readiness: RetrySettings {
                initial_interval: Duration::from_secs(30),
                max_interval: Duration::from_secs(5 * 60),
                max_attempts: 100,
                total_timeout: Duration::from_secs(2 * 24 * 60 * 60),
            },
            external_call: RetrySettings {
                initial_interval: Duration::from_secs(10),
                max_interval: Duration::from_secs(5 * 60),
                max_attempts: 10,
                total_timeout: Duration::from_secs(60 * 60),
            },
            export_job_poll: RetrySettings {
                initial_interval: Duration::from_secs(60),
                max_interval: Duration::from_secs(60),
                max_attempts: 5,
                total_timeout: Duration::from_secs(60 * 60),
            },
            import_job_poll: RetrySettings {
                initial_interval: Duration::from_secs(5 * 60),
                max_interval: Duration::from_secs(5 * 60),
                max_attempts: 5,
                total_timeout: Duration::from_secs(2 * 60 * 60),
            },
            external_system_name: "actility".to_string(),
            synchronizer_enabled: true,
            soft_delete: false,
        }
    }
}

impl SyncSettings {
    pub fn builder() -> SyncSettingsBuilder {
        SyncSettingsBuilder::default()
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary lookup function.
    ///
    /// Job poll intervals are fixed, so their cap equals the interval and
    /// their total budget is attempts × interval.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let int = |name: &str, default: u64, min: u64| -> u64 {
            lookup(name)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .unwrap_or(default)
                .max(min)
        };
        let flag = |name: &str, default: bool| -> bool {
            lookup(name)
                .map(|raw| raw.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };

        let export_interval = int("retryIntervalForIoTHubExportJobInSeconds", 60, 10);
        let export_attempts = int("retryAttemptsForIoTHubExportJob", 5, 1);
        let import_interval = int("retryIntervalForIoTHubImportJobInSeconds", 5 * 60, 1);
        let import_attempts = int("retryAttemptsForIoTHubImportJob", 5, 1);

        let settings = Self {
            use_export_job: flag("useJobToExportIoTHubDevices", defaults.use_export_job),
            change_job_threshold: int("devicesChangeJobThreshold", 100, 0) as usize,
            readiness: RetrySettings {
                initial_interval: Duration::from_secs(int("twinCheckIntervalInSeconds", 30, 10)),
                max_interval: Duration::from_secs(int(
                    "twinCheckMaxIntervalInSeconds",
                    5 * 60,
                    60,
                )),
                max_attempts: int("twinCheckMaxRetryCount", 100, 1) as u32,
                total_timeout: Duration::from_secs(
                    int("twinCheckRetryTimeoutInMinutes", 2 * 24 * 60, 1) * 60,
                ),
            },
            external_call: RetrySettings {
                initial_interval: Duration::from_secs(int(
                    "externalSystemCallRetryIntervalInSeconds",
                    10,
                    1,
                )),
                max_interval: Duration::from_secs(int(
                    "externalSystemCallMaxIntervalInSeconds",
                    5 * 60,
                    1,
                )),
                max_attempts: int("externalSystemCallMaxRetryCount", 10, 1) as u32,
                total_timeout: Duration::from_secs(
                    int("externalSystemCallRetryTimeoutInMinutes", 60, 1) * 60,
                ),
            },
            export_job_poll: fixed_interval(export_interval, export_attempts),
            import_job_poll: fixed_interval(import_interval, import_attempts),
            external_system_name: lookup("externalSystemName")
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.external_system_name),
            synchronizer_enabled: flag("ioTHubSynchronizerEnabled", defaults.synchronizer_enabled),
            soft_delete: flag("iotHubFacadeUseSoftDelete", defaults.soft_delete),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSetting`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.external_system_name.trim().is_empty() {
            return Err(invalid("external_system_name", "cannot be empty"));
        }

        for (name, retry) in [
            ("readiness", &self.readiness),
            ("external_call", &self.external_call),
            ("export_job_poll", &self.export_job_poll),
            ("import_job_poll", &self.import_job_poll),
        ] {
            if retry.max_attempts == 0 {
                return Err(invalid(name, "max_attempts must be at least 1"));
            }
            if retry.initial_interval.is_zero() {
                return Err(invalid(name, "initial_interval must be greater than 0"));
            }
            if retry.max_interval < retry.initial_interval {
                return Err(invalid(
                    name,
                    "max_interval must not be shorter than initial_interval",
                ));
            }
            if retry.total_timeout.is_zero() {
                return Err(invalid(name, "total_timeout must be greater than 0"));
            }
        }

        Ok(())
    }
}

fn fixed_interval(interval_secs: u64, attempts: u64) -> RetrySettings {
    RetrySettings {
        initial_interval: Duration::from_secs(interval_secs),
        max_interval: Duration::from_secs(interval_secs),
        max_attempts: attempts as u32,
        total_timeout: Duration::from_secs(interval_secs.saturating_mul(attempts.max(1))),
    }
}

fn invalid(name: &str, message: &str) -> Error {
    Error::InvalidSetting {
        name: name.to_string(),
        message: message.to_string(),
    }
}

/// Builder for [`SyncSettings`]
#[derive(Debug, Default)]
pub struct SyncSettingsBuilder {
    settings: SyncSettings,
}

impl SyncSettingsBuilder {
    pub fn use_export_job(mut self, enabled: bool) -> Self {
        self.settings.use_export_job = enabled;
        self
    }

    pub fn change_job_threshold(mut self, threshold: usize) -> Self {
        self.settings.change_job_threshold = threshold;
        self
    }

    pub fn readiness(mut self, retry: RetrySettings) -> Self {
        self.settings.readiness = retry;
        self
    }

    pub fn readiness_interval(mut self, interval: Duration) -> Self {
        self.settings.readiness.initial_interval = interval;
        self
    }

    pub fn external_call(mut self, retry: RetrySettings) -> Self {
        self.settings.external_call = retry;
        self
    }

    pub fn export_job_poll(mut self, retry: RetrySettings) -> Self {
        self.settings.export_job_poll = retry;
        self
    }

    pub fn import_job_poll(mut self, retry: RetrySettings) -> Self {
        self.settings.import_job_poll = retry;
        self
    }

    pub fn external_system_name(mut self, name: impl Into<String>) -> Self {
        self.settings.external_system_name = name.into();
        self
    }

    pub fn synchronizer_enabled(mut self, enabled: bool) -> Self {
        self.settings.synchronizer_enabled = enabled;
        self
    }

    pub fn soft_delete(mut self, enabled: bool) -> Self {
        self.settings.soft_delete = enabled;
        self
    }

    /// Validate and return the settings
    pub fn build(self) -> Result<SyncSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
