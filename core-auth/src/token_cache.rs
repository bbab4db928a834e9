//! # Token Cache
//!
//! Single-flight, TTL-based bearer token cache keyed by endpoint.
//!
//! ## Overview
//!
//! - A still-valid entry is read from an atomically swapped snapshot with no
//!   lock and no upstream call.
//! - On a miss or expiry the caller takes the per-endpoint flight lock,
//!   re-checks the entry (another caller may have refreshed it meanwhile) and
//!   only then asks the [`TokenSource`].
//! - A failed acquisition drops the stale entry and is returned to the
//!   caller. The cache never retries; retrying is the caller's business.
//!
//! One instance is created per process and injected wherever credentials are
//! needed.

use arc_swap::ArcSwap;
use bridge_traits::time::Clock;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::client_credentials::TokenSource;
use crate::error::{AuthError, Result};
use crate::types::{AccessToken, ClientCredentials, TokenCacheEntry};

/// Upper bound on a single upstream token request
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// Process-scoped token cache
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    acquire_timeout: Duration,
    /// Snapshot of current entries, replaced wholesale on every change
    entries: ArcSwap<HashMap<String, Arc<TokenCacheEntry>>>,
    /// One flight lock per endpoint key
    flight_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            event_bus: None,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            entries: ArcSwap::from_pointee(HashMap::new()),
            flight_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Publish acquisition events on `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Return a valid token for `endpoint_key`, acquiring one if needed.
    ///
    /// A freshly acquired token is considered valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenAcquisitionFailed`] or [`AuthError::Timeout`]
    /// when the upstream request fails. The entry for `endpoint_key` is gone
    /// afterwards.
    #[instrument(skip(self, credentials), fields(endpoint = %endpoint_key))]
    pub async fn get(
        &self,
        endpoint_key: &str,
        credentials: &ClientCredentials,
        ttl: Duration,
    ) -> Result<AccessToken> {
        if let Some(token) = self.valid_token(endpoint_key) {
            return Ok(token);
        }

        let flight_lock = {
            let mut locks = self.flight_locks.lock().await;
            locks
                .entry(endpoint_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = flight_lock.lock().await;

        if let Some(token) = self.valid_token(endpoint_key) {
            debug!("Token refreshed by a concurrent caller");
            return Ok(token);
        }

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AuthError::InvalidConfig(format!("Token ttl out of range: {}", e)))?;

        info!("Acquiring access token");
        let acquired = match timeout(
            self.acquire_timeout,
            self.source.acquire(endpoint_key, credentials),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout {
                endpoint: endpoint_key.to_string(),
                seconds: self.acquire_timeout.as_secs(),
            }),
        };

        match acquired {
            Ok(token) => {
                let valid_until = self
                    .clock
                    .now()
                    .checked_add_signed(ttl)
                    .ok_or_else(|| AuthError::InvalidConfig("Token ttl overflows".to_string()))?;

                let entry = Arc::new(TokenCacheEntry {
                    endpoint_key: endpoint_key.to_string(),
                    token: token.clone(),
                    valid_until,
                });
                self.update_entries(|entries| {
                    entries.insert(endpoint_key.to_string(), Arc::clone(&entry));
                });

                self.emit(AuthEvent::TokenAcquired {
                    endpoint: endpoint_key.to_string(),
                    valid_until: valid_until.timestamp(),
                });
                Ok(token)
            }
            Err(error) => {
                self.update_entries(|entries| {
                    entries.remove(endpoint_key);
                });

                warn!(error = %error, "Token acquisition failed; cache entry dropped");
                self.emit(AuthEvent::TokenAcquisitionFailed {
                    endpoint: endpoint_key.to_string(),
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Drop the entry for `endpoint_key`, e.g. after the registry rejected it
    pub fn invalidate(&self, endpoint_key: &str) {
        self.update_entries(|entries| {
            entries.remove(endpoint_key);
        });
    }

    /// Current entry for `endpoint_key`, valid or not
    pub fn entry(&self, endpoint_key: &str) -> Option<Arc<TokenCacheEntry>> {
        self.entries.load().get(endpoint_key).cloned()
    }

    fn valid_token(&self, endpoint_key: &str) -> Option<AccessToken> {
        let now = self.clock.now();
        self.entries
            .load()
            .get(endpoint_key)
            .filter(|entry| entry.is_valid_at(now))
            .map(|entry| entry.token.clone())
    }

    /// Copy-on-write update; `apply` may run more than once under contention
    fn update_entries<F>(&self, apply: F)
    where
        F: Fn(&mut HashMap<String, Arc<TokenCacheEntry>>),
    {
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            apply(&mut next);
            next
        });
    }

    fn emit(&self, event: AuthEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Auth(event));
        }
    }
}
