//! Registry strategy table.
//!
//! Maps a configured system name (for example `"actility"`) to a factory
//! producing the matching [`ExternalRegistry`]. New registries are added by
//! registration; names are matched case-insensitively.

use bridge_traits::http::HttpClient;
use bridge_traits::registry::ExternalRegistry;
use core_auth::TokenCache;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, SyncError};

type SettingLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Shared collaborators handed to registry factories
#[derive(Clone)]
pub struct RegistryContext {
    pub http_client: Arc<dyn HttpClient>,
    pub token_cache: Arc<TokenCache>,
    lookup: Arc<SettingLookup>,
}

impl RegistryContext {
    /// Context whose settings come from the process environment.
    pub fn new(http_client: Arc<dyn HttpClient>, token_cache: Arc<TokenCache>) -> Self {
        Self {
            http_client,
            token_cache,
            lookup: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.lookup = Arc::new(lookup);
        self
    }

    /// Read a provider-specific setting.
    pub fn setting(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }
}

pub type RegistryFactory =
    Arc<dyn Fn(&RegistryContext) -> Result<Arc<dyn ExternalRegistry>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct RegistryCatalog {
    factories: HashMap<String, RegistryFactory>,
}

impl RegistryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&RegistryContext) -> Result<Arc<dyn ExternalRegistry>> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_lowercase(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn resolve(&self, name: &str, context: &RegistryContext) -> Result<Arc<dyn ExternalRegistry>> {
        let factory = self
            .factories
            .get(&name.to_lowercase())
            .ok_or_else(|| SyncError::UnknownRegistry(name.to_string()))?;
        debug!(registry = name, "Resolving external registry");
        factory(context)
    }
}

impl fmt::Debug for RegistryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCatalog")
            .field("names", &self.names())
            .finish()
    }
}
