//! Workspace façade crate.
//!
//! Re-exports the individual workspace crates so host applications can depend
//! on `device-sync` alone. The `desktop-shims` feature (default) pulls in the
//! native adapters (`bridge-desktop`) and the Actility registry provider.

pub use bridge_traits;
pub use core_auth;
pub use core_runtime;
pub use core_sync;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;
#[cfg(feature = "desktop-shims")]
pub use provider_actility;

#[cfg(feature = "desktop-shims")]
use bridge_traits::error::BridgeError;
#[cfg(feature = "desktop-shims")]
use std::sync::Arc;

/// Catalog with every registry provider compiled into this build.
///
/// `"actility"` reads its `actility_api_*` settings through
/// [`RegistryContext::setting`](core_sync::RegistryContext::setting).
#[cfg(feature = "desktop-shims")]
pub fn default_catalog() -> core_sync::RegistryCatalog {
    use provider_actility::{ActilityConfig, ActilityRegistry, REGISTRY_NAME};

    let mut catalog = core_sync::RegistryCatalog::new();
    catalog.register(REGISTRY_NAME, |ctx: &core_sync::RegistryContext| {
        let config = ActilityConfig::from_lookup(|name| ctx.setting(name)).map_err(BridgeError::from)?;
        let registry = ActilityRegistry::new(config, ctx.http_client.clone(), ctx.token_cache.clone())
            .map_err(BridgeError::from)?;
        Ok(Arc::new(registry) as Arc<dyn bridge_traits::registry::ExternalRegistry>)
    });
    catalog
}
