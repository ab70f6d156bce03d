//! Application state for the web layer.

use std::sync::Arc;

use crate::auth::AuthManager;
use crate::availability::{AvailabilityCache, CacheConfig};
use crate::cantamen::{CantamenClient, ServiceAccount};
use crate::config::LocationDefaults;

/// Shared application state.
///
/// Owns the process-lifetime caches; handlers reach them only through here.
#[derive(Clone)]
pub struct AppState {
    /// casirest client for uncached calls
    pub client: CantamenClient,

    /// Session credential
    pub auth: Arc<AuthManager>,

    /// Cached points-of-interest lookups
    pub availability: Arc<AvailabilityCache>,

    /// Location used when the request omits one
    pub defaults: Arc<LocationDefaults>,
}

impl AppState {
    /// Create a new app state.
    pub fn new(
        client: CantamenClient,
        account: ServiceAccount,
        cache_config: &CacheConfig,
        defaults: LocationDefaults,
    ) -> Self {
        Self {
            auth: Arc::new(AuthManager::new(client.clone(), account)),
            availability: Arc::new(AvailabilityCache::new(client.clone(), cache_config)),
            client,
            defaults: Arc::new(defaults),
        }
    }
}
