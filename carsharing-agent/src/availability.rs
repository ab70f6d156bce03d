//! Caching layer for points-of-interest lookups.
//!
//! The places and bookees around a location change rarely, so the
//! points-of-interest response is cached per `(lat, lng, range)` for a day.
//! The requested time window is not part of the key: a cached response may
//! have been fetched for a different window. Actual availability for the
//! window comes from booking proposals, which are never cached.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache as MokaCache;
use tracing::debug;

use crate::cantamen::{
    AvailabilityQuery, CantamenClient, Credential, PointOfInterest, UpstreamError,
};

/// Shared points-of-interest payload.
pub type PoiData = Arc<Vec<PointOfInterest>>;

/// Cache key: the location part of an availability query, as sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub lat: String,
    pub lng: String,
    pub range: String,
}

impl From<&AvailabilityQuery> for CacheKey {
    fn from(query: &AvailabilityQuery) -> Self {
        Self {
            lat: query.lat.clone(),
            lng: query.lng.clone(),
            range: query.range.clone(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.lat, self.lng, self.range)
    }
}

/// Configuration for the cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for cached entries.
    pub ttl: Duration,

    /// Maximum number of cached locations.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            max_capacity: 1000,
        }
    }
}

/// A failed load, tagged with the session that performed it.
///
/// Callers that joined the load with a different session must not treat a
/// 401 as a verdict on their own credential.
#[derive(Debug)]
struct LoadFailure {
    credential: Credential,
    error: Arc<UpstreamError>,
}

/// Points-of-interest lookups with per-location caching.
///
/// Concurrent misses for the same key share a single upstream request.
/// Failed requests are not cached.
pub struct AvailabilityCache {
    client: CantamenClient,
    entries: MokaCache<CacheKey, PoiData>,
}

impl AvailabilityCache {
    /// Create a new cache in front of `client`.
    pub fn new(client: CantamenClient, config: &CacheConfig) -> Self {
        let entries = MokaCache::builder()
            .time_to_live(config.ttl)
            .max_capacity(config.max_capacity)
            .build();

        Self { client, entries }
    }

    /// Points of interest for the query's location, using cache if available.
    ///
    /// If a shared load was rejected with 401 under another session than
    /// `credential`, the lookup is repeated once with `credential`, so the
    /// error returned always concerns the caller's own session.
    pub async fn points_of_interest(
        &self,
        credential: &Credential,
        query: &AvailabilityQuery,
    ) -> Result<PoiData, UpstreamError> {
        let key = CacheKey::from(query);

        if let Some(cached) = self.entries.get(&key).await {
            debug!(key = %key, "points of interest served from cache");
            return Ok(cached);
        }

        let loaded = self
            .entries
            .try_get_with(key.clone(), async {
                debug!(key = %key, "fetching points of interest");
                match self.client.points_of_interest(credential, query).await {
                    Ok(pois) => {
                        debug!(key = %key, count = pois.len(), "cached points of interest");
                        Ok(Arc::new(pois))
                    }
                    Err(e) => Err(LoadFailure {
                        credential: credential.clone(),
                        error: Arc::new(e),
                    }),
                }
            })
            .await;

        match loaded {
            Ok(entry) => Ok(entry),
            Err(failure)
                if failure.error.is_unauthorized() && failure.credential != *credential =>
            {
                debug!(key = %key, "shared load used another session, fetching again");
                let pois = Arc::new(self.client.points_of_interest(credential, query).await?);
                self.entries.insert(key, pois.clone()).await;
                Ok(pois)
            }
            Err(failure) => Err(failure.error.clone().into()),
        }
    }
}
