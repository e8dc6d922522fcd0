//! Discovery server endpoint pool
//!
//! The pool is the ordered list of interchangeable discovery server base URLs
//! plus a [`RotationCursor`]. The selected endpoint is always
//! `pool[cursor % pool.len()]`; rotation is plain round-robin.
//!
//! The list itself is owned by the client's shared state so that it is
//! guarded by the same lock as the rest of the client; this module provides
//! the pieces that operate on it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{split_url_list, ClientConfig};
use crate::error::DiscoveryError;

// ============================================================================
// Resolution
// ============================================================================

/// Resolves the service URLs of one availability zone
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve_zone_urls(
        &self,
        config: &ClientConfig,
        zone: &str,
    ) -> Result<Vec<String>, DiscoveryError>;

    /// Whether this resolver can serve DNS based configurations
    fn supports_dns(&self) -> bool {
        false
    }
}

/// Reads zone URLs straight from [`ClientConfig::service_urls`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticEndpointResolver;

#[async_trait]
impl EndpointResolver for StaticEndpointResolver {
    async fn resolve_zone_urls(
        &self,
        config: &ClientConfig,
        zone: &str,
    ) -> Result<Vec<String>, DiscoveryError> {
        let urls: Vec<String> = config
            .service_urls
            .get(zone)
            .map(|urls| urls.iter().flat_map(|u| split_url_list(u)).collect())
            .unwrap_or_default();

        if urls.is_empty() {
            return Err(DiscoveryError::NoEndpointsAvailable);
        }

        Ok(urls
            .into_iter()
            .map(|u| u.trim_end_matches('/').to_string())
            .collect())
    }
}

/// Resolve the endpoint list from the first zone that yields URLs
///
/// Zones are tried in the configured priority order; the first one that
/// returns a non-empty list wins and the rest are not consulted.
pub async fn resolve_endpoints(
    resolver: &dyn EndpointResolver,
    config: &ClientConfig,
) -> Result<Vec<String>, DiscoveryError> {
    for zone in config.availability_zones_for_region() {
        match resolver.resolve_zone_urls(config, zone).await {
            Ok(urls) if !urls.is_empty() => {
                tracing::debug!(zone = %zone, count = urls.len(), "Resolved service urls");
                return Ok(urls);
            }
            Ok(_) => {
                tracing::warn!(zone = %zone, "Zone resolved to no service urls");
            }
            Err(e) => {
                tracing::error!(zone = %zone, error = %e, "Failed to resolve zone service urls");
            }
        }
    }

    Err(DiscoveryError::NoZonesAvailable {
        region: config.region.clone(),
    })
}

// ============================================================================
// Rotation Cursor
// ============================================================================

/// Shared round-robin position over the endpoint pool
///
/// Only "some value modulo the pool length" matters, so readers and the
/// incrementer may race freely.
#[derive(Debug, Default)]
pub struct RotationCursor(AtomicU64);

impl RotationCursor {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Advance by one, returning the new position
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Index into a pool of `len` entries for the current position
    pub fn index(&self, len: usize) -> Option<usize> {
        select_index(self.current(), len)
    }
}

/// `cursor mod len`, or `None` for an empty pool
pub fn select_index(cursor: u64, len: usize) -> Option<usize> {
    if len == 0 {
        None
    } else {
        Some((cursor % len as u64) as usize)
    }
}

/// The endpoint selected by `cursor`, if the pool is non-empty
pub fn select_endpoint(pool: &[String], cursor: u64) -> Option<&str> {
    select_index(cursor, pool.len()).map(|i| pool[i].as_str())
}
