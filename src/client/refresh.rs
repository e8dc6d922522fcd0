//! Registry refresh and endpoint refresh loops
//!
//! Both loops replace their target wholesale under the write lock and keep
//! the previous value when a cycle fails.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use super::{Client, StopSignal};
use crate::error::{DiscoveryError, Result};
use crate::models::Registry;

impl Client {
    /// Fetch the full registry from the selected endpoint and cache it
    pub async fn fetch_registry(&self) -> Result<Arc<Registry>> {
        let api = self.api().await?;
        let apps = api
            .query_all_instances()
            .await
            .map_err(DiscoveryError::RefreshFailed)?;

        let registry: Registry = if self.inner.config.filter_only_up_instances {
            apps.into_iter()
                .filter_map(|(name, app)| {
                    let up = app.only_up();
                    (!up.instance.is_empty()).then_some((name, up))
                })
                .collect()
        } else {
            apps
        };

        let registry = Arc::new(registry);
        self.inner.state.write().await.registry = Arc::clone(&registry);

        Ok(registry)
    }

    pub(crate) fn spawn_registry_refresh(&self, stop: StopSignal) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.registry_refresh_loop(stop).await })
    }

    async fn registry_refresh_loop(&self, mut stop: StopSignal) {
        let mut ticker = interval(self.inner.config.registry_fetch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.stopped() => {
                    tracing::info!("Registry refresh task shutting down");
                    break;
                }
            }

            match self.fetch_registry().await {
                Ok(registry) => {
                    tracing::debug!(apps = registry.len(), "Registry refreshed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to query all instances");
                }
            }
        }
    }

    pub(crate) fn spawn_endpoint_refresh(&self, stop: StopSignal) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.endpoint_refresh_loop(stop).await })
    }

    async fn endpoint_refresh_loop(&self, mut stop: StopSignal) {
        let period = self.inner.config.dns_refresh_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.stopped() => {
                    tracing::info!("Endpoint refresh task shutting down");
                    break;
                }
            }

            match self.refresh_endpoints().await {
                Ok(()) => tracing::debug!("Service urls refreshed"),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to refresh service urls, keeping previous pool")
                }
            }
        }
    }
}
