//! Heartbeat loop
//!
//! Renews the lease against the selected endpoint on a fixed ticker. A
//! failed heartbeat rotates to the next endpoint; the following tick notices
//! the rotation and re-registers before heartbeating again, so a heartbeat
//! is never sent to an endpoint this instance was not registered with.

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{Client, StopSignal};
use crate::error::{DiscoveryError, Result};

impl Client {
    pub(crate) fn spawn_heartbeat(&self, stop: StopSignal) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.heartbeat_loop(stop).await })
    }

    async fn heartbeat_loop(&self, mut stop: StopSignal) {
        let period = self.inner.config.heartbeat_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_seen = self.inner.cursor.current();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.stopped() => {
                    tracing::info!("Heartbeat task shutting down");
                    break;
                }
            }

            match self.heartbeat_tick(&mut last_seen, &mut stop).await {
                Ok(()) => {}
                Err(DiscoveryError::Stopped) => {
                    tracing::info!("Heartbeat task shutting down");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Heartbeat task aborted");
                    break;
                }
            }
        }
    }

    /// One heartbeat cycle
    ///
    /// Transient failures are handled here and reported as `Ok`; only
    /// unrecoverable conditions are returned.
    pub(crate) async fn heartbeat_tick(
        &self,
        last_seen: &mut u64,
        stop: &mut StopSignal,
    ) -> Result<()> {
        if let Err(e) = self.select_current().await {
            tracing::warn!(error = %e, "No endpoint to send heartbeat to");
            if self.pause(stop).await {
                return Err(DiscoveryError::Stopped);
            }
            return Ok(());
        }

        if self.inner.cursor.current() != *last_seen {
            tracing::info!(
                cursor = self.inner.cursor.current(),
                "Endpoint rotated, re-registering before heartbeat"
            );
            self.register_until_stopped(None, stop).await?;
            *last_seen = self.inner.cursor.current();
        }

        let api = match self.api().await {
            Ok(api) => api,
            Err(e) => {
                tracing::warn!(error = %e, "No endpoint to send heartbeat to");
                if self.pause(stop).await {
                    return Err(DiscoveryError::Stopped);
                }
                return Ok(());
            }
        };

        let Some(instance) = self.instance().await else {
            return Err(DiscoveryError::MissingInstanceDescriptor);
        };

        if stop.is_stopped() {
            return Err(DiscoveryError::Stopped);
        }

        match api.heartbeat(&instance.app, &instance.instance_id).await {
            Ok(()) => {
                tracing::debug!(
                    url = %api.base_url(),
                    app = %instance.app,
                    instance_id = %instance.instance_id,
                    "Heartbeat"
                );
            }
            Err(e) => {
                let err = DiscoveryError::HeartbeatFailed(e);
                let cursor = self.rotate();
                tracing::warn!(
                    url = %api.base_url(),
                    instance_id = %instance.instance_id,
                    cursor,
                    error = %err,
                    "Failed to send heartbeat"
                );
                if self.pause(stop).await {
                    return Err(DiscoveryError::Stopped);
                }
            }
        }

        Ok(())
    }
}
