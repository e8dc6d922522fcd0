//! Shutdown coordinator
//!
//! On a termination notification every known endpoint is told to drop this
//! instance, one attempt each in rotation order. Failures are logged and do
//! not hold up the remaining endpoints. Registration and heartbeats are
//! halted first so nothing puts the instance back afterwards.

use serde::Serialize;
use std::future::Future;
use tokio::task::JoinHandle;

use super::{Client, Lifecycle, RegistrationPhase, StopSignal};
use crate::endpoint::select_endpoint;
use crate::error::DiscoveryError;

/// Outcome of a de-registration pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeregistrationSummary {
    /// Endpoints that accepted the de-registration
    pub succeeded: Vec<String>,

    /// Endpoints where it failed
    pub failed: Vec<String>,
}

impl DeregistrationSummary {
    /// Endpoints contacted, in order
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Resolves on SIGINT or SIGTERM (ctrl-c only on non-unix targets)
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

impl Client {
    /// De-register from every known endpoint without exiting
    ///
    /// Registration and heartbeat loops stop for good; the refresh loops keep
    /// running. Endpoints are visited starting at the cursor position read on
    /// entry, so a concurrent rotation cannot skip one.
    pub async fn deregister_now(&self) -> DeregistrationSummary {
        self.advance_lifecycle(Lifecycle::Deregistered);

        let mut summary = DeregistrationSummary::default();

        let Some(instance) = self.instance().await else {
            tracing::error!("Instance descriptor can't be empty, nothing to de-register");
            return summary;
        };

        tracing::info!(
            instance_id = %instance.instance_id,
            "Client instance going to de-register"
        );

        let endpoints = self.endpoints().await;
        let start = self.inner.cursor.current();
        for offset in 0..endpoints.len() as u64 {
            let Some(url) = select_endpoint(&endpoints, start.wrapping_add(offset)) else {
                break;
            };
            let api = self.inner.api_factory.create(url);

            match api.deregister(&instance.app, &instance.instance_id).await {
                Ok(()) => {
                    tracing::info!(endpoint = %url, instance_id = %instance.instance_id, "De-register success");
                    self.set_phase(url, RegistrationPhase::Unregistered).await;
                    summary.succeeded.push(url.to_string());
                }
                Err(e) => {
                    let err = DiscoveryError::DeregisterFailed(e);
                    tracing::error!(
                        endpoint = %url,
                        instance_id = %instance.instance_id,
                        error = %err,
                        "Failed to de-register"
                    );
                    summary.failed.push(url.to_string());
                }
            }

            self.inner.cursor.advance();
        }

        summary
    }

    pub(crate) fn spawn_shutdown_coordinator<F>(
        &self,
        signal: F,
        mut stop: StopSignal,
    ) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let client = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = signal => {}
                _ = stop.stopped() => {
                    tracing::debug!("Shutdown coordinator stopped");
                    return;
                }
            }

            tracing::info!("Received exit signal");
            client.advance_lifecycle(Lifecycle::Terminated);
            let summary = client.deregister_now().await;
            tracing::info!(
                succeeded = summary.succeeded.len(),
                failed = summary.failed.len(),
                "De-registration finished"
            );

            if client.inner.config.exit_on_signal {
                std::process::exit(0);
            }
        })
    }
}
