//! Registration state machine
//!
//! Drives the instance descriptor through
//! `Unregistered → Registering → RegisteredStarting → Up` against one
//! endpoint. Failures go back to `Registering` after the fixed retry
//! interval; registration never gives up on its own.

use serde::Serialize;
use tokio::task::JoinHandle;

use super::{Client, Lifecycle, StopSignal};
use crate::endpoint::select_endpoint;
use crate::error::{DiscoveryError, Result};
use crate::models::InstanceStatus;

/// Registration progress against one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPhase {
    #[default]
    Unregistered,
    Registering,
    RegisteredStarting,
    Up,
}

impl Client {
    /// Register against the selected endpoint and mark the instance UP
    ///
    /// Retries until it succeeds. Returns immediately when self-registration
    /// is disabled.
    pub async fn register_once(&self) -> Result<()> {
        self.register_until_stopped(None, &mut StopSignal::never())
            .await
    }

    /// Register against every known endpoint concurrently
    ///
    /// One task is spawned per endpoint, each pinned to the endpoint the
    /// cursor pointed at when it was launched; the cursor advances once per
    /// endpoint. Tasks still retrying end once the client de-registers.
    pub async fn register_with_all(&self) -> Vec<JoinHandle<()>> {
        let stop = self.bind(StopSignal::never(), Lifecycle::Deregistered);
        self.register_with_all_until(&stop).await
    }

    pub(crate) async fn register_with_all_until(&self, stop: &StopSignal) -> Vec<JoinHandle<()>> {
        if !self.inner.config.register_with_eureka {
            return Vec::new();
        }

        let endpoints = self.endpoints().await;
        let mut tasks = Vec::with_capacity(endpoints.len());

        for _ in 0..endpoints.len() {
            let target = select_endpoint(&endpoints, self.inner.cursor.current()).map(str::to_string);
            let client = self.clone();
            let mut stop = stop.clone();

            tasks.push(tokio::spawn(async move {
                match client.register_until_stopped(target.as_deref(), &mut stop).await {
                    Ok(()) | Err(DiscoveryError::Stopped) => {}
                    Err(e) => tracing::error!(error = %e, "Registration aborted"),
                }
            }));

            self.inner.cursor.advance();
        }

        tasks
    }

    /// Registration loop against `pinned`, or the selected endpoint per attempt
    pub(crate) async fn register_until_stopped(
        &self,
        pinned: Option<&str>,
        stop: &mut StopSignal,
    ) -> Result<()> {
        if !self.inner.config.register_with_eureka {
            return Ok(());
        }

        loop {
            if stop.is_stopped() {
                return Err(DiscoveryError::Stopped);
            }

            let Some(instance) = self.instance().await else {
                tracing::error!("Instance descriptor can't be empty");
                return Err(DiscoveryError::MissingInstanceDescriptor);
            };

            let api = match pinned {
                Some(url) => self.inner.api_factory.create(url),
                None => match self.api().await {
                    Ok(api) => api,
                    Err(e) => {
                        tracing::warn!(error = %e, "No endpoint to register with");
                        if self.pause(stop).await {
                            return Err(DiscoveryError::Stopped);
                        }
                        continue;
                    }
                },
            };
            let endpoint = api.base_url().to_string();

            self.set_phase(&endpoint, RegistrationPhase::Registering)
                .await;

            let instance_id = match api.register(&instance).await {
                Ok(id) if stop.is_stopped() && self.is_deregistered() => {
                    // raced a de-registration pass that already visited this endpoint
                    if let Err(e) = api.deregister(&instance.app, &id).await {
                        tracing::warn!(
                            endpoint = %endpoint,
                            instance_id = %id,
                            error = %e,
                            "Failed to withdraw late registration"
                        );
                    }
                    return Err(DiscoveryError::Stopped);
                }
                Ok(_) if stop.is_stopped() => return Err(DiscoveryError::Stopped),
                Ok(id) => id,
                Err(e) => {
                    let err = DiscoveryError::RegistrationFailed(e);
                    tracing::error!(endpoint = %endpoint, app = %instance.app, error = %err, "Client register failed");
                    if self.pause(stop).await {
                        return Err(DiscoveryError::Stopped);
                    }
                    continue;
                }
            };

            {
                let mut state = self.inner.state.write().await;
                if let Some(current) = state.instance.as_mut() {
                    current.instance_id = instance_id.clone();
                }
                state
                    .phases
                    .insert(endpoint.clone(), RegistrationPhase::RegisteredStarting);
            }

            if stop.is_stopped() {
                return Err(DiscoveryError::Stopped);
            }

            if let Err(e) = api
                .update_status(&instance.app, &instance_id, InstanceStatus::Up)
                .await
            {
                let err = DiscoveryError::RegistrationFailed(e);
                tracing::error!(endpoint = %endpoint, instance_id = %instance_id, error = %err, "Client UP failed");
                if self.pause(stop).await {
                    return Err(DiscoveryError::Stopped);
                }
                continue;
            }

            {
                let mut state = self.inner.state.write().await;
                if let Some(current) = state.instance.as_mut() {
                    current.status = InstanceStatus::Up;
                }
                state.phases.insert(endpoint.clone(), RegistrationPhase::Up);
            }

            tracing::info!(
                endpoint = %endpoint,
                app = %instance.app,
                instance_id = %instance_id,
                "Instance registered and UP"
            );

            return Ok(());
        }
    }

    pub(crate) async fn set_phase(&self, endpoint: &str, phase: RegistrationPhase) {
        self.inner
            .state
            .write()
            .await
            .phases
            .insert(endpoint.to_string(), phase);
    }
}
