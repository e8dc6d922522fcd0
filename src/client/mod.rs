//! Discovery client orchestration
//!
//! [`Client`] owns the shared state (endpoint pool, rotation cursor, instance
//! descriptor, registry cache) and wires the background loops together.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   Client                      │
//! │                                               │
//! │  RwLock<ClientState>        RotationCursor    │
//! │  - endpoints                (AtomicU64)       │
//! │  - instance descriptor                        │
//! │  - registry snapshot                          │
//! │  - registration phases                        │
//! │                                               │
//! │  tasks:                                       │
//! │  - registration fan-out (one per endpoint)    │
//! │  - heartbeat                                  │
//! │  - registry refresh        (fetch_registry)   │
//! │  - endpoint refresh        (DNS auto update)  │
//! │  - shutdown coordinator    (SIGINT/SIGTERM)   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use beacon::client::Client;
//! use beacon::config::ClientConfig;
//!
//! let client = Client::builder(ClientConfig::from_env()?)
//!     .register_self("ORDERS", 9000)
//!     .build()?;
//! let handle = client.run().await?;
//! handle.wait().await;
//! ```

pub mod heartbeat;
pub mod refresh;
pub mod registration;
pub mod shutdown;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::api::{RestApiFactory, ServerApi, ServerApiFactory};
use crate::config::{ClientConfig, ConfigError};
use crate::endpoint::{
    resolve_endpoints, select_endpoint, EndpointResolver, RotationCursor, StaticEndpointResolver,
};
use crate::error::{DiscoveryError, Result};
use crate::models::{InstanceDescriptor, Registry};

pub use registration::RegistrationPhase;
pub use shutdown::{termination_signal, DeregistrationSummary};

// ============================================================================
// Shared State
// ============================================================================

/// Everything guarded by the client's reader/writer lock
#[derive(Debug, Default)]
pub(crate) struct ClientState {
    pub(crate) endpoints: Vec<String>,
    pub(crate) instance: Option<InstanceDescriptor>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) phases: HashMap<String, RegistrationPhase>,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) state: RwLock<ClientState>,
    pub(crate) cursor: RotationCursor,
    pub(crate) lifecycle: watch::Sender<Lifecycle>,
    pub(crate) resolver: Arc<dyn EndpointResolver>,
    pub(crate) api_factory: Arc<dyn ServerApiFactory>,
}

// ============================================================================
// Client Builder
// ============================================================================

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: ClientConfig,
    instance: Option<InstanceDescriptor>,
    resolver: Option<Arc<dyn EndpointResolver>>,
    api_factory: Option<Arc<dyn ServerApiFactory>>,
}

impl ClientBuilder {
    /// Register an application listening on `port`
    pub fn register_self(mut self, app_id: impl Into<String>, port: u16) -> Self {
        self.instance = Some(InstanceDescriptor::new(app_id, port));
        self
    }

    /// Register a fully specified instance descriptor
    pub fn instance(mut self, instance: InstanceDescriptor) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Use a custom endpoint resolver
    pub fn resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use a custom server API factory
    pub fn api_factory(mut self, factory: Arc<dyn ServerApiFactory>) -> Self {
        self.api_factory = Some(factory);
        self
    }

    /// Validate the configuration and build the client
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(StaticEndpointResolver));

        if self.config.use_dns_for_fetching_service_urls && !resolver.supports_dns() {
            return Err(ConfigError::InvalidValue {
                field: "use_dns_for_fetching_service_urls".to_string(),
                reason: "The endpoint resolver does not support DNS resolution".to_string(),
            }
            .into());
        }

        let api_factory: Arc<dyn ServerApiFactory> = match self.api_factory {
            Some(factory) => factory,
            None => Arc::new(
                RestApiFactory::new(self.config.request_timeout()).map_err(|e| {
                    ConfigError::InvalidValue {
                        field: "request_timeout_secs".to_string(),
                        reason: format!("Failed to build HTTP client: {e}"),
                    }
                })?,
            ),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                state: RwLock::new(ClientState {
                    instance: self.instance,
                    ..Default::default()
                }),
                cursor: RotationCursor::default(),
                lifecycle: watch::Sender::new(Lifecycle::Running),
                resolver,
                api_factory,
            }),
        })
    }
}

// ============================================================================
// Client
// ============================================================================

/// Service-discovery client
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("region", &self.inner.config.region)
            .field("cursor", &self.inner.cursor.current())
            .finish()
    }
}

impl Client {
    /// Start building a client for `config`
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            instance: None,
            resolver: None,
            api_factory: None,
        }
    }

    /// Configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Start every background loop, de-registering on SIGINT/SIGTERM
    ///
    /// Returns as soon as the loops are spawned. The loops keep running until
    /// the process exits, even if the returned handle is dropped.
    pub async fn run(&self) -> Result<ClientHandle> {
        self.run_with_shutdown(termination_signal()).await
    }

    /// Start every background loop, de-registering when `signal` completes
    pub async fn run_with_shutdown<F>(&self, signal: F) -> Result<ClientHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.inner.config;

        if config.register_with_eureka && self.instance().await.is_none() {
            tracing::error!("Instance descriptor can't be empty when registration is enabled");
            return Err(DiscoveryError::MissingInstanceDescriptor);
        }

        if let Err(e) = self.refresh_endpoints().await {
            tracing::error!(error = %e, "Failed to refresh service urls");
            return Err(e);
        }

        let mut handle = ClientHandle::default();

        if config.dns_auto_refresh_enabled() {
            let stop = self.add_loop(&mut handle, LoopKind::EndpointRefresh);
            handle.push_task(LoopKind::EndpointRefresh, self.spawn_endpoint_refresh(stop));
        }

        let stop = self.add_loop(&mut handle, LoopKind::ShutdownCoordinator);
        handle.push_task(
            LoopKind::ShutdownCoordinator,
            self.spawn_shutdown_coordinator(signal, stop),
        );

        if config.fetch_registry {
            let stop = self.add_loop(&mut handle, LoopKind::RegistryRefresh);
            handle.push_task(LoopKind::RegistryRefresh, self.spawn_registry_refresh(stop));
        }

        if config.register_with_eureka {
            let stop = self.add_loop(&mut handle, LoopKind::Registration);
            for task in self.register_with_all_until(&stop).await {
                handle.push_task(LoopKind::Registration, task);
            }

            let stop = self.add_loop(&mut handle, LoopKind::Heartbeat);
            handle.push_task(LoopKind::Heartbeat, self.spawn_heartbeat(stop));
        }

        tracing::info!(
            region = %config.region,
            endpoints = self.endpoints().await.len(),
            loops = ?handle.running_loops(),
            "Discovery client started"
        );

        Ok(handle)
    }

    /// Snapshot of the instance descriptor
    pub async fn instance(&self) -> Option<InstanceDescriptor> {
        self.inner.state.read().await.instance.clone()
    }

    /// Snapshot of the mirrored registry
    ///
    /// The snapshot always comes from a single refresh cycle.
    pub async fn current_registry(&self) -> Arc<Registry> {
        Arc::clone(&self.inner.state.read().await.registry)
    }

    /// Registration phase per endpoint
    pub async fn registration_phases(&self) -> HashMap<String, RegistrationPhase> {
        self.inner.state.read().await.phases.clone()
    }

    /// Current endpoint pool
    pub async fn endpoints(&self) -> Vec<String> {
        self.inner.state.read().await.endpoints.clone()
    }

    /// Current rotation cursor position
    pub fn cursor(&self) -> u64 {
        self.inner.cursor.current()
    }

    /// Move to the next endpoint, returning the new cursor position
    pub fn rotate(&self) -> u64 {
        self.inner.cursor.advance()
    }

    /// Base URL of the currently selected endpoint
    ///
    /// When the pool was never populated, one resolution attempt is made first.
    pub async fn select_current(&self) -> Result<String> {
        {
            let state = self.inner.state.read().await;
            if let Some(url) = select_endpoint(&state.endpoints, self.inner.cursor.current()) {
                return Ok(url.to_string());
            }
        }

        if let Err(e) = self.refresh_endpoints().await {
            tracing::error!(error = %e, "No service url is available to pick");
            return Err(DiscoveryError::NoEndpointsAvailable);
        }

        let state = self.inner.state.read().await;
        select_endpoint(&state.endpoints, self.inner.cursor.current())
            .map(str::to_string)
            .ok_or(DiscoveryError::NoEndpointsAvailable)
    }

    /// API handle for the currently selected endpoint
    pub async fn api(&self) -> Result<Arc<dyn ServerApi>> {
        let url = self.select_current().await?;
        Ok(self.inner.api_factory.create(&url))
    }

    /// Re-resolve the endpoint pool and swap it in
    ///
    /// On failure the previous pool is kept. Registration phases of endpoints
    /// that left the pool are dropped.
    pub async fn refresh_endpoints(&self) -> Result<()> {
        let urls = resolve_endpoints(self.inner.resolver.as_ref(), &self.inner.config).await?;

        let mut state = self.inner.state.write().await;
        state.phases.retain(|url, _| urls.contains(url));
        state.endpoints = urls;
        Ok(())
    }

    /// Whether [`Client::deregister_now`] or the shutdown coordinator has run
    pub fn is_deregistered(&self) -> bool {
        *self.inner.lifecycle.borrow() >= Lifecycle::Deregistered
    }

    /// Move the client lifecycle forward; it never moves back
    pub(crate) fn advance_lifecycle(&self, to: Lifecycle) {
        self.inner.lifecycle.send_if_modified(|current| {
            if *current < to {
                *current = to;
                true
            } else {
                false
            }
        });
    }

    /// Make `stop` also fire once the client lifecycle reaches `at`
    pub(crate) fn bind(&self, stop: StopSignal, at: Lifecycle) -> StopSignal {
        StopSignal {
            lifecycle: Some((self.inner.lifecycle.subscribe(), at)),
            ..stop
        }
    }

    fn add_loop(&self, handle: &mut ClientHandle, kind: LoopKind) -> StopSignal {
        self.bind(handle.add_loop(kind), kind.stops_at())
    }

    /// Sleep the retry interval; returns `true` if stopped meanwhile
    pub(crate) async fn pause(&self, stop: &mut StopSignal) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.inner.config.retry_interval()) => false,
            _ = stop.stopped() => true,
        }
    }
}

// ============================================================================
// Loop Control
// ============================================================================

/// Background loops started by [`Client::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Registration,
    Heartbeat,
    RegistryRefresh,
    EndpointRefresh,
    ShutdownCoordinator,
}

impl LoopKind {
    /// Lifecycle stage at which the loop ends without being asked
    fn stops_at(self) -> Lifecycle {
        match self {
            Self::Registration | Self::Heartbeat => Lifecycle::Deregistered,
            Self::RegistryRefresh | Self::EndpointRefresh | Self::ShutdownCoordinator => {
                Lifecycle::Terminated
            }
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registration => "registration",
            Self::Heartbeat => "heartbeat",
            Self::RegistryRefresh => "registry-refresh",
            Self::EndpointRefresh => "endpoint-refresh",
            Self::ShutdownCoordinator => "shutdown-coordinator",
        };
        f.write_str(name)
    }
}

/// Client-wide progress towards shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Lifecycle {
    Running,
    /// Removed from the servers; registration and heartbeats must not resume
    Deregistered,
    /// Every loop winds down
    Terminated,
}

/// Receiving side of a loop's stop handle
///
/// Fires when the loop's own handle asks it to stop, or when the client
/// lifecycle reaches the bound stage. If the sending side of the loop handle
/// is dropped, only the lifecycle can stop the loop.
#[derive(Debug, Clone, Default)]
pub(crate) struct StopSignal {
    own: Option<watch::Receiver<bool>>,
    lifecycle: Option<(watch::Receiver<Lifecycle>, Lifecycle)>,
}

impl StopSignal {
    pub(crate) fn never() -> Self {
        Self::default()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        let own = self.own.as_ref().is_some_and(|rx| *rx.borrow());
        let lifecycle = self
            .lifecycle
            .as_ref()
            .is_some_and(|(rx, at)| *rx.borrow() >= *at);
        own || lifecycle
    }

    /// Resolves once a stop has been requested
    pub(crate) async fn stopped(&mut self) {
        loop {
            if self.is_stopped() {
                return;
            }

            let Self { own, lifecycle } = self;
            tokio::select! {
                _ = changed(own.as_mut()) => {}
                _ = changed(lifecycle.as_mut().map(|(rx, _)| rx)) => {}
            }
        }
    }
}

/// Resolves on the next value; pending forever without a live sender
async fn changed<T>(rx: Option<&mut watch::Receiver<T>>) {
    if let Some(rx) = rx {
        if rx.changed().await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

struct LoopHandle {
    kind: LoopKind,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Stop handles for the loops of a running [`Client`]
#[derive(Default)]
pub struct ClientHandle {
    loops: Vec<LoopHandle>,
}

impl ClientHandle {
    fn add_loop(&mut self, kind: LoopKind) -> StopSignal {
        let (stop, rx) = watch::channel(false);
        self.loops.push(LoopHandle {
            kind,
            stop,
            tasks: Vec::new(),
        });
        StopSignal {
            own: Some(rx),
            lifecycle: None,
        }
    }

    fn push_task(&mut self, kind: LoopKind, task: JoinHandle<()>) {
        if let Some(entry) = self.loops.iter_mut().find(|l| l.kind == kind) {
            entry.tasks.push(task);
        }
    }

    /// Ask one loop to stop; returns `false` if it was never started
    pub fn stop(&self, kind: LoopKind) -> bool {
        match self.loops.iter().find(|l| l.kind == kind) {
            Some(entry) => {
                entry.stop.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Whether any task of the loop is still running
    pub fn is_running(&self, kind: LoopKind) -> bool {
        self.loops
            .iter()
            .filter(|l| l.kind == kind)
            .any(|l| l.tasks.iter().any(|t| !t.is_finished()))
    }

    /// Loops with at least one live task
    pub fn running_loops(&self) -> Vec<LoopKind> {
        self.loops
            .iter()
            .filter(|l| l.tasks.iter().any(|t| !t.is_finished()))
            .map(|l| l.kind)
            .collect()
    }

    /// Wait for every task to complete
    pub async fn wait(self) {
        let tasks = self.loops.into_iter().flat_map(|l| l.tasks);
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Background task failed");
            }
        }
    }

    /// Stop every loop and wait for them to finish
    pub async fn shutdown(self) {
        for entry in &self.loops {
            entry.stop.send_replace(true);
            tracing::debug!(task = %entry.kind, "Stop requested");
        }
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = ClientConfig::default().with_heartbeat_interval_secs(0);
        let result = Client::builder(config).register_self("APP", 8080).build();
        assert!(matches!(result, Err(DiscoveryError::Config(_))));
    }

    #[test]
    fn test_build_rejects_dns_without_resolver() {
        let config = ClientConfig::default().with_dns_resolution(true, 60);
        let result = Client::builder(config).register_self("APP", 8080).build();
        assert!(matches!(result, Err(DiscoveryError::Config(_))));
    }

    #[tokio::test]
    async fn test_register_self_builds_descriptor() {
        let client = Client::builder(ClientConfig::default())
            .register_self("APP_ID_CLIENT_FROM_CONFIG", 9000)
            .build()
            .unwrap();

        let instance = client.instance().await.unwrap();
        assert_eq!(instance.app, "APP_ID_CLIENT_FROM_CONFIG");
        assert_eq!(instance.port.port, 9000);
        assert!(client.current_registry().await.is_empty());
    }

    #[tokio::test]
    async fn test_select_current_resolves_lazily() {
        let config = ClientConfig::default()
            .with_service_urls("defaultZone", &["http://a/eureka", "http://b/eureka"]);
        let client = Client::builder(config).build().unwrap();

        assert!(client.endpoints().await.is_empty());
        assert_eq!(client.select_current().await.unwrap(), "http://a/eureka");
        assert_eq!(client.endpoints().await.len(), 2);

        client.rotate();
        assert_eq!(client.select_current().await.unwrap(), "http://b/eureka");
        client.rotate();
        assert_eq!(client.select_current().await.unwrap(), "http://a/eureka");
    }

    struct UnreachableResolver;

    #[async_trait::async_trait]
    impl EndpointResolver for UnreachableResolver {
        async fn resolve_zone_urls(
            &self,
            _config: &ClientConfig,
            _zone: &str,
        ) -> Result<Vec<String>> {
            Err(DiscoveryError::NoEndpointsAvailable)
        }
    }

    #[tokio::test]
    async fn test_select_current_fails_when_resolution_fails() {
        let client = Client::builder(ClientConfig::default())
            .resolver(Arc::new(UnreachableResolver))
            .build()
            .unwrap();

        let result = client.select_current().await;
        assert!(matches!(result, Err(DiscoveryError::NoEndpointsAvailable)));
        assert!(client.endpoints().await.is_empty());
        assert!(client.api().await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_endpoints_drops_phases_of_departed_urls() {
        let config = ClientConfig::default()
            .with_service_urls("defaultZone", &["http://a/eureka", "http://b/eureka"]);
        let client = Client::builder(config).build().unwrap();

        client.set_phase("http://a/eureka", RegistrationPhase::Up).await;
        client
            .set_phase("http://gone/eureka", RegistrationPhase::Registering)
            .await;
        client.refresh_endpoints().await.unwrap();

        let phases = client.registration_phases().await;
        assert_eq!(phases.len(), 1);
        assert_eq!(phases.get("http://a/eureka"), Some(&RegistrationPhase::Up));
    }

    #[tokio::test]
    async fn test_lifecycle_stops_bound_signals_in_stages() {
        let client = Client::builder(ClientConfig::default()).build().unwrap();
        let mut heartbeat = client.bind(StopSignal::never(), Lifecycle::Deregistered);
        let refresh = client.bind(StopSignal::never(), Lifecycle::Terminated);

        client.advance_lifecycle(Lifecycle::Deregistered);
        assert!(client.is_deregistered());
        assert!(heartbeat.is_stopped());
        assert!(!refresh.is_stopped());
        tokio::time::timeout(Duration::from_secs(1), heartbeat.stopped())
            .await
            .expect("bound signal should resolve");

        client.advance_lifecycle(Lifecycle::Terminated);
        assert!(refresh.is_stopped());

        // never moves back
        client.advance_lifecycle(Lifecycle::Running);
        assert!(client.is_deregistered());
    }

    #[tokio::test]
    async fn test_run_without_instance_fails() {
        let client = Client::builder(ClientConfig::default()).build().unwrap();
        let result = client.run_with_shutdown(std::future::pending()).await;
        assert!(matches!(result, Err(DiscoveryError::MissingInstanceDescriptor)));
    }

    #[tokio::test]
    async fn test_stop_signal() {
        let mut handle = ClientHandle::default();
        let mut stop = handle.add_loop(LoopKind::Heartbeat);
        assert!(!stop.is_stopped());

        assert!(handle.stop(LoopKind::Heartbeat));
        assert!(!handle.stop(LoopKind::RegistryRefresh));
        assert!(stop.is_stopped());

        tokio::time::timeout(Duration::from_secs(1), stop.stopped())
            .await
            .expect("stop should resolve");
    }

    #[tokio::test]
    async fn test_dropped_handle_never_stops() {
        let mut handle = ClientHandle::default();
        let mut stop = handle.add_loop(LoopKind::Heartbeat);
        drop(handle);

        let result = tokio::time::timeout(Duration::from_millis(50), stop.stopped()).await;
        assert!(result.is_err());
    }
}
