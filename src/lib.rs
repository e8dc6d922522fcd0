//! beacon - service-discovery client for Eureka-compatible servers
//!
//! Registers the host application with a cluster of discovery server
//! replicas, keeps the registration alive with heartbeats, optionally mirrors
//! the cluster registry locally, and de-registers on termination.
//!
//! # Architecture
//!
//! - [`config`] - Client configuration (TOML, environment, setters)
//! - [`models`] - Instance and application descriptors
//! - [`api`] - Per-endpoint REST contract and its HTTP implementation
//! - [`endpoint`] - Endpoint resolution and round-robin rotation
//! - [`client`] - Orchestration: registration, heartbeat, refresh, shutdown
//! - [`error`] - Error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use beacon::client::Client;
//! use beacon::config::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::default()
//!         .with_service_urls("defaultZone", &["http://localhost:8761/eureka"]);
//!     let client = Client::builder(config)
//!         .register_self("APP_ID_CLIENT", 9000)
//!         .build()?;
//!
//!     let handle = client.run().await?;
//!     handle.wait().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod models;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{ApiError, ServerApi, ServerApiFactory};
    pub use crate::client::{Client, ClientHandle, DeregistrationSummary, LoopKind, RegistrationPhase};
    pub use crate::config::ClientConfig;
    pub use crate::endpoint::EndpointResolver;
    pub use crate::error::{DiscoveryError, Result};
    pub use crate::models::{ApplicationDescriptor, InstanceDescriptor, InstanceStatus, Registry};
}

pub use client::Client;
pub use config::ClientConfig;
pub use error::DiscoveryError;
