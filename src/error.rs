//! Error types for the beacon discovery client
//!
//! [`DiscoveryError`] is the client-level taxonomy. Most variants describe
//! transient faults that the background loops recover from locally by
//! sleeping and/or rotating to another endpoint; only a handful ever surface
//! from [`Client::run`](crate::client::Client::run).
//!
//! # Usage
//!
//! ```rust,ignore
//! use beacon::error::DiscoveryError;
//!
//! fn handle_error(err: DiscoveryError) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "Retrying");
//!     } else {
//!         tracing::error!(error = %err, "Giving up");
//!     }
//! }
//! ```

use thiserror::Error;

pub use crate::api::ApiError;
pub use crate::config::ConfigError;

/// Errors produced by the discovery client
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Every availability zone of the region failed to yield service URLs
    #[error("No availability zone in region '{region}' yielded service urls")]
    NoZonesAvailable { region: String },

    /// The endpoint pool is empty and resolving it again failed
    #[error("No service url is available to pick")]
    NoEndpointsAvailable,

    /// Registering the instance (or marking it UP) failed
    #[error("Registration failed: {0}")]
    RegistrationFailed(#[source] ApiError),

    /// Heartbeat was rejected or could not be delivered
    #[error("Heartbeat failed: {0}")]
    HeartbeatFailed(#[source] ApiError),

    /// Registry query failed; the cached registry is left as it was
    #[error("Registry refresh failed: {0}")]
    RefreshFailed(#[source] ApiError),

    /// De-registration against one endpoint failed
    #[error("De-registration failed: {0}")]
    DeregisterFailed(#[source] ApiError),

    /// No instance descriptor was configured before running the client
    #[error("Instance descriptor is missing; call register_self or instance before run")]
    MissingInstanceDescriptor,

    /// Configuration is invalid
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The loop performing the operation was stopped
    #[error("Operation stopped before completion")]
    Stopped,
}

impl DiscoveryError {
    /// Check if this error is transient and worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NoEndpointsAvailable
            | Self::RegistrationFailed(_)
            | Self::HeartbeatFailed(_)
            | Self::RefreshFailed(_) => true,
            Self::NoZonesAvailable { .. }
            | Self::DeregisterFailed(_)
            | Self::MissingInstanceDescriptor
            | Self::Config(_)
            | Self::Stopped => false,
        }
    }
}

/// Result type alias using [`DiscoveryError`]
pub type Result<T> = std::result::Result<T, DiscoveryError>;
