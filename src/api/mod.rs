//! Discovery server API
//!
//! [`ServerApi`] is the per-endpoint contract the client drives: the five
//! REST operations against one discovery server base URL. A
//! [`ServerApiFactory`] turns the currently selected base URL into a handle.
//! [`rest`] provides the default HTTP implementation.

pub mod rest;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{InstanceDescriptor, InstanceStatus, Registry};

pub use rest::{RestApiFactory, RestServerApi};

/// Errors returned by a single discovery server call
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP error ({status}): {message}")]
    Status { status: u16, message: String },

    /// Response body could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Endpoint cannot be reached at all
    #[error("Server unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    /// Status code, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// REST operations against one discovery server endpoint
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Base URL this handle talks to
    fn base_url(&self) -> &str;

    /// Register an instance, returning the identifier it was registered under
    async fn register(&self, instance: &InstanceDescriptor) -> Result<String, ApiError>;

    /// Change the status of a registered instance
    async fn update_status(
        &self,
        app: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<(), ApiError>;

    /// Renew the lease of a registered instance
    async fn heartbeat(&self, app: &str, instance_id: &str) -> Result<(), ApiError>;

    /// Remove a registered instance
    async fn deregister(&self, app: &str, instance_id: &str) -> Result<(), ApiError>;

    /// Fetch every registered application, keyed by application name
    async fn query_all_instances(&self) -> Result<Registry, ApiError>;
}

/// Produces [`ServerApi`] handles for base URLs
pub trait ServerApiFactory: Send + Sync {
    fn create(&self, base_url: &str) -> Arc<dyn ServerApi>;
}
