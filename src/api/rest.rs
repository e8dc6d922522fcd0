//! HTTP implementation of [`ServerApi`] for Eureka v2 JSON endpoints

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{ApiError, ServerApi, ServerApiFactory};
use crate::models::{ApplicationDescriptor, InstanceDescriptor, InstanceStatus, Registry};

// ============================================================================
// Wire Envelopes
// ============================================================================

#[derive(Serialize)]
struct InstanceEnvelope<'a> {
    instance: &'a InstanceDescriptor,
}

#[derive(Debug, Deserialize)]
struct ApplicationsEnvelope {
    applications: Applications,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Applications {
    application: Vec<ApplicationDescriptor>,
}

// ============================================================================
// Rest Server Api
// ============================================================================

/// [`ServerApi`] over HTTP for one base URL
#[derive(Debug, Clone)]
pub struct RestServerApi {
    base_url: String,
    http_client: Client,
}

impl RestServerApi {
    /// Create a handle with its own HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, http_client))
    }

    /// Create a handle sharing an existing HTTP client
    pub fn with_client(base_url: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    fn app_url(&self, app: &str) -> String {
        format!("{}/apps/{}", self.base_url, app)
    }

    fn instance_url(&self, app: &str, instance_id: &str) -> String {
        format!("{}/apps/{}/{}", self.base_url, app, instance_id)
    }

    async fn expect_success(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(ApiError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl ServerApi for RestServerApi {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn register(&self, instance: &InstanceDescriptor) -> Result<String, ApiError> {
        let mut payload = instance.clone();
        payload.instance_id = instance.effective_instance_id();
        payload.last_dirty_timestamp = Some(chrono::Utc::now().timestamp_millis());

        let response = self
            .http_client
            .post(self.app_url(&payload.app))
            .json(&InstanceEnvelope { instance: &payload })
            .send()
            .await?;
        Self::expect_success(response).await?;

        tracing::debug!(
            url = %self.base_url,
            app = %payload.app,
            instance_id = %payload.instance_id,
            "Registered instance"
        );

        Ok(payload.instance_id)
    }

    async fn update_status(
        &self,
        app: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<(), ApiError> {
        let url = format!("{}/status", self.instance_url(app, instance_id));
        let response = self
            .http_client
            .put(url)
            .query(&[("value", status.as_str())])
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn heartbeat(&self, app: &str, instance_id: &str) -> Result<(), ApiError> {
        let response = self
            .http_client
            .put(self.instance_url(app, instance_id))
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn deregister(&self, app: &str, instance_id: &str) -> Result<(), ApiError> {
        let response = self
            .http_client
            .delete(self.instance_url(app, instance_id))
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn query_all_instances(&self) -> Result<Registry, ApiError> {
        let response = self
            .http_client
            .get(format!("{}/apps", self.base_url))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let response = Self::expect_success(response).await?;

        let envelope: ApplicationsEnvelope = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        Ok(envelope
            .applications
            .application
            .into_iter()
            .map(|app| (app.name.clone(), app))
            .collect())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Builds [`RestServerApi`] handles sharing one connection pool
#[derive(Debug, Clone)]
pub struct RestApiFactory {
    http_client: Client,
}

impl RestApiFactory {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }
}

impl ServerApiFactory for RestApiFactory {
    fn create(&self, base_url: &str) -> Arc<dyn ServerApi> {
        Arc::new(RestServerApi::with_client(
            base_url,
            self.http_client.clone(),
        ))
    }
}
