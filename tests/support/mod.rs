//! In-memory discovery cluster used by the scenario tests
//!
//! Every endpoint URL maps to a scripted behaviour; every call is appended to
//! a shared log so tests can assert on ordering.

#![allow(dead_code)]

use async_trait::async_trait;
use beacon::api::{ApiError, ServerApi, ServerApiFactory};
use beacon::config::ClientConfig;
use beacon::models::{InstanceDescriptor, InstanceStatus, Registry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Register,
    UpdateStatus,
    Heartbeat,
    Deregister,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub url: String,
    pub op: Op,
    pub ok: bool,
}

/// Runs inside a call, after it was recorded
pub type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default, Clone)]
pub struct Behavior {
    pub fail_register: bool,
    pub fail_update_status: bool,
    pub heartbeat_failures: usize,
    pub fail_deregister: bool,
    pub fail_query: bool,
    pub registry: Registry,
    pub on_deregister: Option<Hook>,
}

#[derive(Default)]
struct ClusterState {
    behaviors: HashMap<String, Behavior>,
    calls: Vec<Call>,
}

#[derive(Clone, Default)]
pub struct StubCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl StubCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&self, url: &str, f: impl FnOnce(&mut Behavior)) {
        let mut state = self.state.lock().unwrap();
        f(state.behaviors.entry(url.to_string()).or_default());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, url: &str, op: Op) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.url == url && c.op == op)
            .count()
    }

    pub fn urls_for(&self, op: Op) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op)
            .map(|c| c.url)
            .collect()
    }

    fn record(&self, url: &str, op: Op, decide: impl FnOnce(&mut Behavior) -> bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let ok = decide(state.behaviors.entry(url.to_string()).or_default());
        state.calls.push(Call {
            url: url.to_string(),
            op,
            ok,
        });
        ok
    }

    fn hook(&self, url: &str) -> Option<Hook> {
        let state = self.state.lock().unwrap();
        state.behaviors.get(url).and_then(|b| b.on_deregister.clone())
    }

    fn registry(&self, url: &str) -> Registry {
        let state = self.state.lock().unwrap();
        state
            .behaviors
            .get(url)
            .map(|b| b.registry.clone())
            .unwrap_or_default()
    }
}

fn unavailable(url: &str) -> ApiError {
    ApiError::Unavailable(url.to_string())
}

pub struct StubApi {
    url: String,
    cluster: StubCluster,
}

#[async_trait]
impl ServerApi for StubApi {
    fn base_url(&self) -> &str {
        &self.url
    }

    async fn register(&self, instance: &InstanceDescriptor) -> Result<String, ApiError> {
        if self.cluster.record(&self.url, Op::Register, |b| !b.fail_register) {
            Ok(instance.effective_instance_id())
        } else {
            Err(unavailable(&self.url))
        }
    }

    async fn update_status(
        &self,
        _app: &str,
        _instance_id: &str,
        _status: InstanceStatus,
    ) -> Result<(), ApiError> {
        if self
            .cluster
            .record(&self.url, Op::UpdateStatus, |b| !b.fail_update_status)
        {
            Ok(())
        } else {
            Err(unavailable(&self.url))
        }
    }

    async fn heartbeat(&self, _app: &str, _instance_id: &str) -> Result<(), ApiError> {
        let ok = self.cluster.record(&self.url, Op::Heartbeat, |b| {
            if b.heartbeat_failures > 0 {
                b.heartbeat_failures -= 1;
                false
            } else {
                true
            }
        });

        if ok {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: 404,
                message: "instance not found".to_string(),
            })
        }
    }

    async fn deregister(&self, _app: &str, _instance_id: &str) -> Result<(), ApiError> {
        let ok = self
            .cluster
            .record(&self.url, Op::Deregister, |b| !b.fail_deregister);
        if let Some(hook) = self.cluster.hook(&self.url) {
            hook();
        }

        if ok {
            Ok(())
        } else {
            Err(unavailable(&self.url))
        }
    }

    async fn query_all_instances(&self) -> Result<Registry, ApiError> {
        if self.cluster.record(&self.url, Op::Query, |b| !b.fail_query) {
            Ok(self.cluster.registry(&self.url))
        } else {
            Err(unavailable(&self.url))
        }
    }
}

impl ServerApiFactory for StubCluster {
    fn create(&self, base_url: &str) -> Arc<dyn ServerApi> {
        Arc::new(StubApi {
            url: base_url.to_string(),
            cluster: self.clone(),
        })
    }
}

/// Config over `urls` with registry fetching off and signals not exiting
pub fn stub_config(urls: &[&str]) -> ClientConfig {
    ClientConfig::default()
        .with_service_urls("defaultZone", urls)
        .with_fetch_registry(false, 30)
        .with_heartbeat_interval_secs(30)
        .with_retry_interval_secs(3)
        .with_exit_on_signal(false)
}
