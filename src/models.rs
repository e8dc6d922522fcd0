//! Registration record shapes
//!
//! These are plain value objects that mirror the Eureka v2 JSON payloads.
//! Unknown fields in server responses are ignored and missing ones default,
//! so the same types serve both for registration and for registry queries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Instance Status
// ============================================================================

/// Lifecycle status of a registered instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Registered, not yet ready to take traffic
    Starting,

    /// Ready to take traffic
    Up,

    /// Failed health checks
    Down,

    /// Deliberately taken out of rotation
    OutOfService,

    /// Anything the server reports that we do not recognise
    #[default]
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    /// Wire representation, as used in the status query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::OutOfService => "OUT_OF_SERVICE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Instance Descriptor
// ============================================================================

/// Port number with its enabled flag, in Eureka's `{"$": .., "@enabled": ..}` form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    #[serde(rename = "$")]
    pub port: u16,

    #[serde(rename = "@enabled")]
    pub enabled: String,
}

impl PortInfo {
    pub fn enabled(port: u16) -> Self {
        Self {
            port,
            enabled: "true".to_string(),
        }
    }

    pub fn disabled(port: u16) -> Self {
        Self {
            port,
            enabled: "false".to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled == "true"
    }
}

impl Default for PortInfo {
    fn default() -> Self {
        Self::disabled(0)
    }
}

/// Data center the instance runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCenterInfo {
    #[serde(rename = "@class")]
    pub class: String,

    pub name: String,
}

impl Default for DataCenterInfo {
    fn default() -> Self {
        Self {
            class: "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo".to_string(),
            name: "MyOwn".to_string(),
        }
    }
}

/// This process's registration record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceDescriptor {
    /// Identifier assigned at registration; empty until then
    pub instance_id: String,

    pub host_name: String,

    /// Application identifier
    pub app: String,

    pub ip_addr: String,

    pub status: InstanceStatus,

    pub port: PortInfo,

    pub secure_port: PortInfo,

    pub vip_address: String,

    pub secure_vip_address: String,

    pub data_center_info: DataCenterInfo,

    pub metadata: HashMap<String, String>,

    /// Milliseconds since the epoch of the last local modification
    pub last_dirty_timestamp: Option<i64>,
}

impl Default for InstanceDescriptor {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            host_name: local_host_name(),
            app: String::new(),
            ip_addr: "127.0.0.1".to_string(),
            status: InstanceStatus::Starting,
            port: PortInfo::default(),
            secure_port: PortInfo::disabled(443),
            vip_address: String::new(),
            secure_vip_address: String::new(),
            data_center_info: DataCenterInfo::default(),
            metadata: HashMap::new(),
            last_dirty_timestamp: None,
        }
    }
}

impl InstanceDescriptor {
    /// Describe an application listening on `port`, in STARTING status
    pub fn new(app_id: impl Into<String>, port: u16) -> Self {
        let app = app_id.into();
        let vip = app.to_lowercase();

        Self {
            port: PortInfo::enabled(port),
            vip_address: vip.clone(),
            secure_vip_address: vip,
            app,
            ..Default::default()
        }
    }

    /// Set host name
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    /// Set IP address
    pub fn with_ip_addr(mut self, ip_addr: impl Into<String>) -> Self {
        self.ip_addr = ip_addr.into();
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the instance has been assigned an identifier yet
    pub fn is_registered(&self) -> bool {
        !self.instance_id.is_empty()
    }

    /// Identifier to register under: the assigned one, or `host:app:port`
    pub fn effective_instance_id(&self) -> String {
        if self.is_registered() {
            self.instance_id.clone()
        } else {
            format!(
                "{}:{}:{}",
                self.host_name,
                self.app.to_lowercase(),
                self.port.port
            )
        }
    }
}

fn local_host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

// ============================================================================
// Application Descriptor
// ============================================================================

/// A named application and its registered instances
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationDescriptor {
    pub name: String,

    pub instance: Vec<InstanceDescriptor>,
}

impl ApplicationDescriptor {
    pub fn new(name: impl Into<String>, instances: Vec<InstanceDescriptor>) -> Self {
        Self {
            name: name.into(),
            instance: instances,
        }
    }

    /// Instances currently reporting UP
    pub fn up_instances(&self) -> impl Iterator<Item = &InstanceDescriptor> {
        self.instance
            .iter()
            .filter(|i| i.status == InstanceStatus::Up)
    }

    /// Copy of this application keeping only UP instances
    pub fn only_up(&self) -> Self {
        Self {
            name: self.name.clone(),
            instance: self.up_instances().cloned().collect(),
        }
    }
}

/// Local mirror of the server registry, keyed by application name
pub type Registry = HashMap<String, ApplicationDescriptor>;
