//! Configuration for the discovery client
//!
//! [`ClientConfig`] can be loaded from a TOML file, from `BEACON_*`
//! environment variables, or assembled in code with the `with_*` setters.
//! It is validated once by [`ClientBuilder::build`](crate::client::ClientBuilder::build)
//! before any background loop starts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default availability zone name
pub const DEFAULT_ZONE: &str = "defaultZone";

/// Default discovery server URL
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8761/eureka";

/// Configuration for the discovery client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Region this client runs in
    pub region: String,

    /// Availability zones per region, in priority order
    pub availability_zones: HashMap<String, Vec<String>>,

    /// Discovery server base URLs per zone
    pub service_urls: HashMap<String, Vec<String>>,

    /// Resolve service URLs through DNS instead of `service_urls`
    pub use_dns_for_fetching_service_urls: bool,

    /// Periodically re-resolve service URLs (DNS mode only)
    pub auto_update_dns_service_urls: bool,

    /// Interval between DNS re-resolutions in seconds
    pub auto_update_dns_service_urls_interval_secs: u64,

    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,

    /// Mirror the server registry locally
    pub fetch_registry: bool,

    /// Registry fetch interval in seconds
    pub registry_fetch_interval_secs: u64,

    /// Keep only UP instances in the mirrored registry
    pub filter_only_up_instances: bool,

    /// Register this instance with the discovery servers
    pub register_with_eureka: bool,

    /// Fixed sleep after any failed network operation, in seconds
    pub retry_interval_secs: u64,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// Exit the process after de-registering on a termination signal
    pub exit_on_signal: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            availability_zones: HashMap::from([(
                DEFAULT_REGION.to_string(),
                vec![DEFAULT_ZONE.to_string()],
            )]),
            service_urls: HashMap::from([(
                DEFAULT_ZONE.to_string(),
                vec![DEFAULT_SERVICE_URL.to_string()],
            )]),
            use_dns_for_fetching_service_urls: false,
            auto_update_dns_service_urls: false,
            auto_update_dns_service_urls_interval_secs: 300,
            heartbeat_interval_secs: 30,
            fetch_registry: true,
            registry_fetch_interval_secs: 30,
            filter_only_up_instances: true,
            register_with_eureka: true,
            retry_interval_secs: 3,
            request_timeout_secs: 10,
            exit_on_signal: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `BEACON_REGION`: Region name [default: us-east-1]
    /// - `BEACON_ZONE`: Single availability zone for the region [default: defaultZone]
    /// - `BEACON_SERVICE_URLS`: Comma separated server URLs for that zone
    /// - `BEACON_HEARTBEAT_INTERVAL`: Heartbeat interval in seconds [default: 30]
    /// - `BEACON_FETCH_REGISTRY`: Mirror the registry [default: true]
    /// - `BEACON_REGISTRY_FETCH_INTERVAL`: Registry fetch interval in seconds [default: 30]
    /// - `BEACON_REGISTER_WITH_EUREKA`: Register this instance [default: true]
    /// - `BEACON_RETRY_INTERVAL`: Retry sleep in seconds [default: 3]
    /// - `BEACON_REQUEST_TIMEOUT`: HTTP timeout in seconds [default: 10]
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let region = env::var("BEACON_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string());
        let zone = env::var("BEACON_ZONE").unwrap_or_else(|_| DEFAULT_ZONE.to_string());
        let urls = env::var("BEACON_SERVICE_URLS")
            .map(|s| split_url_list(&s))
            .unwrap_or_else(|_| vec![DEFAULT_SERVICE_URL.to_string()]);

        let config = Self {
            availability_zones: HashMap::from([(region.clone(), vec![zone.clone()])]),
            service_urls: HashMap::from([(zone, urls)]),
            region,
            heartbeat_interval_secs: parse_env("BEACON_HEARTBEAT_INTERVAL")?
                .unwrap_or(defaults.heartbeat_interval_secs),
            fetch_registry: parse_env("BEACON_FETCH_REGISTRY")?.unwrap_or(defaults.fetch_registry),
            registry_fetch_interval_secs: parse_env("BEACON_REGISTRY_FETCH_INTERVAL")?
                .unwrap_or(defaults.registry_fetch_interval_secs),
            register_with_eureka: parse_env("BEACON_REGISTER_WITH_EUREKA")?
                .unwrap_or(defaults.register_with_eureka),
            retry_interval_secs: parse_env("BEACON_RETRY_INTERVAL")?
                .unwrap_or(defaults.retry_interval_secs),
            request_timeout_secs: parse_env("BEACON_REQUEST_TIMEOUT")?
                .unwrap_or(defaults.request_timeout_secs),
            ..defaults
        };

        Ok(config)
    }

    /// Set the region together with its zone list
    pub fn with_region(mut self, region: impl Into<String>, zones: &[&str]) -> Self {
        let region = region.into();
        self.availability_zones
            .insert(region.clone(), zones.iter().map(|z| z.to_string()).collect());
        self.region = region;
        self
    }

    /// Set the service URLs of one zone
    pub fn with_service_urls(mut self, zone: impl Into<String>, urls: &[&str]) -> Self {
        self.service_urls
            .insert(zone.into(), urls.iter().map(|u| u.to_string()).collect());
        self
    }

    /// Set heartbeat interval
    pub fn with_heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = secs;
        self
    }

    /// Enable/disable registry fetching and set its interval
    pub fn with_fetch_registry(mut self, enable: bool, interval_secs: u64) -> Self {
        self.fetch_registry = enable;
        self.registry_fetch_interval_secs = interval_secs;
        self
    }

    /// Enable/disable self-registration
    pub fn with_register_with_eureka(mut self, enable: bool) -> Self {
        self.register_with_eureka = enable;
        self
    }

    /// Enable DNS based resolution with optional auto refresh
    pub fn with_dns_resolution(mut self, auto_update: bool, interval_secs: u64) -> Self {
        self.use_dns_for_fetching_service_urls = true;
        self.auto_update_dns_service_urls = auto_update;
        self.auto_update_dns_service_urls_interval_secs = interval_secs;
        self
    }

    /// Set retry interval
    pub fn with_retry_interval_secs(mut self, secs: u64) -> Self {
        self.retry_interval_secs = secs;
        self
    }

    /// Set HTTP request timeout
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Choose whether a termination signal exits the process
    pub fn with_exit_on_signal(mut self, exit: bool) -> Self {
        self.exit_on_signal = exit;
        self
    }

    /// Availability zones of the configured region, in priority order
    pub fn availability_zones_for_region(&self) -> &[String] {
        self.availability_zones
            .get(&self.region)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Get registry fetch interval as Duration
    pub fn registry_fetch_interval(&self) -> Duration {
        Duration::from_secs(self.registry_fetch_interval_secs)
    }

    /// Get DNS refresh interval as Duration
    pub fn dns_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.auto_update_dns_service_urls_interval_secs)
    }

    /// Get retry interval as Duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether the DNS auto-refresh loop should run
    pub fn dns_auto_refresh_enabled(&self) -> bool {
        self.use_dns_for_fetching_service_urls && self.auto_update_dns_service_urls
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.is_empty() {
            return Err(ConfigError::MissingField {
                field: "region".to_string(),
            });
        }

        if self.availability_zones_for_region().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "availability_zones".to_string(),
                reason: format!("No zones configured for region '{}'", self.region),
            });
        }

        for (field, value) in [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("registry_fetch_interval_secs", self.registry_fetch_interval_secs),
            ("retry_interval_secs", self.retry_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "Must be positive".to_string(),
                });
            }
        }

        if self.dns_auto_refresh_enabled() && self.auto_update_dns_service_urls_interval_secs == 0
        {
            return Err(ConfigError::InvalidValue {
                field: "auto_update_dns_service_urls_interval_secs".to_string(),
                reason: "Must be positive when auto update is enabled".to_string(),
            });
        }

        for (zone, urls) in &self.service_urls {
            for raw in urls.iter().flat_map(|entry| split_url_list(entry)) {
                let parsed = url::Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                    field: format!("service_urls.{zone}"),
                    reason: format!("Invalid URL '{raw}': {e}"),
                })?;

                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidValue {
                        field: format!("service_urls.{zone}"),
                        reason: format!("Unsupported scheme in '{raw}'"),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Split a comma separated URL list, dropping blanks
pub fn split_url_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                reason: format!("Cannot parse '{raw}'"),
            }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.retry_interval(), Duration::from_secs(3));
        assert_eq!(config.availability_zones_for_region(), &[DEFAULT_ZONE.to_string()]);
    }

    #[test]
    fn test_with_setters() {
        let config = ClientConfig::default()
            .with_region("region-cn-hd-1", &["zone-cn-hz-1"])
            .with_service_urls(
                "zone-cn-hz-1",
                &["http://10.0.0.1:9001/eureka", "http://10.0.0.2:9001/eureka"],
            )
            .with_heartbeat_interval_secs(5)
            .with_fetch_registry(false, 60);

        assert!(config.validate().is_ok());
        assert_eq!(config.region, "region-cn-hd-1");
        assert_eq!(config.service_urls["zone-cn-hz-1"].len(), 2);
        assert!(!config.fetch_registry);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let config = ClientConfig::default().with_heartbeat_interval_secs(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval_secs"));
    }

    #[test]
    fn test_validation_rejects_bad_url() {
        let config = ClientConfig::default().with_service_urls(DEFAULT_ZONE, &["ftp://host/eureka"]);
        assert!(config.validate().is_err());

        let config = ClientConfig::default().with_service_urls(DEFAULT_ZONE, &["not a url"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_checks_each_url_of_a_list() {
        let config =
            ClientConfig::default().with_service_urls("defaultZone", &["http://a/eureka,ftp://b"]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ftp://b"));

        let config = ClientConfig::default()
            .with_service_urls("defaultZone", &["http://a/eureka, http://b/eureka"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_region_without_zones() {
        let mut config = ClientConfig::default();
        config.region = "eu-west-1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dns_auto_refresh_flag() {
        let config = ClientConfig::default();
        assert!(!config.dns_auto_refresh_enabled());

        let config = ClientConfig::default().with_dns_resolution(true, 60);
        assert!(config.dns_auto_refresh_enabled());

        let config = ClientConfig::default().with_dns_resolution(false, 60);
        assert!(!config.dns_auto_refresh_enabled());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
region = "region-cn-hd-1"
heartbeat_interval_secs = 10
fetch_registry = false

[availability_zones]
region-cn-hd-1 = ["zone-cn-hz-1"]

[service_urls]
zone-cn-hz-1 = ["http://192.168.20.236:9001/eureka", "http://192.168.20.237:9001/eureka"]
"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.region, "region-cn-hd-1");
        assert_eq!(config.heartbeat_interval_secs, 10);
        assert!(!config.fetch_registry);
        assert_eq!(config.service_urls["zone-cn-hz-1"].len(), 2);
        // untouched keys keep their defaults
        assert_eq!(config.registry_fetch_interval_secs, 30);
    }

    #[test]
    fn test_from_file_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "heartbeat_interval_secs = \"soon\"").unwrap();

        let err = ClientConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("BEACON_REGION", "ap-northeast-2");
        env::set_var("BEACON_ZONE", "zone-a");
        env::set_var(
            "BEACON_SERVICE_URLS",
            "http://a:8761/eureka, http://b:8761/eureka,",
        );
        env::set_var("BEACON_HEARTBEAT_INTERVAL", "15");
        env::set_var("BEACON_FETCH_REGISTRY", "false");

        let config = ClientConfig::from_env().unwrap();

        env::remove_var("BEACON_REGION");
        env::remove_var("BEACON_ZONE");
        env::remove_var("BEACON_SERVICE_URLS");
        env::remove_var("BEACON_HEARTBEAT_INTERVAL");
        env::remove_var("BEACON_FETCH_REGISTRY");

        assert!(config.validate().is_ok());
        assert_eq!(config.region, "ap-northeast-2");
        assert_eq!(config.availability_zones_for_region(), &["zone-a".to_string()]);
        assert_eq!(
            config.service_urls["zone-a"],
            vec!["http://a:8761/eureka", "http://b:8761/eureka"]
        );
        assert_eq!(config.heartbeat_interval_secs, 15);
        assert!(!config.fetch_registry);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        env::set_var("BEACON_HEARTBEAT_INTERVAL", "often");
        let result = ClientConfig::from_env();
        env::remove_var("BEACON_HEARTBEAT_INTERVAL");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_split_url_list() {
        assert_eq!(
            split_url_list("http://a/eureka,http://b/eureka"),
            vec!["http://a/eureka", "http://b/eureka"]
        );
        assert!(split_url_list(" , ").is_empty());
    }
}
