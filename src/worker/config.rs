//! Exam-client configuration
//!
//! Environment-based configuration for exam-client worker processes.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::config::ConfigError;

/// Default base port; delivery endpoints are derived above it
pub const DEFAULT_BASE_PORT: u16 = 8234;

/// Hard wall-clock ceiling for a single delivery instance (8 hours)
pub const DEFAULT_INSTANCE_CEILING_SECS: u64 = 8 * 60 * 60;

// ============================================================================
// Worker Configuration
// ============================================================================

/// Configuration for an exam-client worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Coordinator server URL
    pub coordinator_url: String,

    /// Worker identity (generated when not supplied)
    pub client_id: String,

    /// Address advertised to the coordinator
    pub client_ip: String,

    /// Base port for delivery endpoints (0 = always use OS-assigned ports)
    pub port: u16,

    /// Maximum concurrent deliveries (0 = unlimited)
    pub max_deliveries: u32,

    /// Directory for per-delivery SQLite stores
    pub data_dir: PathBuf,

    /// Software version reported on registration
    pub version: String,

    /// Declared capabilities
    pub capabilities: Vec<String>,

    /// Status report interval in seconds
    pub status_interval_secs: u64,

    /// Assignment poll interval in seconds
    pub poll_interval_secs: u64,

    /// Per-call timeout for coordinator requests in seconds
    pub request_timeout_secs: u64,

    /// Registration attempts before giving up
    pub register_retries: u32,

    /// Wall-clock ceiling for one delivery instance in seconds
    pub instance_ceiling_secs: u64,

    /// Seconds to wait for instances to wind down on shutdown
    pub shutdown_grace_secs: u64,

    /// Keep store files after a successful export
    pub retain_exported_stores: bool,

    /// Trace every request served by delivery endpoints
    pub enable_request_logging: bool,
}

/// `exam-client-{hostname}-{unix_ts}`, with a random tag when the host is unnamed
pub fn generate_client_id() -> String {
    let host = env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| Uuid::new_v4().simple().to_string()[..8].to_string());
    format!("exam-client-{}-{}", host, chrono::Utc::now().timestamp())
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `COORDINATOR_URL`: Coordinator server URL [default: http://localhost:8080]
    /// - `EXAM_CLIENT_ID`: Worker identity [default: generated]
    /// - `EXAM_CLIENT_IP`: Advertised address [default: 127.0.0.1]
    /// - `EXAM_CLIENT_PORT`: Base port [default: 8234]
    /// - `MAX_DELIVERIES`: Concurrent delivery limit, 0 = unlimited [default: 0]
    /// - `EXAM_DATA_DIR`: Store directory [default: ./exam_data]
    /// - `STATUS_INTERVAL`: Status report interval [default: 30]
    /// - `POLL_INTERVAL`: Poll interval [default: 10]
    /// - `REQUEST_TIMEOUT`: Coordinator call timeout [default: 30]
    /// - `REGISTER_RETRIES`: Registration retries [default: 3]
    /// - `INSTANCE_CEILING`: Instance wall-clock ceiling in seconds [default: 28800]
    /// - `RETAIN_EXPORTED_STORES`: Keep store files after export [default: false]
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            coordinator_url: env::var("COORDINATOR_URL").unwrap_or(defaults.coordinator_url),
            client_id: env::var("EXAM_CLIENT_ID").unwrap_or(defaults.client_id),
            client_ip: env::var("EXAM_CLIENT_IP").unwrap_or(defaults.client_ip),
            port: env::var("EXAM_CLIENT_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            max_deliveries: env::var("MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            data_dir: env::var("EXAM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            version: defaults.version,
            capabilities: defaults.capabilities,
            status_interval_secs: env::var("STATUS_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.status_interval_secs),
            poll_interval_secs: env::var("POLL_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.poll_interval_secs),
            request_timeout_secs: env::var("REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),
            register_retries: env::var("REGISTER_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.register_retries),
            instance_ceiling_secs: env::var("INSTANCE_CEILING")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.instance_ceiling_secs),
            shutdown_grace_secs: defaults.shutdown_grace_secs,
            retain_exported_stores: env::var("RETAIN_EXPORTED_STORES")
                .ok()
                .map(|s| s.to_lowercase() == "true")
                .unwrap_or(defaults.retain_exported_stores),
            enable_request_logging: defaults.enable_request_logging,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration with builder pattern
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn instance_ceiling(&self) -> Duration {
        Duration::from_secs(self.instance_ceiling_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Check whether `active` running deliveries leave room for another
    pub fn has_capacity(&self, active: usize) -> bool {
        self.max_deliveries == 0 || active < self.max_deliveries as usize
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator_url.is_empty() {
            return Err(ConfigError::invalid("coordinator_url", "URL cannot be empty"));
        }

        let parsed = url::Url::parse(&self.coordinator_url).map_err(|e| {
            ConfigError::invalid("coordinator_url", format!("Invalid URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "coordinator_url",
                format!("Unsupported scheme: {}", parsed.scheme()),
            ));
        }

        if self.client_id.is_empty() {
            return Err(ConfigError::invalid("client_id", "Client ID cannot be empty"));
        }

        for (field, value) in [
            ("status_interval_secs", self.status_interval_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("instance_ceiling_secs", self.instance_ceiling_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "Must be at least 1 second"));
            }
        }

        Ok(())
    }

    /// Display configuration
    pub fn display(&self) -> String {
        format!(
            "Exam Client Configuration\n\
             {:-<50}\n\
             Client ID: {}\n\
             Coordinator: {}\n\
             Advertised Address: {}:{}\n\
             Max Deliveries: {}\n\
             Data Dir: {}\n\
             Status Interval: {}s\n\
             Poll Interval: {}s\n\
             Request Timeout: {}s\n\
             Instance Ceiling: {}s\n\
             Capabilities: {}",
            "",
            self.client_id,
            self.coordinator_url,
            self.client_ip,
            self.port,
            if self.max_deliveries == 0 {
                "unlimited".to_string()
            } else {
                self.max_deliveries.to_string()
            },
            self.data_dir.display(),
            self.status_interval_secs,
            self.poll_interval_secs,
            self.request_timeout_secs,
            self.instance_ceiling_secs,
            self.capabilities.join(", "),
        )
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:8080".to_string(),
            client_id: generate_client_id(),
            client_ip: "127.0.0.1".to_string(),
            port: DEFAULT_BASE_PORT,
            max_deliveries: 0,
            data_dir: PathBuf::from("./exam_data"),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: vec!["mcq".to_string(), "osce".to_string(), "interview".to_string()],
            status_interval_secs: 30,
            poll_interval_secs: 10,
            request_timeout_secs: 30,
            register_retries: 3,
            instance_ceiling_secs: DEFAULT_INSTANCE_CEILING_SECS,
            shutdown_grace_secs: 30,
            retain_exported_stores: false,
            enable_request_logging: true,
        }
    }
}

// ============================================================================
// Worker Config Builder
// ============================================================================

/// Builder for WorkerConfig
#[derive(Debug, Default)]
pub struct WorkerConfigBuilder {
    coordinator_url: Option<String>,
    client_id: Option<String>,
    client_ip: Option<String>,
    port: Option<u16>,
    max_deliveries: Option<u32>,
    data_dir: Option<PathBuf>,
    status_interval_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    register_retries: Option<u32>,
    instance_ceiling_secs: Option<u64>,
    shutdown_grace_secs: Option<u64>,
    retain_exported_stores: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl WorkerConfigBuilder {
    pub fn coordinator_url(mut self, url: impl Into<String>) -> Self {
        self.coordinator_url = Some(url.into());
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn max_deliveries(mut self, max: u32) -> Self {
        self.max_deliveries = Some(max);
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn status_interval_secs(mut self, secs: u64) -> Self {
        self.status_interval_secs = Some(secs);
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    pub fn register_retries(mut self, retries: u32) -> Self {
        self.register_retries = Some(retries);
        self
    }

    pub fn instance_ceiling_secs(mut self, secs: u64) -> Self {
        self.instance_ceiling_secs = Some(secs);
        self
    }

    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = Some(secs);
        self
    }

    pub fn retain_exported_stores(mut self, retain: bool) -> Self {
        self.retain_exported_stores = Some(retain);
        self
    }

    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    pub fn build(self) -> Result<WorkerConfig, ConfigError> {
        let defaults = WorkerConfig::default();

        let coordinator_url = self
            .coordinator_url
            .ok_or_else(|| ConfigError::MissingField("coordinator_url".to_string()))?;

        let config = WorkerConfig {
            coordinator_url,
            client_id: self.client_id.unwrap_or(defaults.client_id),
            client_ip: self.client_ip.unwrap_or(defaults.client_ip),
            port: self.port.unwrap_or(defaults.port),
            max_deliveries: self.max_deliveries.unwrap_or(defaults.max_deliveries),
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            version: defaults.version,
            capabilities: defaults.capabilities,
            status_interval_secs: self
                .status_interval_secs
                .unwrap_or(defaults.status_interval_secs),
            poll_interval_secs: self.poll_interval_secs.unwrap_or(defaults.poll_interval_secs),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            register_retries: self.register_retries.unwrap_or(defaults.register_retries),
            instance_ceiling_secs: self
                .instance_ceiling_secs
                .unwrap_or(defaults.instance_ceiling_secs),
            shutdown_grace_secs: self
                .shutdown_grace_secs
                .unwrap_or(defaults.shutdown_grace_secs),
            retain_exported_stores: self
                .retain_exported_stores
                .unwrap_or(defaults.retain_exported_stores),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        };

        config.validate()?;
        Ok(config)
    }
}
