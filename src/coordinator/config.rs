//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;

const DEFAULT_PORT: u16 = 8080;

fn default_bind_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
}

/// Configuration for the Coordinator server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Central delivery store path (`None` keeps the store in memory)
    pub database_path: Option<PathBuf>,

    /// Seconds without a status report before a worker is treated as offline
    pub liveness_window_secs: u64,

    /// Bounded assignment queue capacity
    pub queue_capacity: usize,

    /// Auto-start scheduler interval in seconds
    pub scheduler_interval_secs: u64,

    /// Run the auto-start scheduler in this process
    pub scheduler_enabled: bool,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            database_path: Some(PathBuf::from("data/deliveries.db")),
            liveness_window_secs: 120,
            queue_capacity: 100,
            scheduler_interval_secs: 60,
            scheduler_enabled: true,
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Liveness window as a chrono duration
    pub fn liveness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness_window_secs as i64)
    }

    /// Scheduler interval as Duration
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness_window_secs == 0 {
            return Err(ConfigError::invalid(
                "liveness_window_secs",
                "Liveness window must be at least 1 second",
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "queue_capacity",
                "Queue must hold at least 1 assignment",
            ));
        }

        if self.scheduler_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "scheduler_interval_secs",
                "Interval must be at least 1 second",
            ));
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<SocketAddr>,
    database_path: Option<Option<PathBuf>>,
    liveness_window_secs: Option<u64>,
    queue_capacity: Option<usize>,
    scheduler_interval_secs: Option<u64>,
    scheduler_enabled: Option<bool>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl CoordinatorConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(
            addr.parse()
                .map_err(|_| ConfigError::invalid("bind_address", format!("Invalid address: {addr}")))?,
        );
        Ok(self)
    }

    /// Set the central store path
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(Some(path.into()));
        self
    }

    /// Keep the central store in memory
    pub fn in_memory(mut self) -> Self {
        self.database_path = Some(None);
        self
    }

    /// Set liveness window
    pub fn liveness_window_secs(mut self, secs: u64) -> Self {
        self.liveness_window_secs = Some(secs);
        self
    }

    /// Set assignment queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set scheduler interval
    pub fn scheduler_interval_secs(mut self, secs: u64) -> Self {
        self.scheduler_interval_secs = Some(secs);
        self
    }

    /// Enable/disable the auto-start scheduler
    pub fn scheduler_enabled(mut self, enabled: bool) -> Self {
        self.scheduler_enabled = Some(enabled);
        self
    }

    /// Enable/disable CORS
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            database_path: self.database_path.unwrap_or(defaults.database_path),
            liveness_window_secs: self
                .liveness_window_secs
                .unwrap_or(defaults.liveness_window_secs),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
            scheduler_interval_secs: self
                .scheduler_interval_secs
                .unwrap_or(defaults.scheduler_interval_secs),
            scheduler_enabled: self.scheduler_enabled.unwrap_or(defaults.scheduler_enabled),
            enable_cors: self.enable_cors.unwrap_or(defaults.enable_cors),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        };

        config.validate()?;
        Ok(config)
    }
}
