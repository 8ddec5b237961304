//! Configuration management for examgrid
//!
//! This module handles loading and validating configuration from environment variables,
//! TOML files, and command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::coordinator::config::CoordinatorConfig;
use crate::worker::config::WorkerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator process configuration
    pub coordinator: CoordinatorConfig,

    /// Exam-client process configuration
    pub worker: WorkerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut coordinator = CoordinatorConfig::default();

        if let Ok(addr) = std::env::var("COORDINATOR_BIND") {
            coordinator.bind_address = addr
                .parse()
                .with_context(|| format!("Invalid COORDINATOR_BIND: {addr}"))?;
        }
        if let Ok(path) = std::env::var("DELIVERY_DB_PATH") {
            coordinator.database_path = Some(PathBuf::from(path));
        }
        coordinator.liveness_window_secs = std::env::var("LIVENESS_WINDOW")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(coordinator.liveness_window_secs);
        coordinator.queue_capacity = std::env::var("ASSIGNMENT_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(coordinator.queue_capacity);
        coordinator.scheduler_interval_secs = std::env::var("SCHEDULER_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(coordinator.scheduler_interval_secs);
        coordinator.scheduler_enabled = std::env::var("SCHEDULER_ENABLED")
            .ok()
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(coordinator.scheduler_enabled);

        let worker = WorkerConfig::from_env()?;

        let logging = LoggingConfig {
            level: std::env::var("EXAMGRID_LOG_LEVEL").unwrap_or_else(|_| String::from("info")),
            format: std::env::var("EXAMGRID_LOG_FORMAT").unwrap_or_else(|_| String::from("text")),
        };

        let config = Self {
            coordinator,
            worker,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from a file when given, otherwise from the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.coordinator
            .validate()
            .context("Invalid coordinator configuration")?;
        self.worker.validate().context("Invalid worker configuration")?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
