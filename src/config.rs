// Configuration File Support
//
// This module provides configuration file parsing for the reservoir limiter.
// Supports TOML format with environment variable overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::limiter::reservoir::DEFAULT_RESERVOIR_NAME;

/// Default reservoir capacity
pub const DEFAULT_CAPACITY: usize = 10;

/// Default refill period in milliseconds
pub const DEFAULT_REFILL_PERIOD_MS: u64 = 1000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Reservoir configuration
    pub reservoir: ReservoirConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Reservoir configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReservoirConfig {
    /// Name used in logs and metric labels
    pub name: String,

    /// Maximum number of tokens
    pub capacity: usize,

    /// Delay between refill attempts, in milliseconds
    pub refill_period_ms: u64,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_RESERVOIR_NAME.to_string(),
            capacity: DEFAULT_CAPACITY,
            refill_period_ms: DEFAULT_REFILL_PERIOD_MS,
        }
    }
}

impl ReservoirConfig {
    /// Get refill period
    pub fn refill_period(&self) -> Duration {
        Duration::from_millis(self.refill_period_ms)
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to register and report Prometheus metrics
    pub enabled: bool,
}

impl Config {
    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the resulting configuration is invalid. A missing file yields the
    /// defaults (with environment overrides applied).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - RESERVOIR_NAME
    /// - RESERVOIR_CAPACITY
    /// - RESERVOIR_REFILL_MS
    /// - RESERVOIR_LOG_LEVEL
    /// - RESERVOIR_LOG_FORMAT
    /// - RESERVOIR_METRICS_ENABLED
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("RESERVOIR_NAME") {
            self.reservoir.name = name;
        }
        if let Some(capacity) = lookup("RESERVOIR_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<usize>() {
                self.reservoir.capacity = capacity;
            }
        }
        if let Some(period) = lookup("RESERVOIR_REFILL_MS") {
            if let Ok(period) = period.parse::<u64>() {
                self.reservoir.refill_period_ms = period;
            }
        }

        if let Some(level) = lookup("RESERVOIR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("RESERVOIR_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(enabled) = lookup("RESERVOIR_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.reservoir.name.is_empty() {
            anyhow::bail!("Reservoir name must not be empty");
        }
        if self.reservoir.capacity == 0 {
            anyhow::bail!("Reservoir capacity must be > 0");
        }
        if self.reservoir.refill_period_ms == 0 {
            anyhow::bail!("Reservoir refill period must be > 0 ms");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
