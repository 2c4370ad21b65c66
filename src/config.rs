//! Configuration management for activity rollups
//!
//! TOML file support, environment variable overrides and defaults.
//!
//! ```toml
//! [store]
//! backend = "kairosdb"
//! url = "http://kairos:8080"
//!
//! [rollup]
//! levels = ["hours", "days", "months"]
//! shift_margin_hours = 14
//!
//! [[metrics]]
//! name = "steps"
//! rule = "sum"
//!
//! [monitoring]
//! log_level = "debug"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::rollup::{AggregationRule, BucketSize, UtcShift};
use crate::store::{KairosConfig, RetryPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Rollup levels and key shifting
    #[serde(default)]
    pub rollup: RollupConfig,

    /// Metric definitions
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricDefinition>,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Which store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store
    Memory,
    /// KairosDB over HTTP
    Kairosdb,
}

/// Store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Backend
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// KairosDB base URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Timeout of a single request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Rollup configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RollupConfig {
    /// Aggregation levels maintained on write
    #[serde(default = "default_levels")]
    pub levels: Vec<BucketSize>,

    /// Look-ahead margin of storage keys in hours
    #[serde(default = "default_shift_margin_hours")]
    pub shift_margin_hours: u64,
}

/// A metric and the rule its rollups aggregate with
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetricDefinition {
    /// Raw series name
    pub name: String,
    /// Aggregation rule
    pub rule: AggregationRule,
}

impl MetricDefinition {
    /// Create a definition
    pub fn new(name: impl Into<String>, rule: AggregationRule) -> Self {
        Self {
            name: name.into(),
            rule,
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON log lines
    #[serde(default)]
    pub structured_logging: bool,
}

fn default_backend() -> StoreBackend { StoreBackend::Memory }
fn default_store_url() -> String { "http://127.0.0.1:8080".to_string() }
fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 5_000 }
fn default_levels() -> Vec<BucketSize> { BucketSize::ALL.to_vec() }
fn default_shift_margin_hours() -> u64 { 14 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }
fn default_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new("steps", AggregationRule::Sum),
        MetricDefinition::new("rest", AggregationRule::Average),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            rollup: RollupConfig::default(),
            metrics: default_metrics(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_store_url(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            shift_margin_hours: default_shift_margin_hours(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
            structured_logging: false,
        }
    }
}

impl StoreConfig {
    /// Retry policy described by this section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            ..Default::default()
        }
    }

    /// KairosDB client settings
    pub fn kairos_config(&self) -> KairosConfig {
        KairosConfig::with_url(self.url.clone())
            .request_timeout(Duration::from_millis(self.request_timeout_ms))
            .retry_policy(self.retry_policy())
    }
}

impl RollupConfig {
    /// Key transformer for the configured margin
    pub fn shift(&self) -> Result<UtcShift> {
        UtcShift::with_margin_hours(self.shift_margin_hours)
            .map_err(|e| Error::Configuration(e.to_string()))
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_toml_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Store
        if let Ok(url) = std::env::var("ROLLUP_STORE_URL") {
            self.store.url = url;
            self.store.backend = StoreBackend::Kairosdb;
        }

        // Rollup
        if let Ok(margin) = std::env::var("ROLLUP_SHIFT_MARGIN_HOURS") {
            if let Ok(h) = margin.parse() {
                self.rollup.shift_margin_hours = h;
            }
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Kairosdb && self.store.url.trim().is_empty() {
            return Err(Error::Configuration("Store URL cannot be empty".to_string()));
        }
        if self.store.request_timeout_ms == 0 {
            return Err(Error::Configuration("Request timeout must be > 0".to_string()));
        }
        if self.store.initial_backoff_ms > self.store.max_backoff_ms {
            return Err(Error::Configuration(
                "Initial backoff cannot exceed max backoff".to_string(),
            ));
        }

        if self.rollup.levels.is_empty() {
            return Err(Error::Configuration("At least one rollup level is required".to_string()));
        }
        for (i, level) in self.rollup.levels.iter().enumerate() {
            if self.rollup.levels[..i].contains(level) {
                return Err(Error::Configuration(format!("Rollup level {} listed twice", level)));
            }
        }
        self.rollup.shift()?;

        for (i, metric) in self.metrics.iter().enumerate() {
            if metric.name.trim().is_empty() {
                return Err(Error::Configuration("Metric name cannot be empty".to_string()));
            }
            if self.metrics[..i].iter().any(|m| m.name == metric.name) {
                return Err(Error::Configuration(format!(
                    "Metric {} defined twice",
                    metric.name
                )));
            }
        }

        Ok(())
    }

    /// Aggregation rule of a configured metric
    pub fn metric_rule(&self, name: &str) -> Result<AggregationRule> {
        self.metrics
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.rule)
            .ok_or_else(|| Error::invalid(format!("metric '{}' is not configured", name)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }
}
