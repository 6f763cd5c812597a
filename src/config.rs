//! Configuration module for feedrelay.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{RelayError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feedrelay.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional path to a log file. Console only when unset.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Delivery pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Articles per feed per trailing 24 hours when the feed sets no limit.
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: u32,
    /// Maximum characters per outbound message.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Consecutive rejections before a feed or connection is disabled.
    #[serde(default = "default_disable_threshold")]
    pub disable_threshold: u32,
    /// Timeout for every store call in seconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
    /// Lifetime of a per-feed processing lease in seconds.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
    /// Seed fingerprints without delivering on a feed's first run.
    #[serde(default = "default_skip_initial_articles")]
    pub skip_initial_articles: bool,
    /// Store comparison field values as SHA-256 digests.
    #[serde(default = "default_hash_field_values")]
    pub hash_field_values: bool,
    /// How long rate limit reservations are kept in seconds.
    ///
    /// Must cover the longest custom rate limit window.
    #[serde(default = "default_reservation_retention")]
    pub reservation_retention_secs: u64,
    /// JSON-lines file the binary writes outbound payloads to.
    #[serde(default = "default_outbox_path")]
    pub outbox_path: String,
}

fn default_daily_limit() -> u32 {
    100
}

fn default_max_message_length() -> usize {
    2000
}

fn default_disable_threshold() -> u32 {
    5
}

fn default_store_timeout() -> u64 {
    10
}

fn default_lease_ttl() -> u64 {
    300 // 5 minutes
}

fn default_skip_initial_articles() -> bool {
    true
}

fn default_hash_field_values() -> bool {
    true
}

fn default_reservation_retention() -> u64 {
    30 * 86_400 // 30 days
}

fn default_outbox_path() -> String {
    "data/outbox.jsonl".to_string()
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_daily_limit: default_daily_limit(),
            max_message_length: default_max_message_length(),
            disable_threshold: default_disable_threshold(),
            store_timeout_secs: default_store_timeout(),
            lease_ttl_secs: default_lease_ttl(),
            skip_initial_articles: default_skip_initial_articles(),
            hash_field_values: default_hash_field_values(),
            reservation_retention_secs: default_reservation_retention(),
            outbox_path: default_outbox_path(),
        }
    }
}

impl DeliveryConfig {
    /// Store call timeout as a duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Lease lifetime as a duration.
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Reservation retention as a duration.
    pub fn reservation_retention(&self) -> Duration {
        Duration::from_secs(self.reservation_retention_secs)
    }
}

/// Event dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of feeds processed at the same time.
    #[serde(default = "default_max_concurrent_feeds")]
    pub max_concurrent_feeds: usize,
    /// Pending events buffered per feed key.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds a feed worker waits for events before it retires.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl DispatchConfig {
    /// Worker idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn default_max_concurrent_feeds() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    64
}

fn default_idle_timeout_secs() -> u64 {
    300
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_feeds: default_max_concurrent_feeds(),
            queue_capacity: default_queue_capacity(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Delivery pipeline configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Event dispatch configuration.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RelayError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RelayError::Validation(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDRELAY_DATABASE_PATH`: Override the database file path
    /// - `FEEDRELAY_LOG_LEVEL`: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FEEDRELAY_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(level) = std::env::var("FEEDRELAY_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.delivery.max_message_length == 0 {
            return Err(RelayError::Validation(
                "delivery.max_message_length must be greater than 0".to_string(),
            ));
        }
        if self.delivery.disable_threshold == 0 {
            return Err(RelayError::Validation(
                "delivery.disable_threshold must be greater than 0".to_string(),
            ));
        }
        if self.delivery.store_timeout_secs == 0 {
            return Err(RelayError::Validation(
                "delivery.store_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.delivery.reservation_retention_secs < crate::rate_limit::DAILY_WINDOW_SECS as u64 {
            return Err(RelayError::Validation(
                "delivery.reservation_retention_secs must cover at least one day".to_string(),
            ));
        }
        if self.dispatch.max_concurrent_feeds == 0 || self.dispatch.queue_capacity == 0 {
            return Err(RelayError::Validation(
                "dispatch.max_concurrent_feeds and dispatch.queue_capacity must be greater than 0"
                    .to_string(),
            ));
        }
        if self.dispatch.idle_timeout_secs == 0 {
            return Err(RelayError::Validation(
                "dispatch.idle_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
