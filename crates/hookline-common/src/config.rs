//! Configuration for Hookline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "HOOKLINE_CONFIG";

/// Prefix for environment overrides, e.g. `HOOKLINE__DATABASE__URL`
pub const ENV_PREFIX: &str = "HOOKLINE";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Retry policy for failed sends
    #[serde(default)]
    pub retry: RetryConfig,

    /// Outbound SMTP configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Tracking link configuration
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name this instance uses as its lock owner prefix
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
        }
    }
}

fn default_instance_name() -> String {
    "hookline".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Maximum entries claimed per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum concurrent dispatches
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Lease held on a claimed entry, in seconds
    #[serde(default = "default_lease")]
    pub lease_secs: u64,

    /// Required headroom between the SMTP timeout and the lease
    #[serde(default = "default_lease_margin")]
    pub lease_margin_secs: u64,

    /// Upper bound of the random delay before each send (0 disables)
    #[serde(default)]
    pub jitter_ms: u64,

    /// Global send cap per rolling minute (unset means unlimited)
    pub max_per_minute: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            lease_secs: default_lease(),
            lease_margin_secs: default_lease_margin(),
            jitter_ms: 0,
            max_per_minute: None,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

fn default_tick_interval() -> u64 {
    1
}

fn default_batch_size() -> usize {
    100
}

fn default_concurrency() -> usize {
    10
}

fn default_lease() -> u64 {
    120
}

fn default_lease_margin() -> u64 {
    30
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Delay before the first retry, in seconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Upper bound on the retry delay, in seconds
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
        }
    }
}

fn default_max_retries() -> i32 {
    8
}

fn default_backoff_base() -> u64 {
    60
}

fn default_backoff_cap() -> u64 {
    4 * 60 * 60 // 4 hours
}

/// Outbound SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Per-message SMTP timeout in seconds
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,

    /// Hostname announced in EHLO
    pub hello_name: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_smtp_timeout(),
            hello_name: None,
        }
    }
}

impl SmtpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_smtp_timeout() -> u64 {
    30
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address for the HTTP surface
    #[serde(default = "default_api_bind")]
    pub bind: String,

    /// Bearer token required on owner endpoints
    pub admin_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            admin_token: None,
        }
    }
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Tracking link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Public base URL tracking callbacks are served from
    #[serde(default = "default_tracking_base_url")]
    pub base_url: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracking_base_url(),
        }
    }
}

fn default_tracking_base_url() -> String {
    "http://localhost:8080/t".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from a file, applying `HOOKLINE__*` environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `HOOKLINE_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./hookline.toml"),
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/hookline/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Reject settings the engine cannot run safely with
    pub fn validate(&self) -> crate::Result<()> {
        if self.scheduler.batch_size == 0 {
            return Err(crate::Error::Config(
                "scheduler.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.concurrency == 0 {
            return Err(crate::Error::Config(
                "scheduler.concurrency must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(crate::Error::Config(
                "scheduler.tick_interval_secs must be greater than zero".to_string(),
            ));
        }
        // A lease shorter than a worst-case send gets reclaimed while the
        // holder is still talking to the relay.
        let required = self.smtp.timeout_secs + self.scheduler.lease_margin_secs;
        if self.scheduler.lease_secs < required {
            return Err(crate::Error::Config(format!(
                "scheduler.lease_secs ({}) must be at least smtp.timeout_secs + scheduler.lease_margin_secs ({})",
                self.scheduler.lease_secs, required
            )));
        }
        if self.retry.max_retries < 0 {
            return Err(crate::Error::Config(
                "retry.max_retries must not be negative".to_string(),
            ));
        }
        if self.retry.backoff_cap_secs < self.retry.backoff_base_secs {
            return Err(crate::Error::Config(
                "retry.backoff_cap_secs must be at least retry.backoff_base_secs".to_string(),
            ));
        }
        Ok(())
    }
}
