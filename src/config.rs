//! Configuration management for Tripgate.
//!
//! Settings come from an optional YAML file overlaid with `TRIPGATE__`
//! environment variables, e.g. `TRIPGATE__STORE__REDIS_URL`.

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TripgateError};
use crate::ratelimit::{FailureMode, WindowStrategy, DEFAULT_KEY_PREFIX};

/// Main configuration for the Tripgate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    pub limiter: LimiterConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Take the client address from `X-Real-IP` / `X-Forwarded-For`
    #[serde(default = "default_trust_proxy_headers")]
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_proxy_headers: default_trust_proxy_headers(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_trust_proxy_headers() -> bool {
    true
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Upper bound for every store call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How often the in-memory store drops expired records, must be non-zero
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            timeout_ms: default_timeout_ms(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_sweep_interval() -> u64 {
    30
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Namespace prefix for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Behaviour when the counter store fails; deliberately has no default
    pub failure_mode: FailureMode,

    #[serde(default)]
    pub window_strategy: WindowStrategy,

    /// Path to the route policy file
    pub policies_path: Option<String>,

    /// Policy reload interval in seconds, 0 disables reloading
    #[serde(default = "default_reload_interval")]
    pub policy_reload_interval_secs: u64,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_reload_interval() -> u64 {
    60
}

impl TripgateConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("TRIPGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize::<Self>()?.validate()
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;

        config.try_deserialize::<Self>()?.validate()
    }

    /// Reject values that deserialize but cannot be run.
    fn validate(self) -> Result<Self> {
        if self.store.sweep_interval_secs == 0 {
            return Err(TripgateError::Config(
                "store.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}
