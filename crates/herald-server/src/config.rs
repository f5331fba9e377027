//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (HERALD_*, plus `PORT`)
//! - TOML configuration file
//! - Command line arguments (`--config <path>`)

use anyhow::{Context, Result};
use herald_core::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP route configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path of the event stream endpoint.
    #[serde(default = "default_subscribe_path")]
    pub subscribe_path: String,

    /// Path of the publish endpoint.
    #[serde(default = "default_publish_path")]
    pub publish_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum publish request body size in bytes.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,

    /// Maximum number of channels. Unbounded when unset.
    #[serde(default)]
    pub max_channels: Option<usize>,

    /// Maximum subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,

    /// Frames queued per connection before it is dropped.
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keep-alive comment interval in milliseconds. `0` disables it.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("HERALD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    ["PORT", "HERALD_PORT"]
        .iter()
        .find_map(|key| std::env::var(key).ok().and_then(|p| p.parse().ok()))
        .unwrap_or(9090)
}

fn default_true() -> bool {
    true
}

fn default_subscribe_path() -> String {
    "/subscribe".to_string()
}

fn default_publish_path() -> String {
    "/publish".to_string()
}

fn default_max_request_size() -> usize {
    100 * 1024 // 100 KB
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_connection_buffer() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    15_000 // 15 seconds
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            subscribe_path: default_subscribe_path(),
            publish_path: default_publish_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: default_max_request_size(),
            max_channels: None,
            max_subscriptions_per_connection: default_max_subscriptions(),
            connection_buffer: default_connection_buffer(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, layered with
    /// `HERALD_*` environment overrides.
    ///
    /// Nested keys use a double underscore, e.g. `HERALD_LIMITS__MAX_CHANNELS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_ENV).ok();
        let config_paths = explicit.iter().map(String::as_str).chain([
            "herald.toml",
            "/etc/herald/herald.toml",
            "~/.config/herald/herald.toml",
        ]);

        let mut builder = ::config::Config::builder();
        for path in config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(
                    ::config::File::new(expanded.as_ref(), ::config::FileFormat::Toml),
                );
                break;
            }
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("HERALD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Broker limits derived from this configuration.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_channels: self.limits.max_channels.unwrap_or(usize::MAX),
            max_subscriptions_per_connection: self.limits.max_subscriptions_per_connection,
            connection_buffer: self.limits.connection_buffer,
        }
    }
}
