//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file named on the command line
//! - `beacon.toml`, `/etc/beacon/beacon.toml` or `~/.config/beacon/beacon.toml`
//! - Environment variables (`BEACON_*`) supplying defaults for absent keys

use anyhow::{Context, Result};
use beacon_core::RouterConfig;
use beacon_protocol::ConnectionUrl;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connection URL; when set it overrides host, port and credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Static credentials.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Persistence.
    #[serde(default)]
    pub storage: StorageConfig,

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

/// The single credential pair accepted by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected username.
    #[serde(default = "default_username")]
    pub username: String,

    /// Expected password.
    #[serde(default = "default_password")]
    pub password: String,

    /// Bound on the AUTH handshake in milliseconds.
    #[serde(default = "default_auth_timeout")]
    pub timeout_ms: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the redb file.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum subscriptions per session.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_session: usize,

    /// Default timeout of in-process requests in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between PING sweeps in milliseconds; 0 disables them.
    #[serde(default)]
    pub interval_ms: u64,

    /// How long a session has to answer a PING, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(beacon_protocol::address::DEFAULT_PORT)
}

fn default_username() -> String {
    std::env::var("BEACON_USERNAME").unwrap_or_else(|_| "admin".to_string())
}

fn default_password() -> String {
    std::env::var("BEACON_PASSWORD").unwrap_or_else(|_| "admin".to_string())
}

fn default_auth_timeout() -> u64 {
    10_000
}

fn default_storage_path() -> String {
    std::env::var("BEACON_STORAGE_PATH").unwrap_or_else(|_| "beacon.redb".to_string())
}

fn default_max_frame_size() -> usize {
    beacon_protocol::codec::MAX_FRAME_SIZE
}

fn default_max_subscriptions() -> usize {
    1_000
}

fn default_request_timeout() -> u64 {
    5_000
}

fn default_heartbeat_timeout() -> u64 {
    1_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            url: None,
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
            timeout_ms: default_auth_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            max_subscriptions_per_session: default_max_subscriptions(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 0,
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, or from defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// its `url` is not a valid connection URL.
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(shellexpand::tilde(path).as_ref());
        }

        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
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

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration text and apply its connection URL.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid TOML or an invalid `url`.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.apply_url()
    }

    fn apply_url(mut self) -> Result<Self> {
        let Some(raw) = self.url.as_deref() else {
            return Ok(self);
        };
        let url = ConnectionUrl::parse(raw).context("Invalid connection URL")?;
        self.host = url.host;
        self.port = url.port;
        if !url.username.is_empty() {
            self.auth.username = url.username;
            self.auth.password = url.password;
        }
        Ok(self)
    }

    /// Resolve the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not resolve.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address for {}:{}", self.host, self.port))
    }

    /// Storage file path with `~` expanded.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.storage.path).as_ref())
    }

    /// Router settings derived from the limits section.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_subscriptions_per_session: self.limits.max_subscriptions_per_session,
            request_timeout: Duration::from_millis(self.limits.request_timeout_ms),
        }
    }

    /// Bound on the AUTH handshake.
    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth.timeout_ms)
    }

    /// Heartbeat sweep interval, `None` when disabled.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat.interval_ms > 0).then(|| Duration::from_millis(self.heartbeat.interval_ms))
    }

    /// How long a session has to answer a heartbeat PING.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }
}
