//! Configuration loading for postbox-relay.
//!
//! Configuration is loaded from an optional TOML file (default: `relay.toml`).
//! The listening port comes from a separate one-line port file, read once
//! at startup.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for postbox-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default: all interfaces).
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// File holding the port number (default: `myport.info`).
    #[serde(default = "default_port_file")]
    pub port_file: PathBuf,
    /// Port used when the port file is missing or invalid (default: 8080).
    #[serde(default = "default_port")]
    pub default_port: u16,
    /// Listen backlog (default: 16).
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// How long shutdown waits for each connection handler (default: 5s).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Reject frames whose checksum does not match (default: false).
    #[serde(default)]
    pub verify_checksums: bool,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Maximum pooled connections (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// SQLite busy timeout in milliseconds (default: 5000).
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Attempts for busy/locked storage operations (default: 3).
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
    /// Delay between attempts in milliseconds (default: 100).
    #[serde(default = "default_busy_retry_delay_ms")]
    pub busy_retry_delay_ms: u64,
}

impl StorageConfig {
    /// SQLite busy timeout.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Serve /health and /metrics (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Bind address for HTTP server (default: 127.0.0.1:9090).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
}

// Default value functions
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port_file() -> PathBuf {
    PathBuf::from("myport.info")
}

fn default_port() -> u16 {
    8080
}

fn default_backlog() -> u32 {
    16
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_database_path() -> PathBuf {
    PathBuf::from("defensive.db")
}

fn default_max_connections() -> u32 {
    10
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_busy_retries() -> u32 {
    3
}

fn default_busy_retry_delay_ms() -> u64 {
    100
}

fn default_http_bind() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port_file: default_port_file(),
            default_port: default_port(),
            backlog: default_backlog(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            verify_checksums: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            busy_retries: default_busy_retries(),
            busy_retry_delay_ms: default_busy_retry_delay_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_http_bind(),
        }
    }
}

impl ServerConfig {
    /// Socket address for the relay listener on `port`.
    ///
    /// # Errors
    ///
    /// Returns an error if `bind_host` is not an IP address.
    pub fn listen_addr(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        let host = self
            .bind_host
            .parse()
            .map_err(|_| ConfigError::InvalidHost {
                host: self.bind_host.clone(),
            })?;
        Ok(SocketAddr::new(host, port))
    }

    /// Per-handler shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Read the listening port from `path`.
///
/// The file holds a single decimal port number, surrounding whitespace
/// allowed. A missing file, malformed contents or a value outside
/// `1..=65535` fall back to `default`.
pub fn load_port(path: &Path, default: u16) -> u16 {
    match std::fs::read_to_string(path) {
        Ok(content) => match parse_port(&content) {
            Some(port) => port,
            None => {
                tracing::warn!(
                    "Invalid port in {}: {:?}, using default {}",
                    path.display(),
                    content.trim(),
                    default
                );
                default
            }
        },
        Err(e) => {
            tracing::warn!(
                "Cannot read port file {}: {}, using default {}",
                path.display(),
                e,
                default
            );
            default
        }
    }
}

fn parse_port(content: &str) -> Option<u16> {
    match content.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Bind host is not an IP address.
    #[error("invalid bind host: {host}")]
    InvalidHost {
        /// The configured host.
        host: String,
    },
}
