//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (ROOMCAST_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// History limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Rooms seeded into the room directory at startup.
    #[serde(default = "default_rooms")]
    pub rooms: Vec<String>,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 shared secret for bearer-token verification.
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Expected token issuer, checked when set.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Window after connection establishment in which authentication must
    /// complete, in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// History limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Messages returned by a history read when no limit is given.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Upper bound a client may request on the history endpoint.
    #[serde(default = "default_history_max_limit")]
    pub history_max_limit: usize,
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
    std::env::var("ROOMCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("ROOMCAST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_secret() -> String {
    std::env::var("ROOMCAST_AUTH_SECRET").unwrap_or_else(|_| "insecure-dev-secret".to_string())
}

fn default_true() -> bool {
    true
}

fn default_handshake_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_history_limit() -> usize {
    50
}

fn default_history_max_limit() -> usize {
    100
}

fn default_rooms() -> Vec<String> {
    vec!["general".to_string()]
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
            rooms: default_rooms(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            issuer: None,
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            history_max_limit: default_history_max_limit(),
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
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "roomcast.toml",
            "/etc/roomcast/roomcast.toml",
            "~/.config/roomcast/roomcast.toml",
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

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid host:port")
    }
}
