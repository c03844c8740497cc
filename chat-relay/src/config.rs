//! Configuration loading for quicchat-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! section and field is optional; missing values use the defaults below.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_core::{ServerTrust, TlsError, TlsIdentity};
use serde::Deserialize;

/// Default listening port. Its partner listens on the next port.
pub const DEFAULT_PORT: u16 = 4242;

/// Root configuration for quicchat-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Federation link configuration.
    #[serde(default)]
    pub federation: FederationConfig,
    /// Keepalive configuration.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    /// Certificate configuration.
    #[serde(default)]
    pub tls: TlsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the QUIC endpoint (default: 0.0.0.0:4242).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Shared secret clients and the partner server must present.
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Name this server announces on its federation link.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

/// Federation link configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Dial a partner server at startup (default: true).
    #[serde(default = "default_federation_enabled")]
    pub enabled: bool,
    /// Partner address. Derived from the bind port when unset.
    pub peer_address: Option<String>,
    /// TLS server name expected from the partner (default: localhost).
    #[serde(default = "default_peer_server_name")]
    pub peer_server_name: String,
    /// Partner certificate to pin (optional, accepts any when missing).
    pub peer_cert_path: Option<PathBuf>,
    /// Delay between failed dial attempts in seconds (default: 2).
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

/// Keepalive configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveConfig {
    /// Seconds between PINGs on the federation link (default: 20).
    #[serde(default = "default_keepalive_interval")]
    pub interval_secs: u64,
}

/// Certificate configuration.
///
/// When either path is missing a self-signed certificate for `localhost`
/// is generated at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: Option<PathBuf>,
    /// PEM private key.
    pub key_path: Option<PathBuf>,
}

// Default value functions
fn default_bind_address() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_secret() -> String {
    "password123".to_string()
}

fn default_server_name() -> String {
    "quicchat".to_string()
}

fn default_federation_enabled() -> bool {
    true
}

fn default_peer_server_name() -> String {
    "localhost".to_string()
}

fn default_retry_backoff_secs() -> u64 {
    2
}

fn default_keepalive_interval() -> u64 {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            secret: default_secret(),
            server_name: default_server_name(),
        }
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: default_federation_enabled(),
            peer_address: None,
            peer_server_name: default_peer_server_name(),
            peer_cert_path: None,
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_keepalive_interval(),
        }
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

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "keepalive.interval_secs",
                reason: "must be at least 1",
            });
        }
        if self.federation.retry_backoff_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "federation.retry_backoff_secs",
                reason: "must be at least 1",
            });
        }
        self.bind_addr()?;
        Ok(())
    }

    /// Parsed bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress {
                address: self.server.bind_address.clone(),
            })
    }

    /// Partner address: the configured one, or the one derived from the
    /// bind port.
    pub fn peer_address(&self) -> String {
        if let Some(address) = &self.federation.peer_address {
            return address.clone();
        }
        let port = self
            .bind_addr()
            .map(|addr| addr.port())
            .unwrap_or(DEFAULT_PORT);
        default_peer_for(port)
    }

    /// Delay between failed federation dials.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.federation.retry_backoff_secs)
    }

    /// Interval between federation keepalive PINGs.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive.interval_secs)
    }

    /// How the federation link authenticates the partner.
    pub fn peer_trust(&self) -> Result<ServerTrust, TlsError> {
        ServerTrust::from_optional_pem_file(self.federation.peer_cert_path.as_deref())
    }
}

impl TlsConfig {
    /// Load the configured identity, or generate one for `localhost`.
    pub fn identity(&self) -> Result<TlsIdentity, TlsError> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => TlsIdentity::from_pem_files(cert, key),
            _ => TlsIdentity::generate(&["localhost"]),
        }
    }
}

/// Partner address for a server listening on `port`.
///
/// The demo pair runs on 4242 and 4243; each dials the other on localhost.
pub fn default_peer_for(port: u16) -> String {
    if port == DEFAULT_PORT {
        format!("localhost:{}", DEFAULT_PORT + 1)
    } else {
        format!("localhost:{DEFAULT_PORT}")
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
    /// Bind address is not a socket address.
    #[error("invalid bind address: {address}")]
    InvalidAddress {
        /// Address as configured.
        address: String,
    },
    /// A field parsed but is out of range.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
