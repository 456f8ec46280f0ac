//! Listener configuration with validation.
//!
//! # Config File Format
//!
//! ```toml
//! listen_addr = "::"
//! port = 7075
//! max_inbound_connections = 2048
//! max_peers_per_ip = 4
//! max_peers_per_subnetwork = 16
//! idle_timeout_secs = 120
//! cookie_lifetime_secs = 5
//!
//! [session]
//! realtime_enabled = true
//! bootstrap_listener_enabled = true
//! bootstrap_connections_max = 64
//! ```

use std::fs;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Acceptor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Local address to bind.
    pub listen_addr: IpAddr,
    /// Local port to bind; 0 picks an ephemeral port.
    pub port: u16,
    /// Admission ceiling over all registered sessions.
    pub max_inbound_connections: usize,
    /// Ceiling per peer IP (IPv6 by /48).
    pub max_peers_per_ip: usize,
    /// Ceiling per peer subnetwork (IPv4 /24, IPv6 /32).
    pub max_peers_per_subnetwork: usize,
    /// Skip the per-IP check.
    pub disable_max_peers_per_ip: bool,
    /// Skip the per-subnet check.
    pub disable_max_peers_per_subnetwork: bool,
    /// Sessions created by this listener may become bootstrap connections.
    pub allow_bootstrap: bool,
    /// Back-off before accepting again when the ceiling is reached or
    /// descriptors run out.
    pub requeue_delay_ms: u64,
    /// Period of the dead-connection sweep.
    pub maintenance_interval_secs: u64,
    /// Sessions silent for longer than this are timed out.
    pub idle_timeout_secs: u64,
    /// Handshake cookies unanswered for this long are purged.
    pub cookie_lifetime_secs: u64,
    /// Per-session policy.
    pub session: SessionConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            port: 7075,
            max_inbound_connections: 2048,
            max_peers_per_ip: 4,
            max_peers_per_subnetwork: 16,
            disable_max_peers_per_ip: false,
            disable_max_peers_per_subnetwork: false,
            allow_bootstrap: true,
            requeue_delay_ms: 1000,
            maintenance_interval_secs: 15,
            idle_timeout_secs: 120,
            cookie_lifetime_secs: 5,
            session: SessionConfig::default(),
        }
    }
}

/// Per-session policy shared by every session of a listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Handshakes may promote sessions to realtime.
    pub realtime_enabled: bool,
    /// Sessions may be promoted to bootstrap at all.
    pub bootstrap_listener_enabled: bool,
    /// Ceiling on concurrent bootstrap sessions.
    pub bootstrap_connections_max: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            realtime_enabled: true,
            bootstrap_listener_enabled: true,
            bootstrap_connections_max: 64,
        }
    }
}

impl ListenerConfig {
    /// Loopback config with small ceilings and short timers.
    pub fn for_testing() -> Self {
        Self {
            listen_addr: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: 0,
            max_inbound_connections: 16,
            max_peers_per_ip: 2,
            max_peers_per_subnetwork: 8,
            requeue_delay_ms: 20,
            maintenance_interval_secs: 1,
            idle_timeout_secs: 5,
            ..Self::default()
        }
    }

    /// Load and validate from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_inbound_connections == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_inbound_connections cannot be 0".into(),
            ));
        }
        if !self.disable_max_peers_per_ip && self.max_peers_per_ip == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_peers_per_ip cannot be 0".into(),
            ));
        }
        if !self.disable_max_peers_per_subnetwork
            && self.max_peers_per_subnetwork < self.max_peers_per_ip
        {
            return Err(ConfigError::InvalidLimit(
                "max_peers_per_subnetwork cannot be below max_peers_per_ip".into(),
            ));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(ConfigError::InvalidTimeout(
                "maintenance_interval_secs cannot be 0".into(),
            ));
        }
        if self.cookie_lifetime_secs == 0 {
            return Err(ConfigError::InvalidTimeout(
                "cookie_lifetime_secs cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// Address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.port)
    }

    /// Accept back-off.
    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    /// Sweep period.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Idle bound.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Age at which an unanswered cookie is purged.
    pub fn cookie_lifetime(&self) -> Duration {
        Duration::from_secs(self.cookie_lifetime_secs)
    }
}

/// Errors that can occur during config loading.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("Failed to read {path}: {error}")]
    Io {
        /// Path of the file that failed to load.
        path: String,
        /// Error message from the I/O operation.
        error: String,
    },

    /// TOML parsing error.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A connection limit is out of range.
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// A timer is out of range.
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),
}
