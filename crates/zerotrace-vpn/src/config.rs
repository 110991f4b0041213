//! Client Configuration
//!
//! Session timing, simulated transport tuning and the server catalog,
//! loadable from TOML or JSON.
//!
//! ```toml
//! poll_interval_ms = 1000
//! protocol = "wireguard"
//!
//! [simulation]
//! connect_delay_ms = 2000
//! disconnect_delay_ms = 500
//! max_rate_mbps = 20.0
//!
//! [[servers]]
//! id = "smart-connect"
//! name = "Smart Connect"
//! country = "Auto"
//! country_code = "AUTO"
//! hostname = "smart.zerotrace.vpn"
//! ```

use crate::server::{default_servers, Protocol, Server, ServerCatalog};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Shortest accepted stats polling interval
pub const MIN_POLL_INTERVAL_MS: u64 = 50;

/// Simulated transport tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Delay before a connect attempt completes
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    /// Delay before a teardown completes
    #[serde(default = "default_disconnect_delay_ms")]
    pub disconnect_delay_ms: u64,
    /// Ceiling for synthesized throughput (Mbps)
    #[serde(default = "default_max_rate_mbps")]
    pub max_rate_mbps: f64,
}

fn default_connect_delay_ms() -> u64 {
    2000
}

fn default_disconnect_delay_ms() -> u64 {
    500
}

fn default_max_rate_mbps() -> f64 {
    20.0
}

impl SimulationConfig {
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub fn disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_delay_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: default_connect_delay_ms(),
            disconnect_delay_ms: default_disconnect_delay_ms(),
            max_rate_mbps: default_max_rate_mbps(),
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Stats polling interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Preferred protocol
    #[serde(default)]
    pub protocol: Protocol,
    /// Simulated transport settings
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Server catalog (built-in list when omitted)
    #[serde(default = "default_servers")]
    pub servers: Vec<Server>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl ClientConfig {
    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config = match ext {
            "toml" => Self::from_toml(&content)?,
            "json" => Self::from_json(&content)?,
            _ => return Err(ConfigError::UnsupportedFormat),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse JSON
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Build the validated server catalog
    pub fn catalog(&self) -> Result<ServerCatalog, ConfigError> {
        ServerCatalog::new(self.servers.clone())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::InvalidPollInterval(self.poll_interval_ms));
        }
        if !self.simulation.max_rate_mbps.is_finite() || self.simulation.max_rate_mbps < 0.0 {
            return Err(ConfigError::InvalidRate);
        }
        self.catalog().map(|_| ())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            protocol: Protocol::default(),
            simulation: SimulationConfig::default(),
            servers: default_servers(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format")]
    UnsupportedFormat,

    #[error("Invalid server port")]
    InvalidPort,

    #[error("Poll interval {0}ms is below the 50ms minimum")]
    InvalidPollInterval(u64),

    #[error("Invalid throughput ceiling")]
    InvalidRate,

    #[error("Unknown protocol: {0}")]
    InvalidProtocol(String),

    #[error("Duplicate server id: {0}")]
    DuplicateServer(String),

    #[error("Catalog has no smart-connect entry")]
    MissingSmartConnect,

    #[error("Catalog has no country servers")]
    NoCountryServers,
}
