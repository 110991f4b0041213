//! Server Catalog
//!
//! Read-only reference data describing the VPN endpoints a session can
//! be bound to.
//!
//! # Default Servers
//!
//! | Id | Country | Code |
//! |----|---------|------|
//! | smart-connect | Auto | AUTO |
//! | usa-1 | United States | US |
//! | germany-1 | Germany | DE |
//! | canada-1 | Canada | CA |
//! | finland-1 | Finland | FI |
//! | japan-1 | Japan | JP |
//!
//! The `smart-connect` entry is a sentinel: it asks the transport to pick
//! the best endpoint instead of naming a fixed country.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifier of the automatic "best server" entry
pub const SMART_CONNECT_ID: &str = "smart-connect";

/// Standard WireGuard port
pub const DEFAULT_PORT: u16 = 51820;

/// VPN protocol spoken by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    WireGuard,
    OpenVpn,
}

impl Protocol {
    /// Get all supported protocols
    pub fn all() -> &'static [Protocol] {
        &[Protocol::WireGuard, Protocol::OpenVpn]
    }

    /// Display title
    pub fn title(&self) -> &'static str {
        match self {
            Protocol::WireGuard => "WireGuard",
            Protocol::OpenVpn => "OpenVPN",
        }
    }

    /// One-line description shown in protocol pickers
    pub fn description(&self) -> &'static str {
        match self {
            Protocol::WireGuard => {
                "Modern, fast, and secure VPN protocol with state-of-the-art cryptography."
            }
            Protocol::OpenVpn => {
                "Mature and widely supported VPN protocol with excellent compatibility."
            }
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

impl std::str::FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wireguard" | "wg" => Ok(Protocol::WireGuard),
            "openvpn" | "ovpn" => Ok(Protocol::OpenVpn),
            _ => Err(ConfigError::InvalidProtocol(s.to_string())),
        }
    }
}

/// A VPN endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Country name
    pub country: String,
    /// ISO country code (`AUTO` for the sentinel)
    pub country_code: String,
    /// Transport hostname
    pub hostname: String,
    /// Transport port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Protocol the endpoint speaks
    #[serde(default)]
    pub protocol: Protocol,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Server {
    /// Create a WireGuard server on the standard port
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        country: impl Into<String>,
        country_code: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            country: country.into(),
            country_code: country_code.into(),
            hostname: hostname.into(),
            port: DEFAULT_PORT,
            protocol: Protocol::WireGuard,
        }
    }

    /// Is this the automatic selection entry?
    pub fn is_smart_connect(&self) -> bool {
        self.id == SMART_CONNECT_ID
    }

    /// `hostname:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl std::fmt::Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Ordered server list with lookup and search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCatalog {
    servers: Vec<Server>,
}

impl ServerCatalog {
    /// Build a catalog, rejecting inconsistent entries
    pub fn new(servers: Vec<Server>) -> Result<Self, ConfigError> {
        let catalog = Self { servers };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The built-in six-entry catalog
    pub fn default_catalog() -> Self {
        Self {
            servers: default_servers(),
        }
    }

    /// Check ids, ports and the sentinel entry
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::DuplicateServer(server.id.clone()));
            }
            if server.port == 0 {
                return Err(ConfigError::InvalidPort);
            }
        }

        if !seen.contains(SMART_CONNECT_ID) {
            return Err(ConfigError::MissingSmartConnect);
        }
        if self.countries().next().is_none() {
            return Err(ConfigError::NoCountryServers);
        }
        Ok(())
    }

    /// All servers in catalog order
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Find a server by id
    pub fn find(&self, id: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// The automatic selection entry
    pub fn smart_connect(&self) -> Option<&Server> {
        self.find(SMART_CONNECT_ID)
    }

    /// Is `server` an unmodified catalog entry?
    pub fn contains(&self, server: &Server) -> bool {
        self.find(&server.id).is_some_and(|s| s == server)
    }

    /// Country-specific entries (everything but the sentinel)
    pub fn countries(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter().filter(|s| !s.is_smart_connect())
    }

    /// Case-insensitive substring match on display name
    pub fn search(&self, query: &str) -> Vec<&Server> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return self.servers.iter().collect();
        }
        self.servers
            .iter()
            .filter(|s| s.name.to_lowercase().contains(&q))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl Default for ServerCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}

pub(crate) fn default_servers() -> Vec<Server> {
    vec![
        Server::new(
            SMART_CONNECT_ID,
            "Smart Connect",
            "Auto",
            "AUTO",
            "smart.zerotrace.vpn",
        ),
        Server::new("usa-1", "USA", "United States", "US", "us1.zerotrace.vpn"),
        Server::new("germany-1", "Germany", "Germany", "DE", "de1.zerotrace.vpn"),
        Server::new("canada-1", "Canada", "Canada", "CA", "ca1.zerotrace.vpn"),
        Server::new("finland-1", "Finland", "Finland", "FI", "fi1.zerotrace.vpn"),
        Server::new("japan-1", "Japan", "Japan", "JP", "jp1.zerotrace.vpn"),
    ]
}
