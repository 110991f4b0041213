//! ZeroTrace VPN - Session Core
//!
//! The session-state contract a VPN front-end depends on: connection
//! status, the active server, and live traffic statistics, behind an
//! async control surface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      UI / CLI driver                      │
//! └───────────────┬──────────────────────────▲───────────────┘
//!                 │ connect / disconnect     │ status, stats
//!                 ▼                          │ (query or watch)
//! ┌──────────────────────────────────────────┴───────────────┐
//! │                     SessionManager                        │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//! │  │ ServerCatalog│   │ SessionState │◀──│ StatsPoller  │  │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘  │
//! └────────────────────────┬──────────────────────│──────────┘
//!                          │ establish / teardown │ sample
//!                          ▼                      ▼
//!                 ┌────────────────────────────────────┐
//!                 │  Transport (WireGuard / OpenVPN)   │
//!                 └────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - A session exists if and only if the status is `Connected`
//! - At most one connect or disconnect runs at a time
//! - `disconnect` always ends in `Disconnected`, and repeating it is harmless
//! - No stats are published after `disconnect` or `cleanup` return

mod config;
mod manager;
mod poller;
mod server;
mod session;
mod stats;
mod transport;

pub use config::{ClientConfig, ConfigError, SimulationConfig, MIN_POLL_INTERVAL_MS};
pub use manager::{SessionError, SessionManager, DEFAULT_POLL_INTERVAL};
pub use server::{Protocol, Server, ServerCatalog, DEFAULT_PORT, SMART_CONNECT_ID};
pub use session::ConnectionStatus;
pub use stats::{format_duration, ConnectionStats};
pub use transport::{SimulatedTransport, TrafficCounters, Transport, TransportError};
