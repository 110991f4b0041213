//! Transport Seam
//!
//! The session manager never talks to a network directly. It drives a
//! [`Transport`], which a real WireGuard or OpenVPN client implements.
//!
//! # Lifecycle
//!
//! ```text
//! initialize ─▶ establish ─▶ sample* ─▶ teardown ─▶ ... ─▶ release
//! ```
//!
//! [`SimulatedTransport`] stands in for a real client: it waits a fixed
//! delay on establish and teardown and synthesizes byte counters.

use crate::config::SimulationConfig;
use crate::server::{Protocol, Server};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info};

/// Cumulative byte counters reported by a transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    /// Bytes sent through the tunnel
    pub uploaded: u64,
    /// Bytes received through the tunnel
    pub downloaded: u64,
}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport not initialized")]
    NotInitialized,

    #[error("No active tunnel")]
    NotConnected,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Teardown failed: {0}")]
    TeardownFailed(String),

    #[error("Resource error: {0}")]
    Resource(String),
}

/// The protocol client a session manager drives
#[async_trait]
pub trait Transport: Send + Sync {
    /// Protocol this transport speaks
    fn protocol(&self) -> Protocol;

    /// Acquire sockets, interfaces or native handles
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Bring a tunnel up to `server`
    async fn establish(&self, server: &Server) -> Result<(), TransportError>;

    /// Read the cumulative counters of the active tunnel
    async fn sample(&self) -> Result<TrafficCounters, TransportError>;

    /// Bring the active tunnel down
    async fn teardown(&self) -> Result<(), TransportError>;

    /// Release everything acquired by `initialize`
    async fn release(&self) -> Result<(), TransportError>;
}

struct SimulatedTunnel {
    counters: TrafficCounters,
    last_sample: Instant,
}

/// Transport that fabricates a tunnel
///
/// Counters grow by a random rate below `max_rate_mbps` for the time
/// elapsed since the previous sample.
pub struct SimulatedTransport {
    protocol: Protocol,
    config: SimulationConfig,
    initialized: AtomicBool,
    tunnel: Mutex<Option<SimulatedTunnel>>,
    /// Remaining establish attempts to fail
    fail_connects: AtomicU32,
    fail_teardown: AtomicBool,
    establish_calls: AtomicU32,
}

impl SimulatedTransport {
    /// Create a simulated transport
    pub fn new(protocol: Protocol, config: SimulationConfig) -> Self {
        Self {
            protocol,
            config,
            initialized: AtomicBool::new(false),
            tunnel: Mutex::new(None),
            fail_connects: AtomicU32::new(0),
            fail_teardown: AtomicBool::new(false),
            establish_calls: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` establish attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.fail_connects.store(count, Ordering::SeqCst);
    }

    /// Make every teardown report an error (the tunnel still goes away)
    pub fn fail_teardowns(&self, fail: bool) {
        self.fail_teardown.store(fail, Ordering::SeqCst);
    }

    /// Number of establish attempts so far
    pub fn establish_calls(&self) -> u32 {
        self.establish_calls.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Is a simulated tunnel up?
    pub fn has_tunnel(&self) -> bool {
        self.tunnel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn synthesize(&self, elapsed_secs: f64) -> (u64, u64) {
        let mut rng = rand::thread_rng();
        let max = self.config.max_rate_mbps.max(0.0);
        let (up_mbps, down_mbps) = if max > 0.0 {
            (rng.gen_range(0.0..max), rng.gen_range(0.0..max))
        } else {
            (0.0, 0.0)
        };
        let to_bytes = |mbps: f64| (mbps * 1_000_000.0 / 8.0 * elapsed_secs) as u64;
        (to_bytes(up_mbps), to_bytes(down_mbps))
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(Protocol::WireGuard, SimulationConfig::default())
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        self.initialized.store(true, Ordering::SeqCst);
        info!("Simulated {} transport initialized", self.protocol);
        Ok(())
    }

    async fn establish(&self, server: &Server) -> Result<(), TransportError> {
        if !self.is_initialized() {
            return Err(TransportError::NotInitialized);
        }
        self.establish_calls.fetch_add(1, Ordering::SeqCst);

        debug!("Simulating handshake with {}", server.endpoint());
        tokio::time::sleep(self.config.connect_delay()).await;

        let failing = self
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::HandshakeFailed(format!(
                "{} did not respond",
                server.endpoint()
            )));
        }

        *self.tunnel.lock().unwrap_or_else(PoisonError::into_inner) = Some(SimulatedTunnel {
            counters: TrafficCounters::default(),
            last_sample: Instant::now(),
        });
        Ok(())
    }

    async fn sample(&self) -> Result<TrafficCounters, TransportError> {
        let mut guard = self.tunnel.lock().unwrap_or_else(PoisonError::into_inner);
        let tunnel = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let now = Instant::now();
        let elapsed = now.duration_since(tunnel.last_sample).as_secs_f64();
        let (up, down) = self.synthesize(elapsed);

        tunnel.counters.uploaded += up;
        tunnel.counters.downloaded += down;
        tunnel.last_sample = now;
        Ok(tunnel.counters)
    }

    async fn teardown(&self) -> Result<(), TransportError> {
        tokio::time::sleep(self.config.disconnect_delay()).await;
        self.tunnel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(TransportError::TeardownFailed(
                "interface did not report down".into(),
            ));
        }
        Ok(())
    }

    async fn release(&self) -> Result<(), TransportError> {
        self.tunnel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.initialized.store(false, Ordering::SeqCst);
        info!("Simulated {} transport released", self.protocol);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerCatalog;
    use std::time::Duration;

    fn usa() -> Server {
        ServerCatalog::default_catalog().find("usa-1").unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_requires_initialize() {
        let transport = SimulatedTransport::default();

        assert_eq!(
            transport.establish(&usa()).await,
            Err(TransportError::NotInitialized)
        );
        assert_eq!(transport.establish_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_waits_connect_delay() {
        let transport = SimulatedTransport::default();
        transport.initialize().await.unwrap();

        let start = Instant::now();
        transport.establish(&usa()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(transport.has_tunnel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_failures_are_consumed() {
        let transport = SimulatedTransport::default();
        transport.initialize().await.unwrap();
        transport.fail_next_connects(1);

        assert!(matches!(
            transport.establish(&usa()).await,
            Err(TransportError::HandshakeFailed(_))
        ));
        assert!(!transport.has_tunnel());

        transport.establish(&usa()).await.unwrap();
        assert_eq!(transport.establish_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_grow_within_ceiling() {
        let transport = SimulatedTransport::default();
        transport.initialize().await.unwrap();
        transport.establish(&usa()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let first = transport.sample().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = transport.sample().await.unwrap();

        assert!(second.uploaded >= first.uploaded);
        assert!(second.downloaded >= first.downloaded);
        // 20 Mbps for one second is 2.5 MB
        assert!(second.downloaded - first.downloaded <= 2_500_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_failure_still_drops_tunnel() {
        let transport = SimulatedTransport::default();
        transport.initialize().await.unwrap();
        transport.establish(&usa()).await.unwrap();
        transport.fail_teardowns(true);

        assert!(transport.teardown().await.is_err());
        assert!(!transport.has_tunnel());
        assert_eq!(transport.sample().await, Err(TransportError::NotConnected));
    }
}
