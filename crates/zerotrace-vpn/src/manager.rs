//! VPN Session Manager
//!
//! Owns the connection status, the active session and the stats poller,
//! and drives a [`Transport`] through connect and disconnect.
//!
//! # Usage
//!
//! ```rust,ignore
//! let vpn = Arc::new(SessionManager::from_config(&ClientConfig::default())?);
//! vpn.initialize().await?;
//!
//! let server = vpn.catalog().smart_connect().cloned().unwrap();
//! vpn.connect(&server).await?;
//!
//! if let Some(stats) = vpn.stats() {
//!     println!("{}", stats);
//! }
//!
//! vpn.cleanup().await;
//! ```
//!
//! # State Machine
//!
//! ```text
//!              connect                success
//! Disconnected ───────▶ Connecting ───────────▶ Connected
//!      ▲                 │      │                   │
//!      │        failure  │      │ disconnect        │ disconnect
//!      │                 ▼      ▼                   ▼
//!      │  connect/reset Error  Disconnecting ◀──────┘
//!      └────────────────────────────┘
//! ```
//!
//! Only one connect or disconnect runs at a time. A second `connect`
//! while one is in flight is rejected with [`SessionError::AlreadyInProgress`];
//! a `disconnect` during `Connecting` cancels the attempt.

use crate::config::{ClientConfig, ConfigError};
use crate::poller::StatsPoller;
use crate::server::{Protocol, Server, ServerCatalog};
use crate::session::{ConnectionStatus, Session, Shared};
use crate::stats::ConnectionStats;
use crate::transport::{SimulatedTransport, Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default stats polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Session manager errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("A connect or disconnect is already in progress")]
    AlreadyInProgress,

    #[error("Server not in catalog: {0}")]
    InvalidServer(String),

    #[error("Connect cancelled by disconnect")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Holds the single transition slot for the life of a connect/disconnect
///
/// Dropping it mid-transition (the caller's future was dropped) settles
/// the state to `Disconnected`. A tunnel the dropped call may have left
/// up is tracked by `SessionManager::stale_tunnel` and torn down by the
/// next transition.
struct Transition<'a> {
    shared: &'a Shared,
}

impl<'a> Transition<'a> {
    fn begin(shared: &'a Shared) -> Option<Self> {
        shared.try_begin_transition().then_some(Self { shared })
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        let abandoned = self.shared.update(|state| {
            if state.status().is_transitioning() {
                state.disconnected();
                true
            } else {
                false
            }
        });
        if abandoned {
            warn!("Transition abandoned before completion, settled to Disconnected");
        }
        self.shared.end_transition();
    }
}

/// VPN Session Manager
///
/// Construct one per UI and hand it out (usually inside an `Arc`) to
/// whatever needs it. All methods take `&self`; queries never block on
/// a transition.
pub struct SessionManager {
    catalog: ServerCatalog,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    poller: Mutex<Option<StatsPoller>>,
    poll_interval: Duration,
    /// Set while an establish or teardown is awaited; still set afterwards
    /// if that call was dropped before finishing
    stale_tunnel: AtomicBool,
}

impl SessionManager {
    /// Create a manager over `transport`
    pub fn new(catalog: ServerCatalog, transport: Arc<dyn Transport>) -> Self {
        Self {
            catalog,
            transport,
            shared: Arc::new(Shared::new()),
            poller: Mutex::new(None),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_tunnel: AtomicBool::new(false),
        }
    }

    /// Override the stats polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create a manager backed by a [`SimulatedTransport`]
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = SimulatedTransport::new(config.protocol, config.simulation.clone());
        Ok(Self::new(config.catalog()?, Arc::new(transport))
            .with_poll_interval(config.poll_interval()))
    }

    /// Simulated manager with the built-in catalog
    pub fn simulated() -> Self {
        Self::new(
            ServerCatalog::default_catalog(),
            Arc::new(SimulatedTransport::default()),
        )
    }

    /// Get current status
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Check if a session is active
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Available servers in catalog order
    pub fn servers(&self) -> &[Server] {
        self.catalog.servers()
    }

    pub fn catalog(&self) -> &ServerCatalog {
        &self.catalog
    }

    /// Protocol of the underlying transport
    pub fn protocol(&self) -> Protocol {
        self.transport.protocol()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Stats for the active session, `None` when not connected
    pub fn stats(&self) -> Option<ConnectionStats> {
        let now = Instant::now();
        self.shared.read(|state| state.session().map(|s| s.stats(now)))
    }

    /// Server of the active session
    pub fn current_server(&self) -> Option<Server> {
        self.shared.read(|state| state.session().map(|s| s.server.clone()))
    }

    /// Message of the most recent failure, cleared on the next connect
    pub fn last_error(&self) -> Option<String> {
        self.shared.read(|state| state.last_error().map(str::to_string))
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.subscribe_status()
    }

    /// Watch stats published by the poller
    ///
    /// Holds `None` whenever no session exists.
    pub fn subscribe_stats(&self) -> watch::Receiver<Option<ConnectionStats>> {
        self.shared.subscribe_stats()
    }

    /// Acquire transport resources
    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.transport.initialize().await?;
        info!(
            "Session manager initialized ({} servers, {})",
            self.catalog.len(),
            self.protocol()
        );
        Ok(())
    }

    /// Connect to `server`
    ///
    /// `server` must be an unmodified catalog entry, the smart-connect
    /// sentinel included. Connecting from `Error` clears the failure first.
    pub async fn connect(&self, server: &Server) -> Result<(), SessionError> {
        if !self.catalog.contains(server) {
            warn!("Rejected connect to unknown server {}", server.id);
            return Err(SessionError::InvalidServer(server.id.clone()));
        }

        let Some(_transition) = Transition::begin(&self.shared) else {
            debug!("Connect to {} rejected: transition in progress", server.id);
            return Err(SessionError::AlreadyInProgress);
        };

        let previous = self.shared.update(|state| {
            let previous = state.status();
            if !previous.is_connected() {
                state.begin_connect();
            }
            previous
        });
        match previous {
            ConnectionStatus::Connected => {
                debug!("Connect to {} rejected: already connected", server.id);
                return Err(SessionError::AlreadyInProgress);
            }
            ConnectionStatus::Error => {
                info!("Recovering from failed state");
                self.stop_poller().await;
            }
            _ => {}
        }

        self.reclaim_stale_tunnel().await;

        info!("Connecting to {} ({})", server, server.endpoint());
        let mut status_rx = self.shared.subscribe_status();
        self.stale_tunnel.store(true, Ordering::SeqCst);
        let outcome = tokio::select! {
            result = self.transport.establish(server) => Some(result),
            _ = disconnect_requested(&mut status_rx) => None,
        };
        if outcome.is_some() {
            self.stale_tunnel.store(false, Ordering::SeqCst);
        }

        match outcome {
            Some(Ok(())) => {
                let connected = self.shared.update(|state| {
                    if state.status() == ConnectionStatus::Connecting {
                        state.connected(Session::new(server.clone()));
                        true
                    } else {
                        false
                    }
                });
                if !connected {
                    return self.abort_connect(server).await;
                }

                self.start_poller();
                info!("VPN connected to {}", server);
                Ok(())
            }
            Some(Err(e)) => {
                error!("Connection to {} failed: {}", server, e);
                self.shared.update(|state| {
                    if state.status() == ConnectionStatus::Connecting {
                        state.failed(e.to_string());
                    } else {
                        state.disconnected();
                    }
                });
                Err(SessionError::ConnectionFailed(e.to_string()))
            }
            None => self.abort_connect(server).await,
        }
    }

    async fn abort_connect(&self, server: &Server) -> Result<(), SessionError> {
        info!("Connect to {} cancelled", server);
        self.teardown_transport().await;
        self.shared.update(|state| state.disconnected());
        Err(SessionError::Cancelled)
    }

    /// Disconnect
    ///
    /// Always ends in `Disconnected`. Safe to call repeatedly and from
    /// any state; a pending connect is cancelled.
    pub async fn disconnect(&self) {
        loop {
            if let Some(_transition) = Transition::begin(&self.shared) {
                self.settle_disconnected().await;
                return;
            }

            let cancelling = self.shared.update(|state| {
                if state.status() == ConnectionStatus::Connecting {
                    state.begin_disconnect();
                    true
                } else {
                    false
                }
            });
            if cancelling {
                info!("Cancelling connect in progress");
            }
            self.shared.transition_idle().await;
        }
    }

    /// Runs with the transition slot held, so nothing is mid-transition
    async fn settle_disconnected(&self) {
        let previous = self.shared.update(|state| {
            let previous = state.status();
            match previous {
                ConnectionStatus::Connected => state.begin_disconnect(),
                ConnectionStatus::Disconnected => {}
                _ => state.disconnected(),
            }
            previous
        });

        match previous {
            ConnectionStatus::Disconnected => {
                if !self.reclaim_stale_tunnel().await {
                    debug!("Disconnect ignored: already disconnected");
                }
            }
            ConnectionStatus::Connected => {
                info!("Disconnecting VPN");
                self.stop_poller().await;
                self.teardown_transport().await;
                self.shared.update(|state| state.disconnected());
                info!("VPN disconnected");
            }
            other => {
                debug!("Cleared {:?} state", other);
                self.stop_poller().await;
                self.reclaim_stale_tunnel().await;
            }
        }
    }

    /// Return from `Error` to `Disconnected` without connecting
    pub async fn reset(&self) -> Result<(), SessionError> {
        let Some(_transition) = Transition::begin(&self.shared) else {
            return Err(SessionError::AlreadyInProgress);
        };

        let was_failed = self.shared.update(|state| {
            if state.status() == ConnectionStatus::Error {
                state.disconnected();
                true
            } else {
                false
            }
        });
        if was_failed {
            self.stop_poller().await;
            info!("Session manager reset");
        }
        Ok(())
    }

    /// Disconnect and release transport resources
    ///
    /// No stats are published after this returns.
    pub async fn cleanup(&self) {
        self.disconnect().await;
        self.stop_poller().await;

        if let Err(e) = self.transport.release().await {
            warn!("Transport release failed: {}", e);
        }
        info!("Session manager cleaned up");
    }

    async fn teardown_transport(&self) {
        self.stale_tunnel.store(true, Ordering::SeqCst);
        if let Err(e) = self.transport.teardown().await {
            warn!("Tunnel teardown reported failure: {}", e);
        }
        self.stale_tunnel.store(false, Ordering::SeqCst);
    }

    /// Finish a teardown an interrupted transition left behind
    ///
    /// Caller holds the transition slot.
    async fn reclaim_stale_tunnel(&self) -> bool {
        if !self.stale_tunnel.load(Ordering::SeqCst) {
            return false;
        }
        info!("Tearing down tunnel left by an interrupted transition");
        self.teardown_transport().await;
        true
    }

    fn start_poller(&self) {
        let poller = StatsPoller::spawn(
            self.shared.clone(),
            self.transport.clone(),
            self.poll_interval,
        );
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(poller);
        if let Some(stale) = previous {
            stale.abort();
        }
    }

    async fn stop_poller(&self) {
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            poller.stop().await;
        }
        self.shared.publish_stats(None);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(poller) = self
            .poller
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            poller.abort();
        }
    }
}

async fn disconnect_requested(rx: &mut watch::Receiver<ConnectionStatus>) {
    let _ = rx
        .wait_for(|status| *status == ConnectionStatus::Disconnecting)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated() -> (Arc<SessionManager>, Arc<SimulatedTransport>) {
        let transport = Arc::new(SimulatedTransport::default());
        let manager = SessionManager::new(ServerCatalog::default_catalog(), transport.clone());
        (Arc::new(manager), transport)
    }

    fn server(manager: &SessionManager, id: &str) -> Server {
        manager.catalog().find(id).unwrap().clone()
    }

    #[tokio::test]
    async fn test_manager_creation() {
        let vpn = SessionManager::simulated();

        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);
        assert_eq!(vpn.protocol(), Protocol::WireGuard);
        assert_eq!(vpn.servers().len(), 6);
        assert!(vpn.stats().is_none());
        assert!(vpn.current_server().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_then_disconnect() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();

        let usa = server(&vpn, "usa-1");
        vpn.connect(&usa).await.unwrap();

        assert!(vpn.is_connected());
        assert_eq!(vpn.current_server(), Some(usa));
        assert!(transport.has_tunnel());

        vpn.disconnect().await;
        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);
        assert!(vpn.current_server().is_none());
        assert!(!transport.has_tunnel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connected_is_rejected() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();
        vpn.connect(&server(&vpn, "usa-1")).await.unwrap();

        let result = vpn.connect(&server(&vpn, "japan-1")).await;

        assert_eq!(result, Err(SessionError::AlreadyInProgress));
        assert_eq!(vpn.current_server().unwrap().id, "usa-1");
        assert_eq!(transport.establish_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_server() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();

        let mut forged = server(&vpn, "germany-1");
        forged.port = 443;
        assert_eq!(
            vpn.connect(&forged).await,
            Err(SessionError::InvalidServer("germany-1".into()))
        );

        let unknown = Server::new("mars-1", "Mars", "Mars", "MR", "mars.example");
        assert!(matches!(
            vpn.connect(&unknown).await,
            Err(SessionError::InvalidServer(_))
        ));

        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);
        assert_eq!(transport.establish_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_settles_to_error() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();
        transport.fail_next_connects(1);

        let usa = server(&vpn, "usa-1");
        let result = vpn.connect(&usa).await;

        assert!(matches!(result, Err(SessionError::ConnectionFailed(_))));
        assert_eq!(vpn.status(), ConnectionStatus::Error);
        assert!(vpn.last_error().unwrap().contains("us1.zerotrace.vpn"));
        assert!(vpn.stats().is_none());

        // Retry is allowed straight away
        vpn.connect(&usa).await.unwrap();
        assert!(vpn.is_connected());
        assert!(vpn.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_before_initialize_fails() {
        let (vpn, _transport) = simulated();

        let result = vpn.connect(&server(&vpn, "usa-1")).await;

        assert_eq!(
            result,
            Err(SessionError::ConnectionFailed(
                TransportError::NotInitialized.to_string()
            ))
        );
        assert_eq!(vpn.status(), ConnectionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();
        transport.fail_next_connects(1);
        let _ = vpn.connect(&server(&vpn, "usa-1")).await;

        vpn.reset().await.unwrap();
        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);

        // No-op outside Error
        vpn.reset().await.unwrap();
        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_failure_is_not_fatal() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();
        vpn.connect(&server(&vpn, "finland-1")).await.unwrap();
        transport.fail_teardowns(true);

        vpn.disconnect().await;
        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tunnel_loss_moves_to_error() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();
        vpn.connect(&server(&vpn, "canada-1")).await.unwrap();

        // Tunnel vanishes underneath the session
        transport.teardown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(vpn.status(), ConnectionStatus::Error);
        assert!(vpn.current_server().is_none());
        assert!(vpn.stats().is_none());
        assert_eq!(vpn.last_error().as_deref(), Some("tunnel lost"));

        vpn.disconnect().await;
        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_connect_settles() {
        let (vpn, _transport) = simulated();
        vpn.initialize().await.unwrap();

        let usa = server(&vpn, "usa-1");
        let attempt = tokio::time::timeout(Duration::from_millis(500), vpn.connect(&usa)).await;

        assert!(attempt.is_err());
        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);

        // Slot was released
        vpn.connect(&usa).await.unwrap();
        assert!(vpn.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_modified_smart_connect_is_rejected() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();

        let mut forged = vpn.catalog().smart_connect().unwrap().clone();
        forged.hostname = "relay.example.com".into();
        forged.port = 1;

        assert_eq!(
            vpn.connect(&forged).await,
            Err(SessionError::InvalidServer(forged.id.clone()))
        );
        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);
        assert_eq!(transport.establish_calls(), 0);

        let smart = vpn.catalog().smart_connect().unwrap().clone();
        vpn.connect(&smart).await.unwrap();
        assert_eq!(vpn.current_server(), Some(smart));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_disconnect_tears_down_on_retry() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();
        vpn.connect(&server(&vpn, "usa-1")).await.unwrap();

        // Teardown takes 500ms; give up partway through
        let attempt = tokio::time::timeout(Duration::from_millis(100), vpn.disconnect()).await;
        assert!(attempt.is_err());
        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);
        assert!(transport.has_tunnel());

        vpn.disconnect().await;
        assert_eq!(vpn.status(), ConnectionStatus::Disconnected);
        assert!(!transport.has_tunnel());

        // Nothing left to reclaim
        vpn.disconnect().await;
        assert!(!transport.has_tunnel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_disconnect_tears_down_before_connect() {
        let (vpn, transport) = simulated();
        vpn.initialize().await.unwrap();
        vpn.connect(&server(&vpn, "usa-1")).await.unwrap();

        let attempt = tokio::time::timeout(Duration::from_millis(100), vpn.disconnect()).await;
        assert!(attempt.is_err());

        let japan = server(&vpn, "japan-1");
        vpn.connect(&japan).await.unwrap();
        assert_eq!(vpn.current_server(), Some(japan));
        assert!(transport.has_tunnel());
        assert_eq!(transport.establish_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_published_each_interval() {
        let (vpn, _transport) = simulated();
        vpn.initialize().await.unwrap();
        let mut stats_rx = vpn.subscribe_stats();

        vpn.connect(&server(&vpn, "japan-1")).await.unwrap();
        assert!(stats_rx.borrow_and_update().is_none());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(stats_rx.has_changed().unwrap());
        let stats = stats_rx.borrow_and_update().unwrap();
        assert_eq!(stats.connected_duration, 1);
        assert!(stats.upload_speed >= 0.0 && stats.upload_speed <= 20.0);
        assert!(stats.download_speed >= 0.0 && stats.download_speed <= 20.0);
    }
}
