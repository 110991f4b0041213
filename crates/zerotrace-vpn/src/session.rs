//! Session state shared by the manager and the stats poller.
//!
//! Status and session live behind one lock so a reader never sees a
//! session outside `Connected`. Every change is mirrored onto a watch
//! channel for subscribers.

use crate::server::Server;
use crate::stats::{ConnectionStats, Throughput};
use crate::transport::TrafficCounters;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;

/// VPN connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// No tunnel
    #[default]
    Disconnected,
    /// Establishing a tunnel
    Connecting,
    /// Tunnel up, session active
    Connected,
    /// Tearing the tunnel down
    Disconnecting,
    /// Last attempt or session failed
    Error,
}

impl ConnectionStatus {
    /// Check if a session is active
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Check if a connect or disconnect is under way
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Disconnecting
        )
    }

    /// Label for a connect button
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Tap to Connect",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnecting => "Disconnecting...",
            ConnectionStatus::Error => "Connection Failed",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An active connection
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub server: Server,
    pub started_at: Instant,
    counters: TrafficCounters,
    throughput: Throughput,
    last_sample: Instant,
}

impl Session {
    pub fn new(server: Server) -> Self {
        let now = Instant::now();
        Self {
            server,
            started_at: now,
            counters: TrafficCounters::default(),
            throughput: Throughput::default(),
            last_sample: now,
        }
    }

    /// Fold a transport sample into the session
    pub fn record(&mut self, counters: TrafficCounters, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_sample);
        self.throughput = Throughput::between(self.counters, counters, elapsed);
        self.counters = counters;
        self.last_sample = now;
    }

    pub fn stats(&self, now: Instant) -> ConnectionStats {
        ConnectionStats {
            upload_speed: self.throughput.upload_mbps,
            download_speed: self.throughput.download_mbps,
            bytes_uploaded: self.counters.uploaded,
            bytes_downloaded: self.counters.downloaded,
            connected_duration: now.saturating_duration_since(self.started_at).as_secs(),
        }
    }
}

/// Status plus the session it implies
///
/// Fields are private so every transition goes through a method that
/// keeps `session.is_some() == (status == Connected)`.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    status: ConnectionStatus,
    session: Option<Session>,
    last_error: Option<String>,
}

impl SessionState {
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn begin_connect(&mut self) {
        self.status = ConnectionStatus::Connecting;
        self.session = None;
        self.last_error = None;
    }

    pub fn connected(&mut self, session: Session) {
        self.status = ConnectionStatus::Connected;
        self.session = Some(session);
    }

    pub fn begin_disconnect(&mut self) {
        self.status = ConnectionStatus::Disconnecting;
        self.session = None;
    }

    pub fn disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.session = None;
    }

    pub fn failed(&mut self, reason: impl Into<String>) {
        self.status = ConnectionStatus::Error;
        self.session = None;
        self.last_error = Some(reason.into());
    }
}

/// State and channels shared between the manager and its poller
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    status_tx: watch::Sender<ConnectionStatus>,
    stats_tx: watch::Sender<Option<ConnectionStats>>,
    in_flight: watch::Sender<bool>,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            status_tx: watch::Sender::new(ConnectionStatus::Disconnected),
            stats_tx: watch::Sender::new(None),
            in_flight: watch::Sender::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the state
    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&*self.lock())
    }

    /// Mutate the state and publish the resulting status
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut *state);
        let status = state.status;
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        result
    }

    pub fn status(&self) -> ConnectionStatus {
        self.read(|s| s.status())
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<Option<ConnectionStats>> {
        self.stats_tx.subscribe()
    }

    pub fn publish_stats(&self, stats: Option<ConnectionStats>) {
        self.stats_tx.send_replace(stats);
    }

    /// Claim the single transition slot
    pub fn try_begin_transition(&self) -> bool {
        self.in_flight.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        })
    }

    pub fn end_transition(&self) {
        self.in_flight.send_replace(false);
    }

    /// Wait until no transition holds the slot
    pub async fn transition_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }
}
