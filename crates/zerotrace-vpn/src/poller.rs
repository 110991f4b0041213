//! Periodic stats sampling for the active session.

use crate::session::Shared;
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Handle to a running poller task
pub(crate) struct StatsPoller {
    handle: JoinHandle<()>,
}

impl StatsPoller {
    /// Spawn a poller sampling `transport` every `interval`
    pub fn spawn(shared: Arc<Shared>, transport: Arc<dyn Transport>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            debug!("Stats poller started ({}ms)", interval.as_millis());
            run_poller(shared, transport, interval).await;
            debug!("Stats poller stopped");
        });
        Self { handle }
    }

    /// Abort the task and wait for it to be gone
    ///
    /// Nothing is published by this poller once `stop` returns.
    pub async fn stop(self) {
        self.handle.abort();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!("Stats poller ended abnormally: {}", e);
            }
        }
    }

    /// Abort without waiting (for `Drop`)
    pub fn abort(&self) {
        self.handle.abort();
    }
}

async fn run_poller(shared: Arc<Shared>, transport: Arc<dyn Transport>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match transport.sample().await {
            Ok(counters) => {
                let now = Instant::now();
                let stats = shared.update(|state| {
                    state.session_mut().map(|session| {
                        session.record(counters, now);
                        session.stats(now)
                    })
                });
                match stats {
                    Some(stats) => shared.publish_stats(Some(stats)),
                    // Session went away between ticks
                    None => break,
                }
            }
            Err(TransportError::NotConnected) => {
                let lost = shared.update(|state| {
                    if state.status().is_connected() {
                        state.failed("tunnel lost");
                        true
                    } else {
                        false
                    }
                });
                if lost {
                    error!("Tunnel lost while connected");
                    shared.publish_stats(None);
                }
                break;
            }
            Err(e) => warn!("Stats sample failed: {}", e),
        }
    }
}
