//! Connection statistics derived from a live session.

use crate::transport::TrafficCounters;
use std::time::Duration;

/// Throughput and usage snapshot for the active session
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectionStats {
    /// Upload rate (Mbps)
    pub upload_speed: f64,
    /// Download rate (Mbps)
    pub download_speed: f64,
    /// Total bytes uploaded this session
    pub bytes_uploaded: u64,
    /// Total bytes downloaded this session
    pub bytes_downloaded: u64,
    /// Whole seconds since the session started
    pub connected_duration: u64,
}

impl ConnectionStats {
    /// Upload rate with two decimals, e.g. `"12.34"`
    pub fn upload_label(&self) -> String {
        format!("{:.2}", self.upload_speed)
    }

    /// Download rate with two decimals
    pub fn download_label(&self) -> String {
        format!("{:.2}", self.download_speed)
    }

    /// Connected time as `HH : MM : SS`
    pub fn duration_label(&self) -> String {
        format_duration(self.connected_duration)
    }
}

impl std::fmt::Display for ConnectionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Up: {} Mbps ({:.2}MB) | Down: {} Mbps ({:.2}MB) | {}",
            self.upload_label(),
            self.bytes_uploaded as f64 / (1024.0 * 1024.0),
            self.download_label(),
            self.bytes_downloaded as f64 / (1024.0 * 1024.0),
            self.duration_label()
        )
    }
}

/// Format whole seconds as `HH : MM : SS`
///
/// Hours are not wrapped at 24.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{:02} : {:02} : {:02}", hours, minutes, seconds)
}

/// Rate in Mbps between two counter samples
///
/// Counter resets (a value lower than the previous one) yield zero.
pub(crate) fn rate_mbps(previous: u64, current: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let delta = current.saturating_sub(previous);
    (delta as f64 * 8.0) / 1_000_000.0 / secs
}

/// Latest throughput sample folded into a session
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Throughput {
    pub upload_mbps: f64,
    pub download_mbps: f64,
}

impl Throughput {
    pub(crate) fn between(
        previous: TrafficCounters,
        current: TrafficCounters,
        elapsed: Duration,
    ) -> Self {
        Self {
            upload_mbps: rate_mbps(previous.uploaded, current.uploaded, elapsed),
            download_mbps: rate_mbps(previous.downloaded, current.downloaded, elapsed),
        }
    }
}
