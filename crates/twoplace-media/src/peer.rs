//! The seams between call logic and the real-time media stack.
//!
//! Call code only sees these traits; [`crate::webrtc_peer`] and
//! [`crate::devices`] implement them on top of webrtc-rs and cpal.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use twoplace_shared::constants::DEFAULT_STUN_SERVER;
use twoplace_shared::{IceCandidate, SessionDescription};

use crate::error::Result;
use crate::track::{LocalMedia, MediaConstraints, MediaTrack};

/// Settings for a new peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsDirection {
    Outbound,
    Inbound,
}

/// One transport statistics entry with its byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsReport {
    pub direction: StatsDirection,
    pub bytes: u64,
}

/// Sum the byte counters of every report in `direction`.
pub fn total_bytes(reports: &[StatsReport], direction: StatsDirection) -> u64 {
    reports
        .iter()
        .filter(|r| r.direction == direction)
        .map(|r| r.bytes)
        .sum()
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The ICE agent gathered a local candidate.
    LocalCandidate(IceCandidate),
    /// The remote side started sending a track.
    RemoteTrack(MediaTrack),
    StateChanged(PeerState),
}

/// A freshly created connection and the receiver for its events.
pub struct PeerHandle {
    pub connection: Arc<dyn PeerConnection>,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: &MediaTrack) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Current transport statistics, one entry per RTP stream.
    async fn stats(&self) -> Result<Vec<StatsReport>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, config: &PeerConfig) -> Result<PeerHandle>;
}

/// Local capture.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_are_per_direction() {
        let reports = [
            StatsReport { direction: StatsDirection::Outbound, bytes: 100 },
            StatsReport { direction: StatsDirection::Outbound, bytes: 50 },
            StatsReport { direction: StatsDirection::Inbound, bytes: 7 },
        ];
        assert_eq!(total_bytes(&reports, StatsDirection::Outbound), 150);
        assert_eq!(total_bytes(&reports, StatsDirection::Inbound), 7);
        assert_eq!(total_bytes(&[], StatsDirection::Inbound), 0);
    }
}
