use std::time::Duration;

use twoplace_media::{MediaConstraints, PeerConfig};
use twoplace_shared::constants::{
    OFFER_WAIT_SECS, RING_TIMEOUT_SECS, STATS_INTERVAL_SECS, UNLOAD_GRACE_MS,
};

/// Timing and media settings for a [`crate::CallManager`].
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How long a call may ring before it is ended automatically.
    pub ring_timeout: Duration,
    /// Transport statistics sampling period while a call is accepted.
    pub stats_interval: Duration,
    /// Upper bound for the final write when the client goes away.
    pub unload_grace: Duration,
    /// How long accepting waits for the caller's offer to appear.
    pub offer_wait: Duration,
    pub peer: PeerConfig,
    pub constraints: MediaConstraints,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(RING_TIMEOUT_SECS),
            stats_interval: Duration::from_secs(STATS_INTERVAL_SECS),
            unload_grace: Duration::from_millis(UNLOAD_GRACE_MS),
            offer_wait: Duration::from_secs(OFFER_WAIT_SECS),
            peer: PeerConfig::default(),
            constraints: MediaConstraints::default(),
        }
    }
}
