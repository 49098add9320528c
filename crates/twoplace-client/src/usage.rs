//! Transport byte accounting for an accepted call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use twoplace_media::{total_bytes, PeerConnection, StatsDirection, StatsReport};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Running totals. Each figure only ever grows: a sample lower than the
/// current total (a restarted stream, a missing report) is ignored.
#[derive(Debug, Default)]
pub struct UsageMeter {
    totals: Mutex<UsageTotals>,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> UsageTotals {
        match self.totals.lock() {
            Ok(t) => *t,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Fold one statistics snapshot into the totals.
    pub fn record(&self, reports: &[StatsReport]) -> UsageTotals {
        let sent = total_bytes(reports, StatsDirection::Outbound);
        let received = total_bytes(reports, StatsDirection::Inbound);

        let mut totals = match self.totals.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        totals.bytes_sent = totals.bytes_sent.max(sent);
        totals.bytes_received = totals.bytes_received.max(received);
        *totals
    }

    /// Take one sample. Failures are skipped.
    pub async fn sample(&self, peer: &dyn PeerConnection) -> Option<UsageTotals> {
        match peer.stats().await {
            Ok(reports) => Some(self.record(&reports)),
            Err(e) => {
                debug!(error = %e, "stats sample skipped");
                None
            }
        }
    }

    /// Sample `peer` every `period` until the returned task is aborted.
    pub fn spawn_sampler(self: &Arc<Self>, peer: Arc<dyn PeerConnection>, period: Duration) -> JoinHandle<()> {
        let meter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Some(totals) = meter.sample(peer.as_ref()).await {
                    debug!(sent = totals.bytes_sent, received = totals.bytes_received, "usage sample");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakePeer;
    use std::sync::atomic::Ordering;

    #[test]
    fn totals_never_decrease() {
        let meter = UsageMeter::new();
        let report = |sent, received| {
            vec![
                StatsReport { direction: StatsDirection::Outbound, bytes: sent },
                StatsReport { direction: StatsDirection::Inbound, bytes: received },
            ]
        };

        meter.record(&report(1_000, 400));
        let after = meter.record(&report(200, 900));
        assert_eq!(after, UsageTotals { bytes_sent: 1_000, bytes_received: 900 });
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_runs_on_interval_and_skips_failures() {
        let (peer, _events) = FakePeer::new(0);
        let meter = Arc::new(UsageMeter::new());
        let task = meter.spawn_sampler(peer.clone(), Duration::from_secs(2));

        peer.set_counters(500, 100);
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(meter.totals().bytes_sent, 500);

        peer.fail_stats.store(true, Ordering::SeqCst);
        peer.set_counters(900, 300);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(meter.totals().bytes_sent, 500);

        peer.fail_stats.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(meter.totals(), UsageTotals { bytes_sent: 900, bytes_received: 300 });

        task.abort();
    }
}
