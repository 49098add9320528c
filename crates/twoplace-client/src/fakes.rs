//! In-memory media and peer doubles for call tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use twoplace_media::audio::AudioError;
use twoplace_media::{
    LocalMedia, MediaConstraints, MediaDevices, MediaError, MediaTrack, PeerConfig,
    PeerConnection, PeerConnectionFactory, PeerEvent, PeerHandle, StatsDirection, StatsReport,
    TrackKind,
};
use twoplace_shared::{IceCandidate, SessionDescription};
use twoplace_store::{Database, LiveStore};

pub fn live_store() -> LiveStore {
    LiveStore::new(Database::open_in_memory().unwrap()).with_poll_interval(Duration::from_millis(50))
}

#[derive(Default)]
pub struct FakeDevices {
    pub fail: AtomicBool,
    pub acquired: Mutex<Vec<LocalMedia>>,
}

impl FakeDevices {
    pub fn failing() -> Self {
        let devices = Self::default();
        devices.fail.store(true, Ordering::SeqCst);
        devices
    }

    pub fn last(&self) -> LocalMedia {
        self.acquired.lock().unwrap().last().cloned().expect("no media acquired")
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AudioError::NoInputDevice.into());
        }
        let media = LocalMedia::new(vec![
            MediaTrack::new("mic", TrackKind::Audio),
            MediaTrack::new("cam", TrackKind::Video),
        ]);
        self.acquired.lock().unwrap().push(media.clone());
        Ok(media)
    }
}

/// Records every call made on it, in order.
pub struct FakePeer {
    pub ops: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub fail_stats: AtomicBool,
    pub events: mpsc::UnboundedSender<PeerEvent>,
    serial: usize,
}

impl FakePeer {
    pub fn new(serial: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(Self {
            ops: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            fail_stats: AtomicBool::new(false),
            events,
            serial,
        });
        (peer, rx)
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn set_counters(&self, sent: u64, received: u64) {
        self.bytes_sent.store(sent, Ordering::SeqCst);
        self.bytes_received.store(received, Ordering::SeqCst);
    }

    pub fn emit_candidate(&self, candidate: &str) {
        let _ = self
            .events
            .send(PeerEvent::LocalCandidate(IceCandidate::new(candidate)));
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), MediaError> {
        self.record(format!("track:{}", track.id()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::offer(format!("offer-{}", self.serial)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::answer(format!("answer-{}", self.serial)))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), MediaError> {
        self.record(format!("local:{}", desc.sdp));
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), MediaError> {
        // Yield so queued candidates racing the description are exercised.
        tokio::task::yield_now().await;
        self.record(format!("remote:{}", desc.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError> {
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<StatsReport>, MediaError> {
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceError("stats unavailable".into()).into());
        }
        Ok(vec![
            StatsReport {
                direction: StatsDirection::Outbound,
                bytes: self.bytes_sent.load(Ordering::SeqCst),
            },
            StatsReport {
                direction: StatsDirection::Inbound,
                bytes: self.bytes_received.load(Ordering::SeqCst),
            },
        ])
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.closed.store(true, Ordering::SeqCst);
        self.record("close".into());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
    serial: AtomicUsize,
}

impl FakePeerFactory {
    pub fn last(&self) -> Arc<FakePeer> {
        self.peers.lock().unwrap().last().cloned().expect("no peer created")
    }

    pub fn count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(&self, _config: &PeerConfig) -> Result<PeerHandle, MediaError> {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst);
        let (peer, events) = FakePeer::new(serial);
        self.peers.lock().unwrap().push(peer.clone());
        Ok(PeerHandle {
            connection: peer,
            events,
        })
    }
}
