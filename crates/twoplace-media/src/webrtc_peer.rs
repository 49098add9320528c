//! [`PeerConnection`] backed by webrtc-rs.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use twoplace_shared::{IceCandidate, SdpType, SessionDescription};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;
use crate::peer::{
    PeerConfig, PeerConnection, PeerConnectionFactory, PeerEvent, PeerHandle, PeerState,
    StatsDirection, StatsReport,
};
use crate::track::{MediaTrack, TrackKind};

const STREAM_ID: &str = "twoplace";

#[derive(Error, Debug)]
pub enum PeerConnectionError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Unsupported session description type: {0}")]
    UnsupportedDescription(String),
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

/// Builds webrtc-rs peer connections with the default codecs and
/// interceptors registered.
pub struct RtcPeerFactory {
    api: API,
}

impl RtcPeerFactory {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(PeerConnectionError::from)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(PeerConnectionError::from)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcPeerFactory {
    async fn create(&self, config: &PeerConfig) -> Result<PeerHandle> {
        let rtc_config = RTCConfiguration {
            ice_servers: if config.ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: config.ice_servers.clone(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config)
                .await
                .map_err(PeerConnectionError::from)?,
        );

        let (events_tx, events) = mpsc::unbounded_channel();
        wire_events(&pc, events_tx);
        info!(ice_servers = config.ice_servers.len(), "peer connection created");

        Ok(PeerHandle {
            connection: Arc::new(RtcPeer { pc }),
            events,
        })
    }
}

fn wire_events(pc: &Arc<RTCPeerConnection>, events: mpsc::UnboundedSender<PeerEvent>) {
    let candidate_tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            // `None` marks the end of gathering.
            let Some(c) = candidate else { return };
            match c.to_json() {
                Ok(init) => {
                    let _ = tx.send(PeerEvent::LocalCandidate(from_rtc_candidate(init)));
                }
                Err(e) => warn!(error = %e, "failed to serialize local candidate"),
            }
        })
    }));

    let track_tx = events.clone();
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
        let tx = track_tx.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                RTPCodecType::Video => TrackKind::Video,
                other => {
                    debug!(kind = %other, "ignoring remote track of unknown kind");
                    return;
                }
            };
            debug!(track = %track.id(), %kind, "remote track");
            let _ = tx.send(PeerEvent::RemoteTrack(MediaTrack::new(track.id(), kind)));
        })
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = events.clone();
        Box::pin(async move {
            debug!(state = %state, "peer connection state");
            let _ = tx.send(PeerEvent::StateChanged(state.into()));
        })
    }));
}

pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_owned(),
            STREAM_ID.to_owned(),
        ));
        self.pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(PeerConnectionError::from)?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(PeerConnectionError::from)?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(PeerConnectionError::from)?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(PeerConnectionError::from)?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(PeerConnectionError::from)?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(PeerConnectionError::from)?;
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<StatsReport>> {
        let report = self.pc.get_stats().await;
        let reports = report
            .reports
            .values()
            .filter_map(|entry| match entry {
                StatsReportType::OutboundRTP(out) => Some(StatsReport {
                    direction: StatsDirection::Outbound,
                    bytes: out.bytes_sent,
                }),
                StatsReportType::InboundRTP(inb) => Some(StatsReport {
                    direction: StatsDirection::Inbound,
                    bytes: inb.bytes_received,
                }),
                _ => None,
            })
            .collect();
        Ok(reports)
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(PeerConnectionError::from)?;
        debug!("peer connection closed");
        Ok(())
    }
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = desc.sdp.clone();
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpType::Rollback => {
            return Err(PeerConnectionError::UnsupportedDescription(desc.sdp_type.to_string()).into())
        }
    };
    Ok(rtc.map_err(PeerConnectionError::from)?)
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(PeerConnectionError::UnsupportedDescription(other.to_string()).into())
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn to_rtc_candidate(c: &IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: c.candidate.clone(),
        sdp_mid: c.sdp_mid.clone(),
        sdp_mline_index: c.sdp_mline_index,
        username_fragment: c.username_fragment.clone(),
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_fields_carry_over() {
        let c = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".into()),
        };
        assert_eq!(from_rtc_candidate(to_rtc_candidate(&c)), c);
    }

    #[test]
    fn rollback_is_not_forwarded() {
        let desc = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(to_rtc_description(&desc).is_err());
    }

    #[tokio::test]
    async fn offer_lists_attached_tracks() {
        let factory = RtcPeerFactory::new().unwrap();
        let handle = factory
            .create(&PeerConfig { ice_servers: Vec::new() })
            .await
            .unwrap();

        handle
            .connection
            .add_track(&MediaTrack::new("mic", TrackKind::Audio))
            .await
            .unwrap();
        let offer = handle.connection.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));

        handle.connection.close().await.unwrap();
    }
}
