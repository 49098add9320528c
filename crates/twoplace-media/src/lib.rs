//! # twoplace-media
//!
//! Local capture and peer connections. Call logic talks to the
//! [`MediaDevices`], [`PeerConnectionFactory`] and [`PeerConnection`] traits;
//! [`SystemMediaDevices`] and [`RtcPeerFactory`] are the production
//! implementations (cpal and webrtc-rs).

pub mod audio;
pub mod devices;
pub mod error;
pub mod peer;
pub mod track;
pub mod video;
pub mod webrtc_peer;

pub use audio::AudioConfig;
pub use devices::SystemMediaDevices;
pub use error::{MediaError, Result};
pub use peer::{
    total_bytes, MediaDevices, PeerConfig, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerHandle, PeerState, StatsDirection, StatsReport,
};
pub use track::{LocalMedia, MediaConstraints, MediaTrack, ReadyState, TrackKind};
pub use video::VideoConfig;
pub use webrtc_peer::RtcPeerFactory;
