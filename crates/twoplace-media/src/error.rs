use thiserror::Error;

use crate::audio::AudioError;
use crate::video::VideoError;
use crate::webrtc_peer::PeerConnectionError;

/// Errors surfaced by the media layer.
#[derive(Error, Debug)]
pub enum MediaError {
    /// Local capture could not be acquired.
    #[error("Capture failed: {0}")]
    Audio(#[from] AudioError),

    #[error("Capture failed: {0}")]
    Video(#[from] VideoError),

    #[error("Nothing to capture")]
    NoTracks,

    #[error(transparent)]
    Peer(#[from] PeerConnectionError),

    #[error("Capture task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl MediaError {
    /// True for failures acquiring local devices.
    pub fn is_capture(&self) -> bool {
        matches!(
            self,
            MediaError::Audio(_) | MediaError::Video(_) | MediaError::NoTracks | MediaError::Join(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
