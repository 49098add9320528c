use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audio;
use crate::error::{MediaError, Result};
use crate::peer::MediaDevices;
use crate::track::{LocalMedia, MediaConstraints, MediaTrack, TrackKind};

/// Capture from the host's default devices.
///
/// The microphone is probed through cpal. No camera backend is linked, so
/// the video track is a handle checked against the constraints that carries
/// no frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMediaDevices;

#[async_trait]
impl MediaDevices for SystemMediaDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        if constraints.is_empty() {
            return Err(MediaError::NoTracks);
        }

        let mut tracks = Vec::new();
        if let Some(config) = constraints.audio.clone() {
            let device = tokio::task::spawn_blocking(move || audio::probe_input(&config)).await??;
            debug!(%device, "microphone acquired");
            tracks.push(MediaTrack::new(track_id(TrackKind::Audio), TrackKind::Audio));
        }
        if let Some(config) = &constraints.video {
            config.validate()?;
            tracks.push(MediaTrack::new(track_id(TrackKind::Video), TrackKind::Video));
        }

        info!(tracks = tracks.len(), "local media acquired");
        Ok(LocalMedia::new(tracks))
    }
}

fn track_id(kind: TrackKind) -> String {
    format!("{kind}-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::VideoConfig;

    #[tokio::test]
    async fn empty_constraints_refused() {
        let constraints = MediaConstraints { audio: None, video: None };
        let err = SystemMediaDevices.acquire(&constraints).await.unwrap_err();
        assert!(err.is_capture());
    }

    #[tokio::test]
    async fn video_only_needs_no_device() {
        let constraints = MediaConstraints {
            audio: None,
            video: Some(VideoConfig::default()),
        };
        let media = SystemMediaDevices.acquire(&constraints).await.unwrap();
        assert_eq!(media.tracks().len(), 1);
        assert_eq!(media.tracks()[0].kind(), TrackKind::Video);
        assert!(media.tracks()[0].id().starts_with("video-"));
    }
}
