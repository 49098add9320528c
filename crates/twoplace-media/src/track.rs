use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::AudioConfig;
use crate::video::VideoConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Live,
    Ended,
}

/// What to capture. `None` leaves that kind out.
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub audio: Option<AudioConfig>,
    pub video: Option<VideoConfig>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: Some(AudioConfig::default()),
            video: Some(VideoConfig::default()),
        }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: Some(AudioConfig::default()),
            video: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Handle to one local or remote media track.
///
/// Clones share state: stopping any clone ends the track everywhere.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn ready_state(&self) -> ReadyState {
        if self.live.load(Ordering::SeqCst) {
            ReadyState::Live
        } else {
            ReadyState::Ended
        }
    }

    /// Release the track. Idempotent.
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!(track = %self.id, kind = %self.kind, "track stopped");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// A disabled track stays live but carries silence / black frames.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

/// The set of tracks captured for one call.
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<MediaTrack>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.set_kind_enabled(TrackKind::Audio, enabled);
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.set_kind_enabled(TrackKind::Video, enabled);
    }

    fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind == kind) {
            track.set_enabled(enabled);
        }
        debug!(%kind, enabled, "local tracks toggled");
    }

    pub fn all_ended(&self) -> bool {
        self.tracks.iter().all(|t| t.ready_state() == ReadyState::Ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_ends_every_clone() {
        let track = MediaTrack::new("mic", TrackKind::Audio);
        let clone = track.clone();
        assert_eq!(clone.ready_state(), ReadyState::Live);

        track.stop();
        track.stop();
        assert_eq!(clone.ready_state(), ReadyState::Ended);
    }

    #[test]
    fn toggles_only_touch_their_kind() {
        let media = LocalMedia::new(vec![
            MediaTrack::new("mic", TrackKind::Audio),
            MediaTrack::new("cam", TrackKind::Video),
        ]);

        media.set_audio_enabled(false);
        assert!(!media.tracks()[0].is_enabled());
        assert!(media.tracks()[1].is_enabled());

        media.stop_all();
        assert!(media.all_ended());
    }

    #[test]
    fn default_constraints_capture_both() {
        let c = MediaConstraints::default();
        assert!(c.audio.is_some() && c.video.is_some());
        assert!(MediaConstraints::audio_only().video.is_none());
    }
}
