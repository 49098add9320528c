use thiserror::Error;
use twoplace_shared::constants::{DEFAULT_VIDEO_FPS, DEFAULT_VIDEO_HEIGHT, DEFAULT_VIDEO_WIDTH};

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("No video device available")]
    NoDevice,

    #[error("Invalid video constraints: {0}")]
    InvalidConstraints(String),
}

/// Capture constraints for the camera track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIDEO_WIDTH,
            height: DEFAULT_VIDEO_HEIGHT,
            fps: DEFAULT_VIDEO_FPS,
            bitrate_kbps: 2500,
        }
    }
}

impl VideoConfig {
    pub fn validate(&self) -> Result<(), VideoError> {
        if self.width == 0 || self.height == 0 {
            return Err(VideoError::InvalidConstraints(format!(
                "resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(VideoError::InvalidConstraints(format!("{} fps", self.fps)));
        }
        Ok(())
    }

    /// Parse `WIDTHxHEIGHT@FPS` (the `@FPS` part is optional).
    pub fn parse(s: &str) -> Option<Self> {
        let (res, fps) = match s.split_once('@') {
            Some((res, fps)) => (res, Some(fps.trim().parse().ok()?)),
            None => (s, None),
        };
        let (w, h) = res.split_once('x')?;
        let config = Self {
            width: w.trim().parse().ok()?,
            height: h.trim().parse().ok()?,
            fps: fps.unwrap_or(DEFAULT_VIDEO_FPS),
            ..Self::default()
        };
        config.validate().ok()?;
        Some(config)
    }
}
