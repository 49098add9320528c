use thiserror::Error;
use tracing::{debug, info};
use twoplace_shared::constants::DEFAULT_AUDIO_SAMPLE_RATE;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Input device does not support {0} Hz / {1} channel(s)")]
    Unsupported(u32, u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_AUDIO_SAMPLE_RATE,
            channels: 1,
            frame_size_ms: 20,
        }
    }
}

impl AudioConfig {
    pub fn frame_size_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_size_ms as usize) / 1000
    }
}

/// Find the default input device and check it can capture with `config`.
/// Returns the device name.
///
/// Blocks on the host audio API; call it from `spawn_blocking`.
pub fn probe_input(config: &AudioConfig) -> Result<String, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;
    let name = device
        .name()
        .map_err(|e| AudioError::DeviceError(e.to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| AudioError::DeviceError(e.to_string()))?
        .any(|range| {
            range.channels() >= config.channels
                && range.min_sample_rate().0 <= config.sample_rate
                && range.max_sample_rate().0 >= config.sample_rate
        });
    if !supported {
        debug!(device = %name, "no matching input configuration");
        return Err(AudioError::Unsupported(config.sample_rate, config.channels));
    }

    info!(device = %name, sample_rate = config.sample_rate, "Using input device");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_for_20ms_at_48k() {
        assert_eq!(AudioConfig::default().frame_size_samples(), 960);
    }
}
