//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so a local two-terminal setup works with no
//! configuration at all.

use std::path::PathBuf;
use std::time::Duration;

use twoplace_client::CallConfig;
use twoplace_media::{AudioConfig, MediaConstraints, PeerConfig, VideoConfig};
use twoplace_shared::constants::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_STUN_SERVER, RING_TIMEOUT_SECS, STATS_INTERVAL_SECS,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Shared database file.
    /// Env: `TWOPLACE_DB`
    /// Default: the platform data directory (see `Database::default_path`).
    pub db_path: Option<PathBuf>,

    /// Comma-separated STUN/TURN URLs.
    /// Env: `TWOPLACE_STUN_SERVERS`
    pub ice_servers: Vec<String>,

    /// Env: `TWOPLACE_RING_TIMEOUT_SECS`
    pub ring_timeout: Duration,

    /// Env: `TWOPLACE_STATS_INTERVAL_SECS`
    pub stats_interval: Duration,

    /// How often subscriptions re-read the database.
    /// Env: `TWOPLACE_POLL_INTERVAL_MS`
    pub poll_interval: Duration,

    /// `WIDTHxHEIGHT[@FPS]`, or `off`.
    /// Env: `TWOPLACE_VIDEO`
    pub video: Option<VideoConfig>,

    /// Env: `TWOPLACE_AUDIO` (true/false)
    pub audio: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            ring_timeout: Duration::from_secs(RING_TIMEOUT_SECS),
            stats_interval: Duration::from_secs(STATS_INTERVAL_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            video: Some(VideoConfig::default()),
            audio: true,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from `lookup`, falling back to defaults for
    /// missing or invalid values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("TWOPLACE_DB").filter(|p| !p.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(list) = lookup("TWOPLACE_STUN_SERVERS") {
            let servers: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if servers.is_empty() {
                tracing::warn!(value = %list, "Empty TWOPLACE_STUN_SERVERS, using default");
            } else {
                config.ice_servers = servers;
            }
        }

        if let Some(secs) = positive(&lookup, "TWOPLACE_RING_TIMEOUT_SECS") {
            config.ring_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = positive(&lookup, "TWOPLACE_STATS_INTERVAL_SECS") {
            config.stats_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = positive(&lookup, "TWOPLACE_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("TWOPLACE_VIDEO") {
            if val == "off" || val == "false" || val == "0" {
                config.video = None;
            } else if let Some(video) = VideoConfig::parse(&val) {
                config.video = Some(video);
            } else {
                tracing::warn!(value = %val, "Invalid TWOPLACE_VIDEO, using default");
            }
        }

        if let Some(val) = lookup("TWOPLACE_AUDIO") {
            config.audio = val != "false" && val != "0";
        }

        config
    }

    pub fn call_config(&self) -> CallConfig {
        CallConfig {
            ring_timeout: self.ring_timeout,
            stats_interval: self.stats_interval,
            peer: PeerConfig {
                ice_servers: self.ice_servers.clone(),
            },
            constraints: MediaConstraints {
                audio: self.audio.then(AudioConfig::default),
                video: self.video.clone(),
            },
            ..CallConfig::default()
        }
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let val = lookup(key)?;
    match val.parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %val, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert!(c.db_path.is_none());
        assert_eq!(c.ring_timeout, Duration::from_secs(15));
        assert_eq!(c.stats_interval, Duration::from_secs(2));
        assert_eq!(c.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert!(c.audio);
        assert!(c.video.is_some());
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("TWOPLACE_DB", "/tmp/calls.db"),
            ("TWOPLACE_STUN_SERVERS", "stun:a:3478, stun:b:3478"),
            ("TWOPLACE_RING_TIMEOUT_SECS", "30"),
            ("TWOPLACE_VIDEO", "640x480@15"),
            ("TWOPLACE_AUDIO", "false"),
        ]);
        assert_eq!(c.db_path, Some(PathBuf::from("/tmp/calls.db")));
        assert_eq!(c.ice_servers, vec!["stun:a:3478", "stun:b:3478"]);
        assert_eq!(c.ring_timeout, Duration::from_secs(30));
        assert_eq!(c.video.as_ref().map(|v| v.fps), Some(15));

        let call = c.call_config();
        assert!(call.constraints.audio.is_none());
        assert_eq!(call.peer.ice_servers.len(), 2);
        assert_eq!(call.ring_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let c = config(&[
            ("TWOPLACE_RING_TIMEOUT_SECS", "soon"),
            ("TWOPLACE_POLL_INTERVAL_MS", "0"),
            ("TWOPLACE_VIDEO", "huge"),
            ("TWOPLACE_STUN_SERVERS", " , "),
        ]);
        assert_eq!(c.ring_timeout, Duration::from_secs(15));
        assert_eq!(c.poll_interval, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
        assert!(c.video.is_some());
        assert_eq!(c.ice_servers.len(), 1);
    }

    #[test]
    fn test_video_off() {
        let c = config(&[("TWOPLACE_VIDEO", "off")]);
        assert!(c.call_config().constraints.video.is_none());
    }
}
