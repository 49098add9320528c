/// Seconds a call may ring before it is ended automatically
pub const RING_TIMEOUT_SECS: u64 = 15;

/// Interval between transport statistics samples during an accepted call
pub const STATS_INTERVAL_SECS: u64 = 2;

/// Default STUN server handed to every peer connection
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// How often live subscriptions re-read the store for changes made by
/// other processes, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Upper bound for the final write issued while the client is going away
pub const UNLOAD_GRACE_MS: u64 = 500;

/// How long an accepting callee waits for the caller's offer to land
pub const OFFER_WAIT_SECS: u64 = 5;

/// Default capture constraints
pub const DEFAULT_VIDEO_WIDTH: u32 = 1280;
pub const DEFAULT_VIDEO_HEIGHT: u32 = 720;
pub const DEFAULT_VIDEO_FPS: u32 = 30;
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 48000;

/// Fallback display name for profiles that cannot be resolved
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";
