//! Service configuration, loaded from environment variables.
//!
//! DESIGN
//! ======
//! All knobs have safe defaults so the binary runs with zero configuration.
//! Timing values are `Duration`s, resolved once at startup and carried in
//! `AppState`; the sweeper and handlers never re-read the environment.

use std::time::Duration;

const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;
const DEFAULT_AI_IDLE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

/// Tuning knobs for presence tracking and the heartbeat sweeper.
#[derive(Debug, Clone, Copy)]
pub struct PresenceConfig {
    /// A connection whose last heartbeat is older than this is considered dead.
    pub heartbeat_timeout: Duration,
    /// How often the sweeper scans for expired connections.
    pub sweep_interval: Duration,
    /// AI status falls back to idle after this much inactivity.
    pub ai_idle_timeout: Duration,
    /// Bounded per-connection outbound channel capacity.
    pub client_channel_capacity: usize,
}

impl PresenceConfig {
    pub fn from_env() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(env_parse(
                "HEARTBEAT_TIMEOUT_SECS",
                DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            )),
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)),
            ai_idle_timeout: Duration::from_secs(env_parse("AI_IDLE_TIMEOUT_SECS", DEFAULT_AI_IDLE_TIMEOUT_SECS)),
            client_channel_capacity: env_parse("CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            ai_idle_timeout: Duration::from_secs(DEFAULT_AI_IDLE_TIMEOUT_SECS),
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
