//! Session, presence and messenger configuration

use std::time::Duration;

use serde::Deserialize;
use tidings_realtime::BackoffPolicy;
use tidings_store::DEFAULT_PAGE_SIZE;

/// Default number of confirmed messages a session keeps in memory
pub const DEFAULT_WINDOW_CAPACITY: usize = 500;

/// Default presence heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration of one chat session
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Messages per history page (default: 50)
    pub page_size: u64,

    /// Confirmed messages kept before the oldest are evicted (default: 500)
    pub window_capacity: usize,

    /// How long a send waits before showing as failed (default: 10s)
    pub send_timeout: Duration,

    /// Attempts for a read-cursor update (default: 3)
    pub read_retry_attempts: u32,

    /// Reconnect and retry delays
    pub backoff: BackoffPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            send_timeout: Duration::from_secs(10),
            read_retry_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Configuration of the presence heartbeat
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Interval between heartbeats (default: 30s)
    pub heartbeat_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Everything a [`crate::Messenger`] needs besides its collaborators
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    pub session: SessionConfig,
    pub presence: PresenceConfig,
}
