//! Public types for the session layer.

use std::time::Duration;

/// Connection state of the session transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Endpoints the session derives transfer URLs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base of the HTTP API that receives chunk uploads.
    pub api_endpoint: String,
}

impl SessionConfig {
    pub fn new(api_endpoint: impl Into<String>) -> Self {
        Self {
            api_endpoint: api_endpoint.into(),
        }
    }

    /// Upload target for one range-request chunk.
    pub fn stream_url(&self, chunk_id: &str) -> String {
        format!("{}/stream/{chunk_id}", self.base())
    }

    /// Upload target for a whole-file download.
    pub fn file_url(&self, download_id: &str) -> String {
        format!("{}/file/{download_id}", self.base())
    }

    fn base(&self) -> &str {
        self.api_endpoint.trim_end_matches('/')
    }
}

/// Reconnection backoff: exponential growth from `initial_delay`, capped at
/// `max_delay`, with up to a quarter of jitter either way.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

/// Shortest delay ever returned, whatever the configuration.
const MIN_DELAY: Duration = Duration::from_millis(50);

/// Jitter as a fraction of the base delay.
const JITTER_FRACTION: f64 = 0.25;

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        jittered(self.base_delay(attempt), random_unit())
    }

    /// Delay before `attempt` without jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let grown = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()))
    }
}

/// Scales `base` by `1 + JITTER_FRACTION * unit`, where `unit` is in
/// `[-1, 1]`, and applies the floor.
fn jittered(base: Duration, unit: f64) -> Duration {
    base.mul_f64(1.0 + JITTER_FRACTION * unit.clamp(-1.0, 1.0))
        .max(MIN_DELAY)
}

/// Uniform-ish value in `[-1, 1]` from the std hasher's random keys.
fn random_unit() -> f64 {
    use std::hash::{BuildHasher, Hasher, RandomState};

    let bits = RandomState::new().build_hasher().finish();
    (bits as f64 / u64::MAX as f64) * 2.0 - 1.0
}
