//! Backoff for transiently failed replays

use std::time::Duration;

use rand::Rng;

use crate::config::WalManagerConfig;

/// Linear backoff with a cap and optional random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts (including the first) before a WAL is marked failed
    pub ceiling: u32,
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WalManagerConfig) -> Self {
        Self {
            ceiling: config.replay_retry_ceiling,
            base: Duration::from_millis(config.replay_backoff_base_ms),
            max: Duration::from_millis(config.replay_backoff_max_ms),
            jitter: Duration::from_millis(config.replay_backoff_jitter_ms),
        }
    }

    /// Whether a WAL that has failed `attempts` times may be tried again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.ceiling
    }

    /// Delay before the next attempt of a WAL that has failed `attempts` times.
    pub fn delay(&self, attempts: u32) -> Duration {
        let linear = self.base.saturating_mul(attempts.max(1)).min(self.max);
        if self.jitter.is_zero() {
            return linear;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        linear + Duration::from_millis(extra)
    }
}
