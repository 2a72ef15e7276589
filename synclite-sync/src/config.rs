//! Configuration for the sync engine.
//!
//! Everything a host needs to tune per backend lives here: batch sizes,
//! retry bounds, backoff shape, timeouts. The conflict strategy is supplied
//! separately at engine construction so it can close over host state.

use rand::Rng;
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device name for identification in logs.
    pub device_name: String,
    /// Collections this engine manages. `trigger_sync(None)` syncs all of
    /// them.
    pub collections: Vec<String>,
    /// Maximum mutations per push batch (backend limits).
    pub push_batch_size: usize,
    /// Maximum attempts for a single adapter call before its collection
    /// fails the cycle.
    pub max_retries: u32,
    /// Maximum token refresh attempts before `Failed(Auth)`.
    pub max_refresh_attempts: u32,
    /// Timeout for a single adapter call.
    pub call_timeout: Duration,
    /// Refresh the token proactively when it expires within this window.
    pub token_grace: Duration,
    /// Backoff between retries and between automatic cycles after failure.
    pub backoff: BackoffConfig,
    /// Buffer size for the conflict stream and the realtime delta queue.
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_name: "SyncLite Device".to_string(),
            collections: Vec::new(),
            push_batch_size: 100,
            max_retries: 3,
            max_refresh_attempts: 3,
            call_timeout: Duration::from_secs(30),
            token_grace: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            channel_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Creates a config for the given collections with defaults elsewhere.
    pub fn for_collections<I, S>(collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collections: collections.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Fraction of the delay randomized (0.0 = none, 0.5 = up to half).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Returns the delay before retry `attempt` (0-based): exponential,
    /// bounded, with jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max);

        if self.jitter <= 0.0 {
            return exp;
        }
        let spread = exp.as_millis() as f64 * self.jitter;
        let offset = rand::thread_rng().gen_range(0.0..=spread);
        Duration::from_millis((exp.as_millis() as f64 - offset).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_bounded() {
        let backoff = BackoffConfig {
            base: Duration::from_millis(100),
            max: Duration::from_secs(2),
            jitter: 0.0,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
        // Saturates at the bound.
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn jitter_never_exceeds_the_exponential_delay() {
        let backoff = BackoffConfig {
            base: Duration::from_millis(100),
            max: Duration::from_secs(2),
            jitter: 0.5,
        };
        for attempt in 0..8 {
            let exact = BackoffConfig {
                jitter: 0.0,
                ..backoff.clone()
            }
            .delay_for_attempt(attempt);
            for _ in 0..32 {
                assert!(backoff.delay_for_attempt(attempt) <= exact);
            }
        }
    }
}
