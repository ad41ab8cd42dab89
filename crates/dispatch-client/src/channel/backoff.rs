use std::time::Duration;

use rand::Rng;

/// Reconnect schedule: exponential from `base_backoff_ms`, capped at
/// `max_backoff_ms`, each delay spread by `randomization` in either direction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub randomization: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
            randomization: 0.5,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (0-based) for a jitter sample in
    /// `[-1.0, 1.0]`.
    #[must_use]
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let capped_attempt = attempt.min(16);
        let multiplier = 1_u64 << capped_attempt;
        let backoff = self
            .base_backoff_ms
            .saturating_mul(multiplier)
            .min(self.max_backoff_ms);

        let spread = self.randomization.clamp(0.0, 1.0) * sample.clamp(-1.0, 1.0);
        let jittered = (backoff as f64) * (1.0 + spread);
        let millis = jittered.round().max(0.0) as u64;
        Duration::from_millis(millis.min(self.max_backoff_ms))
    }

    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let sample = rand::rng().random_range(-1.0..=1.0);
        self.delay_with_sample(attempt, sample)
    }

    /// Whether another attempt may be scheduled after `attempts` failures.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}
