//! Retry policies
//!
//! Bounded attempt counts with exponential backoff between attempts.

use rand::Rng;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Whether to add random jitter
    pub jitter: bool,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
            jitter_factor: 0.3,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Single attempt, no retries
    #[cfg(test)]
    pub(crate) fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }
}

impl From<&redraft_core::RetryConfig> for RetryConfig {
    fn from(config: &redraft_core::RetryConfig) -> Self {
        Self::new(config.max_attempts)
            .with_base_delay(Duration::from_millis(config.base_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_jitter(config.jitter)
    }
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay to wait after the given (1-indexed) failed attempt.
    ///
    /// `base × 2^(attempt-1)`, capped at the configured maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        let delay = self
            .config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);

        if self.config.jitter {
            self.add_jitter(delay)
        } else {
            delay
        }
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        let jitter_range = delay.mul_f64(self.config.jitter_factor);
        if jitter_range.is_zero() {
            return delay;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(Duration::ZERO..jitter_range);
        if rng.gen_bool(0.5) {
            (delay + jitter).min(self.config.max_delay)
        } else {
            delay.saturating_sub(jitter)
        }
    }

    /// Whether another attempt may follow the given (1-indexed) attempt
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt < self.config.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
