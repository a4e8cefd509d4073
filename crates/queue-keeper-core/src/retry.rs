//! Retry backoff calculation (§4.D).
//!
//! Given attempt `n` (1-based), a base interval, a cap, and a strategy:
//! - linear: `delay = min(base * n, cap)`
//! - exponential: `delay = min(base * 2^(n-1), cap)`
//!
//! A uniform ±10% jitter is applied on top. Attempt 0 (the initial send) has
//! zero delay.

use crate::{RetryConfig, RetryStrategy};
use chrono::Duration;
use rand::Rng;

/// Computes delivery retry delays for a subscription's retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Build a policy from a subscription's retry configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Maximum number of attempts before the delivery is discarded.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Compute the delay before attempt `n` (1-based). Attempt 0 is the
    /// initial send and always has zero delay.
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        if n == 0 {
            return Duration::zero();
        }

        let base_ms = self.config.base_interval.num_milliseconds().max(0) as u64;
        let cap_ms = self.config.cap.num_milliseconds().max(0) as u64;

        let raw_ms = match self.config.strategy {
            RetryStrategy::Linear => base_ms.saturating_mul(n as u64),
            RetryStrategy::Exponential => {
                let exponent = n.saturating_sub(1).min(62);
                base_ms.saturating_mul(1u64 << exponent)
            }
        };

        let capped_ms = raw_ms.min(cap_ms);
        Duration::milliseconds(Self::apply_jitter(capped_ms) as i64)
    }

    /// Whether another attempt should be made given the attempt count already
    /// recorded for a delivery.
    pub fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.config.max_attempts
    }

    fn apply_jitter(delay_ms: u64) -> u64 {
        if delay_ms == 0 {
            return 0;
        }
        let mut rng = rand::rng();
        let factor = rng.random_range(0.9..=1.1);
        ((delay_ms as f64) * factor).round() as u64
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
