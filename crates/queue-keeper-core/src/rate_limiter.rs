//! Per-key token-bucket rate limiting (§4.B).
//!
//! `Allow(key, limit, period)` is keyed per group/subscription so that one
//! noisy tenant cannot starve another. Backed by `governor`'s keyed limiter.

use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::RwLock;
use std::time::Duration as StdDuration;

const ONE: NonZeroU32 = match NonZeroU32::new(1) {
    Some(v) => v,
    None => unreachable!(),
};

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The call is permitted.
    Permitted,
    /// The call is denied; retry after the given delay.
    Denied { retry_after: StdDuration },
}

type KeyedLimiter = GovernorLimiter<String, governor::state::keyed::DefaultKeyedStateStore<String>, DefaultClock>;

/// Keyed rate limiter over an arbitrary string key (group id, subscription
/// id, or a composite of the two).
///
/// Each distinct `(count, period)` quota gets its own underlying limiter,
/// since `governor::Quota` is fixed per limiter instance; subscriptions with
/// differing rate-limit configs therefore do not share buckets.
pub struct RateLimiter {
    limiters: RwLock<HashMap<(u32, u64), KeyedLimiter>>,
}

impl RateLimiter {
    /// Create a new, empty rate limiter.
    pub fn new() -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether `key` may proceed under a quota of `count` calls per
    /// `period_secs` seconds.
    pub fn allow(&self, key: &str, count: u32, period_secs: u64) -> RateLimitDecision {
        let quota_key = (count, period_secs);
        {
            let limiters = self.limiters.read().unwrap();
            if let Some(limiter) = limiters.get(&quota_key) {
                return Self::check(limiter, key);
            }
        }

        let mut limiters = self.limiters.write().unwrap();
        let limiter = limiters
            .entry(quota_key)
            .or_insert_with(|| Self::build_limiter(count, period_secs));
        Self::check(limiter, key)
    }

    fn build_limiter(count: u32, period_secs: u64) -> KeyedLimiter {
        let count = NonZeroU32::new(count).unwrap_or(ONE);
        let period = StdDuration::from_secs(period_secs.max(1));
        // `count` cells per `period` means a replenish interval of
        // `period / count` per cell, mirroring `Quota::per_second`'s own
        // construction — `with_period(period)` alone would refill only one
        // token every full period once the initial burst is spent.
        let replenish_interval = period / count.get();
        let quota = Quota::with_period(replenish_interval)
            .unwrap_or_else(|| Quota::per_second(ONE))
            .allow_burst(count);
        GovernorLimiter::keyed(quota)
    }

    fn check(limiter: &KeyedLimiter, key: &str) -> RateLimitDecision {
        match limiter.check_key(&key.to_string()) {
            Ok(()) => RateLimitDecision::Permitted,
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                RateLimitDecision::Denied { retry_after: wait }
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "rate_limiter_tests.rs"]
mod tests;
