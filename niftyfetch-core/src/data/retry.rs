//! Bounded retry with exponential backoff for transient fetch faults.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Backoff with +/-25% jitter so parallel workers don't retry in lockstep.
    pub fn jittered_backoff(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        base.mul_f64(factor)
    }

    /// Backoff that honours a provider's explicit retry-after hint.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.jittered_backoff(retry);
        match retry_after {
            Some(hint) => hint.max(backoff),
            None => backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let p = RetryPolicy::default();
        for retry in 1..=3 {
            let base = p.backoff(retry).as_secs_f64();
            let d = p.jittered_backoff(retry).as_secs_f64();
            assert!(d >= base * 0.75 - 1e-9 && d <= base * 1.25 + 1e-9);
        }
    }

    #[test]
    fn retry_after_hint_wins_when_longer() {
        let p = RetryPolicy::default();
        let d = p.delay_for(1, Some(Duration::from_secs(30)));
        assert_eq!(d, Duration::from_secs(30));
    }

    #[test]
    fn none_policy_has_zero_backoff() {
        assert_eq!(RetryPolicy::none().jittered_backoff(1), Duration::ZERO);
    }
}
