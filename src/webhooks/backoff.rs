//! Bounded-latency exponential backoff for delivery retries.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(24 * 60 * 60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// `delay = min(max, initial × multiplier^(n-1)) + U(0, delay × jitter)`
    /// for the n-th attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1);
        let raw = self.initial.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let base = raw.min(self.max_delay.as_secs_f64());
        let jitter = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0.0..=base * self.jitter)
        };
        Duration::from_secs_f64(base + jitter)
    }

    /// Next retry time; additionally capped at `now + max_delay` to protect
    /// against clock skew or oversized multipliers.
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempt_count: u32) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempt_count).min(self.max_delay);
        let delay = ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::seconds(1));
        now + delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=10u32 {
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt).as_secs_f64();
                let max = policy.max_delay.as_secs_f64() * (1.0 + policy.jitter);
                assert!(delay >= policy.initial.as_secs_f64(), "attempt {}: {}", attempt, delay);
                assert!(delay <= max, "attempt {}: {}", attempt, delay);
            }
        }
    }

    #[test]
    fn base_delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn base_delay_caps_at_max() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        // 2^(30-1) seconds is far past 24h.
        assert_eq!(policy.delay_for_attempt(30), policy.max_delay);
    }

    #[test]
    fn scheduled_time_never_exceeds_now_plus_max() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        for attempt in 1..=30u32 {
            let at = policy.next_retry_at(now, attempt);
            assert!(at > now);
            assert!(at <= now + ChronoDuration::hours(24));
        }
    }
}
