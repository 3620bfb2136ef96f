//! Per-chat sliding-window rate limiting.
//!
//! [`RateLimiter`] keeps the timestamps of recent messages per key in memory.
//! Every call is counted, rejected ones included, so a chat that keeps
//! hammering stays limited until it backs off for a full window.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// How long until the oldest counted message leaves the window.
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &str, limit: usize, window: Duration) -> RateDecision {
        self.check_at(key, limit, window, Instant::now())
    }

    pub fn check_at(&self, key: &str, limit: usize, window: Duration, now: Instant) -> RateDecision {
        if key.is_empty() {
            return RateDecision::allowed();
        }
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_owned()).or_default();
        while let Some(oldest) = bucket.front() {
            if now.saturating_duration_since(*oldest) > window {
                bucket.pop_front();
            } else {
                break;
            }
        }
        bucket.push_back(now);

        if bucket.len() <= limit {
            return RateDecision::allowed();
        }
        let retry_after = bucket
            .front()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)));
        RateDecision {
            allowed: false,
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_within_window_and_recovers() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        let t0 = Instant::now();

        assert!(limiter.check_at("chat", 2, window, t0).allowed);
        assert!(limiter.check_at("chat", 2, window, t0 + Duration::from_secs(1)).allowed);

        let denied = limiter.check_at("chat", 2, window, t0 + Duration::from_secs(10));
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_secs(50)));

        // Other keys are independent.
        assert!(limiter.check_at("other", 2, window, t0 + Duration::from_secs(10)).allowed);

        // Everything before t0+10 has aged out.
        assert!(limiter.check_at("chat", 2, window, t0 + Duration::from_secs(71)).allowed);
    }

    #[test]
    fn empty_key_is_never_limited() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check("", 1, Duration::from_secs(1)).allowed);
        }
    }
}
