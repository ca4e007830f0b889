//! Per-sender plop debounce.
//!
//! Tracks only the most recent accepted send per user. Anything arriving
//! inside the cooldown window is dropped, not queued.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

pub struct RateLimiter {
    cooldown: Duration,
    last_accepted: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Returns true and stamps the current time if `user_id` may send now.
    pub fn allow(&self, user_id: &str) -> bool {
        self.allow_at(user_id, Instant::now())
    }

    /// Same as [`allow`](Self::allow) with an explicit clock reading.
    pub fn allow_at(&self, user_id: &str, now: Instant) -> bool {
        let mut last_accepted = match self.last_accepted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Rate limiter lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let allowed = match last_accepted.get(user_id) {
            None => true,
            Some(last) => now.saturating_duration_since(*last) >= self.cooldown,
        };

        if allowed {
            last_accepted.insert(user_id.to_string(), now);
        }
        allowed
    }

    /// Number of users with a recorded send.
    pub fn tracked_users(&self) -> usize {
        self.last_accepted.lock().map_or(0, |m| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Duration = Duration::from_secs(5);

    #[test]
    fn first_send_is_always_allowed() {
        let limiter = RateLimiter::new(W);
        assert!(limiter.allow("alice"));
        assert_eq!(limiter.tracked_users(), 1);
    }

    #[test]
    fn second_send_inside_window_is_dropped() {
        let limiter = RateLimiter::new(W);
        let t0 = Instant::now();

        assert!(limiter.allow_at("alice", t0));
        assert!(!limiter.allow_at("alice", t0 + Duration::from_secs(4)));
    }

    #[test]
    fn send_after_full_window_is_allowed() {
        let limiter = RateLimiter::new(W);
        let t0 = Instant::now();

        assert!(limiter.allow_at("alice", t0));
        assert!(limiter.allow_at("alice", t0 + W));
        assert!(limiter.allow_at("alice", t0 + W * 3));
    }

    #[test]
    fn rejected_sends_do_not_extend_the_window() {
        let limiter = RateLimiter::new(W);
        let t0 = Instant::now();

        assert!(limiter.allow_at("alice", t0));
        for s in 1..5 {
            assert!(!limiter.allow_at("alice", t0 + Duration::from_secs(s)));
        }
        assert!(limiter.allow_at("alice", t0 + W));
    }

    #[test]
    fn users_are_limited_independently() {
        let limiter = RateLimiter::new(W);
        let t0 = Instant::now();

        assert!(limiter.allow_at("alice", t0));
        assert!(limiter.allow_at("bob", t0));
        assert!(!limiter.allow_at("alice", t0));
    }

    #[test]
    fn zero_cooldown_never_throttles() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let t0 = Instant::now();

        assert!(limiter.allow_at("alice", t0));
        assert!(limiter.allow_at("alice", t0));
    }
}
