//! Sliding-window rate limiter keyed by an arbitrary string identifier
//! (callers use `<remote-ip>:<endpoint-uuid>`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default bucket size: 20 attempts per 60 seconds.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Buckets untouched for longer than this are dropped on the next GC sweep.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(600);

struct Bucket {
    window_start: Instant,
    count: u32,
    last_seen: Instant,
}

/// A sliding-window-by-reset limiter: each identifier gets a counter that
/// resets once `window` has elapsed since the counter last started, rather
/// than a true sliding log. This matches the coarse "N attempts per window"
/// semantics used for login/token endpoints without the memory cost of
/// tracking individual timestamps.
pub struct RateLimiter {
    max_attempts: u32,
    window: Duration,
    gc_interval: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
    last_gc: Mutex<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            gc_interval: DEFAULT_GC_INTERVAL,
            buckets: Mutex::new(HashMap::new()),
            last_gc: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW)
    }

    /// Record an attempt for `identifier`. Returns `true` if the attempt is
    /// allowed, `false` if the bucket is exhausted for the current window.
    pub fn check(&self, identifier: &str) -> bool {
        let now = Instant::now();
        self.maybe_gc(now);

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(identifier.to_string()).or_insert_with(|| Bucket {
            window_start: now,
            count: 0,
            last_seen: now,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        bucket.last_seen = now;

        if bucket.count >= self.max_attempts {
            return false;
        }

        bucket.count += 1;
        true
    }

    /// Remaining attempts in the current window for `identifier`, without
    /// consuming one.
    #[must_use]
    pub fn remaining(&self, identifier: &str) -> u32 {
        let now = Instant::now();
        let buckets = self.buckets.lock();
        match buckets.get(identifier) {
            Some(bucket) if now.duration_since(bucket.window_start) < self.window => {
                self.max_attempts.saturating_sub(bucket.count)
            }
            _ => self.max_attempts,
        }
    }

    fn maybe_gc(&self, now: Instant) {
        let mut last_gc = self.last_gc.lock();
        if now.duration_since(*last_gc) < self.gc_interval {
            return;
        }
        *last_gc = now;
        drop(last_gc);

        let stale_after = self.gc_interval;
        self.buckets
            .lock()
            .retain(|_, bucket| now.duration_since(bucket.last_seen) < stale_after);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_attempts() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check("1.2.3.4:ep"));
        assert!(limiter.check("1.2.3.4:ep"));
        assert!(limiter.check("1.2.3.4:ep"));
        assert!(!limiter.check("1.2.3.4:ep"));
    }

    #[test]
    fn buckets_are_independent_per_identifier() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check("a"));
    }

    #[test]
    fn remaining_reflects_consumed_attempts() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        assert_eq!(limiter.remaining("a"), 5);
        limiter.check("a");
        limiter.check("a");
        assert_eq!(limiter.remaining("a"), 3);
    }
}
