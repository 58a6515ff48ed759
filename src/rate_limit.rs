//! Per-identity fixed-window admission limiter
//!
//! One bucket per caller identity, reset when the window passes. The map is
//! the only shared mutable state on the request path; a single mutex covers
//! lookup, reset check, increment and insertion as one atomic region.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::warn;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Bucket {
    count: u32,
    window_end: Instant,
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    max_per_window: u32,
}

impl RateLimiter {
    pub fn new(max_per_window: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_per_window,
        }
    }

    /// Admit or deny one request for `id`. Atomic with respect to concurrent
    /// callers.
    pub fn allow(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match buckets.get_mut(id) {
            Some(bucket) if now < bucket.window_end => {
                if bucket.count >= self.max_per_window {
                    warn!(identity = id, count = bucket.count, "rate limit exceeded");
                    return false;
                }
                bucket.count += 1;
                true
            }
            _ => {
                buckets.insert(
                    id.to_string(),
                    Bucket { count: 1, window_end: now + WINDOW },
                );
                true
            }
        }
    }

    /// Drop buckets whose window has passed. Buckets are never required to be
    /// swept for correctness; this just bounds the map for long-idle callers.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        buckets.retain(|_, bucket| now < bucket.window_end);
    }

    /// Periodically sweep expired buckets so long-idle identities do not
    /// accumulate forever.
    pub fn spawn_sweeper(limiter: Arc<RateLimiter>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(300)).await;
                limiter.sweep();
            }
        })
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    fn expire(&self, id: &str) {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(bucket) = buckets.get_mut(id) {
            bucket.window_end = Instant::now() - Duration::from_secs(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn allows_up_to_max_then_denies() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));
    }

    #[test]
    fn identities_tracked_separately() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.allow("user-1"));
        assert!(!limiter.allow("user-1"));
        assert!(limiter.allow("user-2"));
    }

    #[test]
    fn window_reset_restores_quota() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.allow("user-1"));
        assert!(limiter.allow("user-1"));
        assert!(!limiter.allow("user-1"));

        limiter.expire("user-1");
        assert!(limiter.allow("user-1"));
        assert!(limiter.allow("user-1"));
        assert!(!limiter.allow("user-1"));
    }

    #[test]
    fn sweep_drops_expired_buckets() {
        let limiter = RateLimiter::new(5);
        limiter.allow("a");
        limiter.allow("b");
        assert_eq!(limiter.tracked(), 2);

        limiter.expire("a");
        limiter.sweep();
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn at_most_max_allows_under_concurrency() {
        let limiter = Arc::new(RateLimiter::new(100));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    let mut allowed = 0u32;
                    for _ in 0..20 {
                        if limiter.allow("shared") {
                            allowed += 1;
                        }
                    }
                    allowed
                })
            })
            .collect();

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
        assert!(!limiter.allow("shared"));
    }
}
