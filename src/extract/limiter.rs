//! Per-domain request spacing.
//!
//! Each domain gets its own schedule: requests are spaced at least
//! `1 / rate` apart, independent of every other domain. Waiting for a slot
//! is an async suspension, never a busy loop. Uses the monotonic clock, so
//! system time jumps cannot distort the spacing.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};

pub struct DomainLimiter {
    interval: Duration,
    schedule: Mutex<HashMap<String, Instant>>,
}

impl DomainLimiter {
    /// `rate_per_sec <= 0` disables the limiter.
    pub fn new(rate_per_sec: f64) -> Self {
        let interval = if rate_per_sec > 0.0 {
            Duration::from_secs_f64(1.0 / rate_per_sec)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            schedule: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until this domain's next slot, claiming it atomically.
    ///
    /// Concurrent callers for the same domain each claim a distinct slot
    /// while holding the lock, then sleep outside it, so requests are
    /// throttled in time without serializing other domains.
    pub async fn acquire(&self, domain: &str) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut schedule = self.schedule.lock().await;
            let now = Instant::now();
            let slot = match schedule.get(domain) {
                Some(prev) => (*prev + self.interval).max(now),
                None => now,
            };
            schedule.insert(domain.to_string(), slot);
            slot
        };

        if slot > Instant::now() {
            tracing::trace!(domain = domain, "Waiting for rate-limit slot");
            sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_requests_on_one_domain() {
        let limiter = DomainLimiter::new(1.0); // 1 req/s
        let start = Instant::now();

        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;

        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn domains_do_not_block_each_other() {
        let limiter = DomainLimiter::new(1.0);
        let start = Instant::now();

        limiter.acquire("a.example").await;
        limiter.acquire("b.example").await;
        limiter.acquire("c.example").await;

        // distinct domains: first slot each, no waiting
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn zero_rate_disables_limiting() {
        let limiter = DomainLimiter::new(0.0);
        let start = std::time::Instant::now();
        for _ in 0..50 {
            limiter.acquire("example.com").await;
        }
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
    }
}
