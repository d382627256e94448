use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const REQUEST_WINDOW: Duration = Duration::from_secs(60);
const FAILURE_WINDOW: Duration = Duration::from_secs(300);

#[derive(Default)]
struct AddressState {
    requests: Vec<Instant>,
    failures: Vec<Instant>,
}

/// Sliding-window limiter for the serial check endpoint, keyed by source
/// address. Two windows apply independently: an overall request rate, and a
/// brute-force lockout counting failed (not-found) lookups. Once either
/// window is saturated, checks from that address are refused regardless of
/// code validity.
#[derive(Clone)]
pub struct CheckRateLimiter {
    state: Arc<DashMap<String, AddressState>>,
    max_requests: u32,
    max_failures: u32,
}

impl CheckRateLimiter {
    pub fn new(max_requests_per_minute: u32, max_failures_per_window: u32) -> Self {
        Self {
            state: Arc::new(DashMap::new()),
            max_requests: max_requests_per_minute,
            max_failures: max_failures_per_window,
        }
    }

    /// Registers one lookup attempt. Returns false when the address is over
    /// either window and the attempt must be refused.
    pub fn allow(&self, addr: &str) -> bool {
        self.allow_at(addr, Instant::now())
    }

    /// Records a failed lookup so repeated probing locks the address out.
    pub fn record_failure(&self, addr: &str) {
        self.record_failure_at(addr, Instant::now());
    }

    fn allow_at(&self, addr: &str, now: Instant) -> bool {
        let mut entry = self.state.entry(addr.to_string()).or_default();

        entry
            .requests
            .retain(|t| now.duration_since(*t) < REQUEST_WINDOW);
        entry
            .failures
            .retain(|t| now.duration_since(*t) < FAILURE_WINDOW);

        if entry.failures.len() >= self.max_failures as usize {
            return false;
        }
        if entry.requests.len() >= self.max_requests as usize {
            return false;
        }

        entry.requests.push(now);
        true
    }

    fn record_failure_at(&self, addr: &str, now: Instant) {
        let mut entry = self.state.entry(addr.to_string()).or_default();
        entry.failures.push(now);
    }

    /// Drops addresses with no activity inside either window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.state.retain(|_, entry| {
            entry
                .requests
                .iter()
                .any(|t| now.duration_since(*t) < REQUEST_WINDOW)
                || entry
                    .failures
                    .iter()
                    .any(|t| now.duration_since(*t) < FAILURE_WINDOW)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_window() {
        let limiter = CheckRateLimiter::new(5, 5);
        for _ in 0..5 {
            assert!(limiter.allow("10.0.0.1"));
        }
        assert!(!limiter.allow("10.0.0.1"));
        // Other addresses are unaffected.
        assert!(limiter.allow("10.0.0.2"));
    }

    #[test]
    fn test_window_slides() {
        let limiter = CheckRateLimiter::new(2, 5);
        let t0 = Instant::now();
        assert!(limiter.allow_at("a", t0));
        assert!(limiter.allow_at("a", t0));
        assert!(!limiter.allow_at("a", t0));
        // A minute later the window has passed.
        assert!(limiter.allow_at("a", t0 + Duration::from_secs(61)));
    }

    #[test]
    fn test_failure_lockout() {
        let limiter = CheckRateLimiter::new(100, 5);
        for _ in 0..5 {
            assert!(limiter.allow("b"));
            limiter.record_failure("b");
        }
        // Locked out even though the request rate is fine.
        assert!(!limiter.allow("b"));
    }

    #[test]
    fn test_lockout_expires() {
        let limiter = CheckRateLimiter::new(100, 2);
        let t0 = Instant::now();
        limiter.record_failure_at("c", t0);
        limiter.record_failure_at("c", t0);
        assert!(!limiter.allow_at("c", t0));
        assert!(limiter.allow_at("c", t0 + Duration::from_secs(301)));
    }
}
