//! Per-resource requeue backoff
//!
//! Exponential with full jitter: the n-th consecutive failure waits a random
//! duration in `[0, min(cap, base * 2^n)]`. A success resets the count.

use std::time::Duration;

use dashmap::DashMap;
use o2_common::ResourceKey;
use rand::Rng;

/// Failure counters keyed by resource
#[derive(Debug)]
pub struct RequeueBackoff {
    base: Duration,
    cap: Duration,
    failures: DashMap<ResourceKey, u32>,
}

impl RequeueBackoff {
    /// Create a backoff with the given base and cap
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            failures: DashMap::new(),
        }
    }

    /// Record a failure of `key` and return how long to wait
    pub fn next_delay(&self, key: &ResourceKey) -> Duration {
        let attempt = {
            let mut entry = self.failures.entry(key.clone()).or_insert(0);
            let attempt = *entry;
            *entry = entry.saturating_add(1);
            attempt
        };
        let ceiling = self.ceiling(attempt);
        let millis = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
        // Never requeue hot
        Duration::from_millis(millis).max(Duration::from_millis(100))
    }

    /// Upper bound of the delay after `attempt` earlier failures
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Forget the failures of `key`
    pub fn reset(&self, key: &ResourceKey) {
        self.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &ResourceKey) -> u32 {
        self.failures.get(key).map(|f| *f).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use o2_common::ResourceKind;

    fn key() -> ResourceKey {
        ResourceKey::new(ResourceKind::Alert, "obs", "cpu")
    }

    #[test]
    fn test_ceiling_doubles_up_to_cap() {
        let b = RequeueBackoff::new(Duration::from_secs(1), Duration::from_secs(300));
        assert_eq!(b.ceiling(0), Duration::from_secs(1));
        assert_eq!(b.ceiling(3), Duration::from_secs(8));
        assert_eq!(b.ceiling(9), Duration::from_secs(300));
        assert_eq!(b.ceiling(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_delay_within_ceiling_and_reset() {
        let b = RequeueBackoff::new(Duration::from_secs(1), Duration::from_secs(300));
        for attempt in 0..12 {
            let delay = b.next_delay(&key());
            assert!(delay <= b.ceiling(attempt).max(Duration::from_millis(100)));
        }
        assert_eq!(b.failures(&key()), 12);
        b.reset(&key());
        assert_eq!(b.failures(&key()), 0);
    }
}
