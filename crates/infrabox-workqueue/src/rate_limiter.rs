use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Default delay for the first retry of a key
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Upper bound on the per-key retry delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Per-key exponential backoff: base * 2^failures, capped at max
pub struct ExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Hash + Eq + Clone> ExponentialBackoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn when(&self, key: &K) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        let exponent = *count;
        *count = count.saturating_add(1);

        self.base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max)
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &K) {
        self.failures.lock().remove(key);
    }

    /// Number of failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

impl<K: Hash + Eq + Clone> Default for ExponentialBackoff<K> {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_failure() {
        let limiter = ExponentialBackoff::default();
        let key = "default/build-1".to_string();

        assert_eq!(limiter.when(&key), Duration::from_millis(5));
        assert_eq!(limiter.when(&key), Duration::from_millis(10));
        assert_eq!(limiter.when(&key), Duration::from_millis(20));
        assert_eq!(limiter.num_requeues(&key), 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let limiter = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let key = "k";

        for _ in 0..40 {
            limiter.when(&key);
        }
        assert_eq!(limiter.when(&key), Duration::from_secs(60));
    }

    #[test]
    fn test_forget_resets_history() {
        let limiter = ExponentialBackoff::default();
        let key = 7u32;

        limiter.when(&key);
        limiter.when(&key);
        limiter.forget(&key);

        assert_eq!(limiter.num_requeues(&key), 0);
        assert_eq!(limiter.when(&key), DEFAULT_BASE_DELAY);
    }

    #[test]
    fn test_keys_are_tracked_independently() {
        let limiter = ExponentialBackoff::default();

        limiter.when(&"a");
        limiter.when(&"a");
        assert_eq!(limiter.when(&"b"), DEFAULT_BASE_DELAY);
        assert_eq!(limiter.num_requeues(&"a"), 2);
    }
}
