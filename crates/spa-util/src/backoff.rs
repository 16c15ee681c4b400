//! Per-key exponential backoff for retrying failed reconciliations

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Exponential backoff tracked independently per key
#[derive(Debug)]
pub struct Backoff<K> {
    /// Delay after the first failure
    base: Duration,
    /// Upper bound for any delay
    max: Duration,
    /// Consecutive failures per key
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> Backoff<K> {
    /// Create a new backoff tracker
    ///
    /// # Arguments
    /// * `base` - Delay after the first failure, doubled on each further failure
    /// * `max` - Ceiling for the delay
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_delay(&mut self, key: &K) -> Duration {
        let count = self.failures.entry(key.clone()).or_insert(0);
        let exponent = (*count).min(31);
        *count = count.saturating_add(1);

        self.base
            .checked_mul(1u32 << exponent)
            .map(|d| d.min(self.max))
            .unwrap_or(self.max)
    }

    /// Number of consecutive failures recorded for `key`
    pub fn failures(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Forget failures for `key` after a success
    pub fn reset(&mut self, key: &K) {
        self.failures.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let key = "default/web".to_string();

        assert_eq!(backoff.next_delay(&key), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(&key), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(&key), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(&key), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(&key), Duration::from_millis(500));
        assert_eq!(backoff.failures(&key), 5);
    }

    #[test]
    fn test_backoff_keys_are_independent() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let a = "a".to_string();
        let b = "b".to_string();

        backoff.next_delay(&a);
        backoff.next_delay(&a);
        assert_eq!(backoff.next_delay(&b), Duration::from_secs(1));
        assert_eq!(backoff.failures(&a), 2);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let key = "a".to_string();

        backoff.next_delay(&key);
        backoff.next_delay(&key);
        backoff.reset(&key);

        assert_eq!(backoff.failures(&key), 0);
        assert_eq!(backoff.next_delay(&key), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_saturates_without_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(300));
        let key = 7u32;
        for _ in 0..100 {
            assert!(backoff.next_delay(&key) <= Duration::from_secs(300));
        }
    }
}
