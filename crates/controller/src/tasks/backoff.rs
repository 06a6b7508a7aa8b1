//! Per-workflow exponential back-off for failed reconciliations

use crate::crds::WorkflowKey;
use crate::tasks::config::BackoffConfig;
use dashmap::DashMap;
use std::time::Duration;

/// Consecutive failure counts, keyed by workflow identity
///
/// The delay after the n-th consecutive failure is `base * 2^(n-1)`, capped
/// at `max`. A successful reconciliation clears the count.
#[derive(Debug)]
pub struct FailureBackoff {
    base: Duration,
    max: Duration,
    failures: DashMap<WorkflowKey, u32>,
}

impl FailureBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: DashMap::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_seconds),
            Duration::from_secs(config.max_seconds),
        )
    }

    /// Count a failure and return how long to wait before the next attempt
    pub fn record_failure(&self, key: &WorkflowKey) -> Duration {
        let failures = {
            let mut entry = self.failures.entry(key.clone()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        self.delay_for(failures)
    }

    pub fn reset(&self, key: &WorkflowKey) {
        self.failures.remove(key);
    }

    #[must_use]
    pub fn failures(&self, key: &WorkflowKey) -> u32 {
        self.failures.get(key).map_or(0, |count| *count)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> WorkflowKey {
        WorkflowKey::new("argo", name)
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        let backoff = FailureBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let wf = key("wf");

        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.record_failure(&wf).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
        assert_eq!(backoff.failures(&wf), 6);
    }

    #[test]
    fn test_reset_starts_over() {
        let backoff = FailureBackoff::from_config(&BackoffConfig::default());
        let wf = key("wf");

        backoff.record_failure(&wf);
        backoff.record_failure(&wf);
        backoff.reset(&wf);

        assert_eq!(backoff.failures(&wf), 0);
        assert_eq!(backoff.record_failure(&wf), Duration::from_secs(5));
    }

    #[test]
    fn test_identities_are_independent() {
        let backoff = FailureBackoff::new(Duration::from_secs(1), Duration::from_secs(300));
        backoff.record_failure(&key("a"));
        backoff.record_failure(&key("a"));

        assert_eq!(backoff.record_failure(&key("b")), Duration::from_secs(1));
        assert_eq!(backoff.failures(&key("a")), 2);
    }

    #[test]
    fn test_large_failure_counts_do_not_overflow() {
        let backoff = FailureBackoff::new(Duration::from_secs(5), Duration::from_secs(300));
        let wf = key("wf");
        for _ in 0..100 {
            backoff.record_failure(&wf);
        }
        assert_eq!(backoff.record_failure(&wf), backoff.max_delay());
    }
}
