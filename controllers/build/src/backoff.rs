//! # Retry Backoff
//!
//! Explicit retry policy for failed reconcile passes. A failed pass is never
//! retried inline; the watch loop's error policy asks the `RetryTracker` how
//! long to wait before the key is reconciled again.
//!
//! Delays grow exponentially from `base` and are capped at `max`:
//! 5s, 10s, 20s, 40s, ... 300s with the defaults.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

impl RetryPolicy {
    /// Create a policy. `max` is raised to `base` if smaller.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay before retry number `attempt` (0-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Per-key consecutive failure counts
#[derive(Debug, Default)]
pub struct RetryTracker {
    policy: RetryPolicy,
    failures: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    /// Create a tracker with the given policy
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failed pass for `key` and returns the delay before the next one.
    pub fn record_failure(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.to_string()).or_insert(0);
        let delay = self.policy.delay_for_attempt(*count);
        *count = count.saturating_add(1);
        delay
    }

    /// Clears the failure count after a successful pass.
    pub fn record_success(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
