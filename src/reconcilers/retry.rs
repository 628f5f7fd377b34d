// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-key requeue backoff for failed reconciles.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::constants::requeue::{BASE_DELAY_SECS, MAX_DELAY_SECS};
use crate::error::ErrorKind;

/// Counts consecutive failures per key.
///
/// Transient and resolution failures back off exponentially from BASE_DELAY_SECS. Validation
/// and invariant failures wait the maximum delay: they only clear when the object changes, and
/// a change triggers its own reconcile.
#[derive(Debug, Default)]
pub struct RetryTracker {
    failures: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure of `key` and returns how long to wait before retrying it
    pub fn next_delay(&self, key: &str, kind: ErrorKind) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.to_string()).or_insert(0);
        let attempt = *count;
        *count = count.saturating_add(1);

        let secs = match kind {
            ErrorKind::Transient | ErrorKind::Resolution => BASE_DELAY_SECS
                .saturating_mul(1u64 << attempt.min(16))
                .min(MAX_DELAY_SECS),
            ErrorKind::Validation | ErrorKind::Invariant => MAX_DELAY_SECS,
        };
        Duration::from_secs(secs)
    }

    /// Forgets the failures of `key` after a successful pass or once its source is cleaned up
    pub fn reset(&self, key: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(key);
    }

    #[cfg(test)]
    pub fn failures(&self, key: &str) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_backoff_doubles_and_caps() {
        let tracker = RetryTracker::new();
        let delays: Vec<u64> = (0..10)
            .map(|_| tracker.next_delay("ingress/default/web", ErrorKind::Transient).as_secs())
            .collect();
        assert_eq!(&delays[..4], &[2, 4, 8, 16]);
        assert_eq!(*delays.last().unwrap(), MAX_DELAY_SECS);
        assert_eq!(tracker.failures("ingress/default/web"), 10);
    }

    #[test]
    fn test_keys_are_independent_and_reset() {
        let tracker = RetryTracker::new();
        tracker.next_delay("a", ErrorKind::Resolution);
        tracker.next_delay("a", ErrorKind::Resolution);
        assert_eq!(tracker.next_delay("b", ErrorKind::Resolution).as_secs(), BASE_DELAY_SECS);

        tracker.reset("a");
        assert_eq!(tracker.failures("a"), 0);
        assert_eq!(tracker.next_delay("a", ErrorKind::Transient).as_secs(), BASE_DELAY_SECS);
    }

    #[test]
    fn test_validation_waits_longest() {
        let tracker = RetryTracker::new();
        assert_eq!(
            tracker.next_delay("a", ErrorKind::Validation).as_secs(),
            MAX_DELAY_SECS
        );
        assert_eq!(tracker.next_delay("b", ErrorKind::Invariant).as_secs(), MAX_DELAY_SECS);
    }
}
