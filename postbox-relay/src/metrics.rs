//! Operational counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Total request frames dispatched.
    pub requests_total: AtomicU64,
    /// Total successful registrations.
    pub registrations_total: AtomicU64,
    /// Total items queued (messages and symmetric keys).
    pub items_enqueued: AtomicU64,
    /// Total items handed to recipients.
    pub items_delivered: AtomicU64,
    /// Total failure responses (any failure code, including general errors).
    pub failures_total: AtomicU64,
    /// Total internal errors (storage failures, caught panics).
    pub internal_errors_total: AtomicU64,
}

impl RelayMetrics {
    /// Add one to `counter`.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to `counter`.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = RelayMetrics::default();
        RelayMetrics::incr(&m.requests_total);
        RelayMetrics::incr(&m.requests_total);
        RelayMetrics::add(&m.items_delivered, 5);

        assert_eq!(RelayMetrics::get(&m.requests_total), 2);
        assert_eq!(RelayMetrics::get(&m.items_delivered), 5);
        assert_eq!(RelayMetrics::get(&m.failures_total), 0);
    }
}
