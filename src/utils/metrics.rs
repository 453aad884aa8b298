//! Observability counters for the network core.
//!
//! Lock-free atomic counters updated from the receive loop and the worker
//! pool. `snapshot()` gives a consistent-enough view for dashboards and
//! tests; individual counters are monotonic.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one network instance.
#[derive(Debug, Default)]
pub struct NetMetrics {
    dispatched: AtomicU64,
    no_handler: AtomicU64,
    handler_failures: AtomicU64,
    dropped_unknown_connection: AtomicU64,
    dropped_decrypt: AtomicU64,
    dropped_unknown_group: AtomicU64,
    dropped_decode: AtomicU64,
    connections_added: AtomicU64,
    connections_removed: AtomicU64,
}

impl NetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_handler(&self) {
        self.no_handler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_unknown_connection(&self) {
        self.dropped_unknown_connection.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_decrypt(&self) {
        self.dropped_decrypt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_unknown_group(&self) {
        self.dropped_unknown_group.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_decode(&self) {
        self.dropped_decode.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_added(&self) {
        self.connections_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_removed(&self) {
        self.connections_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            no_handler: self.no_handler.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            dropped_unknown_connection: self.dropped_unknown_connection.load(Ordering::Relaxed),
            dropped_decrypt: self.dropped_decrypt.load(Ordering::Relaxed),
            dropped_unknown_group: self.dropped_unknown_group.load(Ordering::Relaxed),
            dropped_decode: self.dropped_decode.load(Ordering::Relaxed),
            connections_added: self.connections_added.load(Ordering::Relaxed),
            connections_removed: self.connections_removed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub dispatched: u64,
    pub no_handler: u64,
    pub handler_failures: u64,
    pub dropped_unknown_connection: u64,
    pub dropped_decrypt: u64,
    pub dropped_unknown_group: u64,
    pub dropped_decode: u64,
    pub connections_added: u64,
    pub connections_removed: u64,
}
