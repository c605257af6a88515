use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters updated on the routing path.
#[derive(Debug, Default)]
pub struct Counters {
    pub messages_received: AtomicU64,
    pub deliveries: AtomicU64,
    pub unmatched_dropped: AtomicU64,
    pub handler_failures: AtomicU64,
    pub broadcasts_sent: AtomicU64,
    pub broadcasts_skipped: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Read-only export of relay state for status endpoints.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections: usize,
    pub subscriptions: usize,
    pub destinations: usize,
    pub messages_received: u64,
    pub deliveries: u64,
    pub unmatched_dropped: u64,
    pub handler_failures: u64,
    pub broadcasts_sent: u64,
    pub broadcasts_skipped: u64,
    pub broker_available: bool,
}

impl StatsSnapshot {
    /// Metric names published in performance snapshots.
    pub const METRIC_NAMES: [&'static str; 9] = [
        "connections",
        "subscriptions",
        "destinations",
        "messages_received",
        "deliveries",
        "unmatched_dropped",
        "handler_failures",
        "broadcasts_sent",
        "broadcasts_skipped",
    ];

    pub(crate) fn from_counters(
        counters: &Counters,
        connections: usize,
        subscriptions: usize,
        destinations: usize,
        broker_available: bool,
    ) -> Self {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Self {
            connections,
            subscriptions,
            destinations,
            messages_received: load(&counters.messages_received),
            deliveries: load(&counters.deliveries),
            unmatched_dropped: load(&counters.unmatched_dropped),
            handler_failures: load(&counters.handler_failures),
            broadcasts_sent: load(&counters.broadcasts_sent),
            broadcasts_skipped: load(&counters.broadcasts_skipped),
            broker_available,
        }
    }
}
