//! Bridge counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BridgeStats {
    connections_opened: AtomicU64,
    invocations: AtomicU64,
    native_failures: AtomicU64,
    marshal_failures: AtomicU64,
    descriptor_lookups: AtomicU64,
    descriptor_cache_hits: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub connections_opened: u64,
    pub invocations: u64,
    pub native_failures: u64,
    pub marshal_failures: u64,
    pub descriptor_lookups: u64,
    pub descriptor_cache_hits: u64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_native_failure(&self) {
        self.native_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_marshal_failure(&self) {
        self.marshal_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup(&self, cache_hit: bool) {
        self.descriptor_lookups.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.descriptor_cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            native_failures: self.native_failures.load(Ordering::Relaxed),
            marshal_failures: self.marshal_failures.load(Ordering::Relaxed),
            descriptor_lookups: self.descriptor_lookups.load(Ordering::Relaxed),
            descriptor_cache_hits: self.descriptor_cache_hits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = BridgeStats::new();
        stats.record_open();
        stats.record_lookup(false);
        stats.record_lookup(true);
        stats.record_native_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.connections_opened, 1);
        assert_eq!(snap.descriptor_lookups, 2);
        assert_eq!(snap.descriptor_cache_hits, 1);
        assert_eq!(snap.native_failures, 1);
        assert_eq!(snap.invocations, 0);
    }
}
