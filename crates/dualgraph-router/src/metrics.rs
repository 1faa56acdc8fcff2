//! In-memory routing counters.
//!
//! All updates are lock-free atomics so any number of request tasks can
//! record concurrently. Nothing is persisted; counters start at zero with the
//! process.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use dualgraph_core::routing::model::{ComplexityScore, RoutingTarget};

#[derive(Debug, Default)]
pub struct RoutingMetrics {
    fast_path: AtomicU64,
    persistent_store: AtomicU64,
    /// f64 bit pattern of the summed complexity scores.
    complexity_sum: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Read-only view handed to monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingMetricsSnapshot {
    pub fast_path: u64,
    pub persistent_store: u64,
    pub average_complexity: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
}

impl RoutingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decision(&self, target: RoutingTarget, complexity: &ComplexityScore) {
        match target {
            RoutingTarget::FastPath => self.fast_path.fetch_add(1, Ordering::Relaxed),
            RoutingTarget::PersistentStore => self.persistent_store.fetch_add(1, Ordering::Relaxed),
        };
        let _ = self
            .complexity_sum
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + complexity.score).to_bits())
            });
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, target: RoutingTarget) -> u64 {
        match target {
            RoutingTarget::FastPath => self.fast_path.load(Ordering::Relaxed),
            RoutingTarget::PersistentStore => self.persistent_store.load(Ordering::Relaxed),
        }
    }

    pub fn decisions(&self) -> u64 {
        self.count(RoutingTarget::FastPath) + self.count(RoutingTarget::PersistentStore)
    }

    /// Mean complexity of recorded decisions; zero before the first one.
    pub fn average_complexity(&self) -> f64 {
        let decisions = self.decisions();
        if decisions == 0 {
            return 0.0;
        }
        f64::from_bits(self.complexity_sum.load(Ordering::Acquire)) / decisions as f64
    }

    /// `hits / (hits + misses)`; zero before any lookup.
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let total = hits + self.cache_misses.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    pub fn snapshot(&self) -> RoutingMetricsSnapshot {
        RoutingMetricsSnapshot {
            fast_path: self.count(RoutingTarget::FastPath),
            persistent_store: self.count(RoutingTarget::PersistentStore),
            average_complexity: self.average_complexity(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_hit_rate: self.cache_hit_rate(),
        }
    }
}
