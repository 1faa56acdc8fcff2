//! Query router with a concurrent decision cache.
//!
//! Decisions are a pure function of (normalized query text, thresholds), so
//! they are cached under exactly that key. Reads go through `DashMap` shards
//! and never contend with each other; reconfiguring the default thresholds
//! also drops every cached entry.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use dualgraph_core::config::RouterConfig;
use dualgraph_core::error::ConfigError;
use dualgraph_core::routing::model::{
    ComplexityScore, RoutingDecision, RoutingReason, RoutingTarget, RoutingThresholds,
};

use crate::analyzer::ComplexityAnalyzer;
use crate::metrics::RoutingMetrics;

/// Per-call routing options.
#[derive(Debug, Clone, Default)]
pub struct RoutingOptions {
    /// Thresholds for this call only; the router's own are used when `None`.
    pub thresholds: Option<RoutingThresholds>,
    /// Recompute even if a cached decision exists (the result is still cached).
    pub bypass_cache: bool,
}

impl RoutingOptions {
    pub fn with_thresholds(thresholds: RoutingThresholds) -> Self {
        Self {
            thresholds: Some(thresholds),
            bypass_cache: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    thresholds: (u64, u32),
}

pub struct QueryRouter {
    thresholds: RwLock<RoutingThresholds>,
    cache: DashMap<CacheKey, RoutingDecision>,
    capacity: usize,
    metrics: Arc<RoutingMetrics>,
}

impl QueryRouter {
    /// Build a router with its own metrics. Fails on invalid thresholds.
    pub fn new(config: &RouterConfig) -> Result<Self, ConfigError> {
        Self::with_metrics(config, Arc::new(RoutingMetrics::new()))
    }

    pub fn with_metrics(config: &RouterConfig, metrics: Arc<RoutingMetrics>) -> Result<Self, ConfigError> {
        config.thresholds.validate()?;
        if config.cache_capacity == 0 {
            return Err(ConfigError::invalid("router cache_capacity must be greater than 0"));
        }
        Ok(Self {
            thresholds: RwLock::new(config.thresholds),
            cache: DashMap::new(),
            capacity: config.cache_capacity,
            metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    pub fn thresholds(&self) -> RoutingThresholds {
        *self.thresholds.read()
    }

    /// Replace the default thresholds and invalidate the cache.
    pub fn reconfigure(&self, thresholds: RoutingThresholds) -> Result<(), ConfigError> {
        thresholds.validate()?;
        *self.thresholds.write() = thresholds;
        self.cache.clear();
        debug!(
            simple_threshold = thresholds.simple_threshold,
            max_fast_path_depth = thresholds.max_fast_path_depth,
            "Router reconfigured, decision cache cleared"
        );
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Choose the backend for `query`. Never fails.
    pub fn route(&self, query: &str, opts: &RoutingOptions) -> RoutingDecision {
        let thresholds = self.effective_thresholds(opts);
        let key = CacheKey {
            query: normalize_query(query),
            thresholds: thresholds.fingerprint(),
        };

        if !opts.bypass_cache {
            if let Some(cached) = self.cache.get(&key) {
                self.metrics.cache_hit();
                let mut decision = cached.value().clone();
                decision.from_cache = true;
                return decision;
            }
        }
        self.metrics.cache_miss();

        let complexity = ComplexityAnalyzer::new(thresholds.simple_threshold).analyze(&key.query);
        let decision = decide(complexity, &thresholds);
        self.metrics.record_decision(decision.target, &decision.complexity);

        debug!(
            target = %decision.target,
            score = decision.complexity.score,
            reason = %decision.reason,
            "Routed query"
        );

        self.insert(key, decision.clone());
        decision
    }

    fn effective_thresholds(&self, opts: &RoutingOptions) -> RoutingThresholds {
        match opts.thresholds {
            Some(custom) => match custom.validate() {
                Ok(()) => custom,
                Err(e) => {
                    warn!(error = %e, "Ignoring invalid per-call thresholds");
                    self.thresholds()
                }
            },
            None => self.thresholds(),
        }
    }

    fn insert(&self, key: CacheKey, decision: RoutingDecision) {
        if self.cache.len() >= self.capacity && !self.cache.contains_key(&key) {
            let victim = self.cache.iter().next().map(|entry| entry.key().clone());
            if let Some(victim) = victim {
                self.cache.remove(&victim);
            }
        }
        self.cache.insert(key, decision);
    }
}

/// Apply thresholds and the safety overrides to a score.
fn decide(complexity: ComplexityScore, thresholds: &RoutingThresholds) -> RoutingDecision {
    let distance_confidence = confidence(complexity.score, thresholds.simple_threshold);

    let (target, reason, confidence) = if let Some(anomaly) = complexity.anomaly {
        (RoutingTarget::FastPath, RoutingReason::Anomaly(anomaly), 0.5)
    } else if complexity.has_unbounded_path {
        (RoutingTarget::PersistentStore, RoutingReason::UnboundedTraversal, 1.0)
    } else if complexity.has_aggregation {
        (RoutingTarget::PersistentStore, RoutingReason::Aggregation, 1.0)
    } else if complexity.max_depth > thresholds.max_fast_path_depth {
        let reason = if complexity.has_variable_length {
            RoutingReason::WideVariableLengthPath
        } else {
            RoutingReason::DepthExceedsFastPath
        };
        (RoutingTarget::PersistentStore, reason, 1.0)
    } else if complexity.is_simple {
        (RoutingTarget::FastPath, RoutingReason::BelowThreshold, distance_confidence)
    } else {
        let reason = if complexity.has_union {
            RoutingReason::Union
        } else if complexity.pattern_count > 1 {
            RoutingReason::MultiplePatterns
        } else if complexity.has_variable_length {
            RoutingReason::VariableLengthPath
        } else {
            RoutingReason::AboveThreshold
        };
        (RoutingTarget::PersistentStore, reason, distance_confidence)
    };

    RoutingDecision {
        target,
        confidence,
        reason,
        complexity,
        from_cache: false,
    }
}

/// 0.5 at the threshold, rising to 1.0 one threshold-width away.
fn confidence(score: f64, threshold: f64) -> f64 {
    let distance = (score - threshold).abs() / threshold;
    0.5 + 0.5 * distance.min(1.0)
}

/// Collapse whitespace outside quoted literals and drop trailing semicolons.
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut pending_space = false;

    for c in query.trim().chars() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if c == '\'' || c == '"' || c == '`' {
            quote = Some(c);
        }
        out.push(c);
    }

    while out.ends_with(';') || out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use dualgraph_core::routing::model::{QueryAnomaly, UNBOUNDED_DEPTH};

    fn router() -> QueryRouter {
        QueryRouter::new(&RouterConfig::default()).unwrap()
    }

    fn opts() -> RoutingOptions {
        RoutingOptions::default()
    }

    #[test]
    fn test_normalization() {
        assert_eq!(
            normalize_query("  MATCH (n)\n\tRETURN   n ;"),
            "MATCH (n) RETURN n"
        );
        assert_eq!(
            normalize_query("MATCH (n {name: 'a  b'}) RETURN n"),
            "MATCH (n {name: 'a  b'}) RETURN n"
        );
    }

    #[test]
    fn test_end_to_end_trivial_and_ranged() {
        let router = router();

        let lookup = router.route("MATCH (n:Function {id: 'fn:main'}) RETURN n", &opts());
        assert_eq!(lookup.target, RoutingTarget::FastPath);
        assert!(lookup.complexity.is_simple);
        assert_eq!(lookup.reason, RoutingReason::BelowThreshold);

        let ranged = router.route("MATCH (a)-[:CALLS*1..5]->(b) RETURN b", &opts());
        assert_eq!(ranged.target, RoutingTarget::PersistentStore);
        assert_eq!(ranged.complexity.max_depth, 5);
        assert_eq!(ranged.reason, RoutingReason::WideVariableLengthPath);
        assert_eq!(ranged.reason.to_string(), "variable-length path deeper than fast-path limit");
        assert_ne!(ranged.reason.to_string(), RoutingReason::VariableLengthPath.to_string());
    }

    #[test]
    fn test_safety_overrides_ignore_threshold() {
        let router = router();
        let lax = RoutingOptions::with_thresholds(RoutingThresholds {
            simple_threshold: 1.0e9,
            max_fast_path_depth: 1_000,
        });

        let unbounded = router.route("MATCH (a)-[:CALLS*]->(b) RETURN b", &lax);
        assert_eq!(unbounded.target, RoutingTarget::PersistentStore);
        assert_eq!(unbounded.reason, RoutingReason::UnboundedTraversal);
        assert_eq!(unbounded.complexity.max_depth, UNBOUNDED_DEPTH);
        assert_eq!(unbounded.confidence, 1.0);

        let aggregated = router.route("MATCH (a) RETURN count(a)", &lax);
        assert_eq!(aggregated.target, RoutingTarget::PersistentStore);
        assert_eq!(aggregated.reason, RoutingReason::Aggregation);
    }

    #[test]
    fn test_cache_hit_is_identical() {
        let router = router();
        let first = router.route("MATCH (a)-[:CALLS]->(b)  RETURN b", &opts());
        let second = router.route("MATCH (a)-[:CALLS]->(b) RETURN b;", &opts());

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(RoutingDecision { from_cache: false, ..second }, first);
        assert_eq!(router.metrics().snapshot().cache_hits, 1);
        assert_eq!(router.metrics().snapshot().cache_misses, 1);
    }

    #[test]
    fn test_thresholds_do_not_leak_between_configurations() {
        let router = router();
        let query = "MATCH (a)-[:CALLS]->(b) RETURN b";

        let default = router.route(query, &opts());
        assert_eq!(default.target, RoutingTarget::FastPath);

        let strict = RoutingOptions::with_thresholds(RoutingThresholds {
            simple_threshold: 2.0,
            ..RoutingThresholds::default()
        });
        let strict_decision = router.route(query, &strict);
        assert!(!strict_decision.from_cache);
        assert_eq!(strict_decision.target, RoutingTarget::PersistentStore);

        let default_again = router.route(query, &opts());
        assert!(default_again.from_cache);
        assert_eq!(default_again.target, RoutingTarget::FastPath);
    }

    #[test]
    fn test_reconfigure_invalidates_cache() {
        let router = router();
        let query = "MATCH (a)-[:CALLS]->(b) RETURN b";
        router.route(query, &opts());
        assert_eq!(router.cache_len(), 1);

        router
            .reconfigure(RoutingThresholds { simple_threshold: 2.0, ..RoutingThresholds::default() })
            .unwrap();
        assert_eq!(router.cache_len(), 0);

        let decision = router.route(query, &opts());
        assert!(!decision.from_cache);
        assert_eq!(decision.target, RoutingTarget::PersistentStore);
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let config = RouterConfig {
            thresholds: RoutingThresholds { simple_threshold: -3.0, ..RoutingThresholds::default() },
            ..RouterConfig::default()
        };
        assert!(QueryRouter::new(&config).is_err());
        assert!(router()
            .reconfigure(RoutingThresholds { max_fast_path_depth: 0, ..RoutingThresholds::default() })
            .is_err());
    }

    #[test]
    fn test_invalid_per_call_thresholds_fall_back() {
        let router = router();
        let bad = RoutingOptions::with_thresholds(RoutingThresholds {
            simple_threshold: f64::NAN,
            ..RoutingThresholds::default()
        });
        let decision = router.route("MATCH (n) RETURN n", &bad);
        assert_eq!(decision.target, RoutingTarget::FastPath);
    }

    #[test]
    fn test_anomalous_query_still_routes() {
        let decision = router().route("", &opts());
        assert_eq!(decision.target, RoutingTarget::FastPath);
        assert_eq!(decision.reason, RoutingReason::Anomaly(QueryAnomaly::Empty));
    }

    #[test]
    fn test_confidence_grows_with_distance() {
        assert_eq!(confidence(10.0, 10.0), 0.5);
        assert!(confidence(9.0, 10.0) < confidence(1.0, 10.0));
        assert_eq!(confidence(500.0, 10.0), 1.0);
    }

    #[test]
    fn test_capacity_bound() {
        let config = RouterConfig { cache_capacity: 4, ..RouterConfig::default() };
        let router = QueryRouter::new(&config).unwrap();
        for i in 0..20 {
            router.route(&format!("MATCH (n {{id: 'n{i}'}}) RETURN n"), &opts());
        }
        assert!(router.cache_len() <= 4);
    }

    #[test]
    fn test_hit_rate_never_decreases_on_repeats() {
        let router = router();
        let queries: Vec<String> = (0..10).map(|i| format!("MATCH (n {{id: '{i}'}}) RETURN n")).collect();
        let mut last_rate = 0.0;
        for _ in 0..3 {
            for q in &queries {
                router.route(q, &opts());
            }
            let rate = router.metrics().cache_hit_rate();
            assert!(rate >= last_rate);
            last_rate = rate;
        }
        assert!(last_rate > 0.6);
    }

    #[test]
    fn test_concurrent_routing_is_consistent() {
        let router = Arc::new(router());
        let queries = [
            "MATCH (a)-[:CALLS]->(b) RETURN b",
            "MATCH (a)-[:CALLS*]->(b) RETURN b",
            "MATCH (a) RETURN count(a)",
        ];
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let router = Arc::clone(&router);
                std::thread::spawn(move || {
                    queries
                        .iter()
                        .map(|q| router.route(q, &RoutingOptions::default()).target)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<RoutingTarget>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(router.cache_len(), 3);
    }

    #[test]
    fn test_routing_latency_and_cache_speedup() {
        let router = router();
        let queries: Vec<String> = (0..100)
            .map(|i| match i % 4 {
                0 => format!("MATCH (n:Function {{id: 'fn:{i}'}}) RETURN n"),
                1 => format!("MATCH (a {{id: '{i}'}})-[:CALLS]->(b)-[:CALLS]->(c) RETURN c"),
                2 => format!("MATCH (a {{id: '{i}'}})-[:CALLS*1..{}]->(b) RETURN b, count(*) ORDER BY b", i % 7 + 1),
                _ => format!(
                    "MATCH (a {{id: '{i}'}})-[:CALLS*]->(b), (b)-[:IMPORTS]->(c) RETURN c \
                     UNION MATCH (x)-[:DEFINES]->(y) WHERE x.id = '{i}' RETURN y AS c"
                ),
            })
            .collect();

        let started = Instant::now();
        let first: Vec<RoutingDecision> = queries.iter().map(|q| router.route(q, &opts())).collect();
        let cold = started.elapsed();

        let started = Instant::now();
        let second: Vec<RoutingDecision> = queries.iter().map(|q| router.route(q, &opts())).collect();
        let warm = started.elapsed();

        assert!(cold.as_micros() / 100 < 1_000, "cold routing too slow: {:?}", cold);
        assert!(warm < cold, "cache did not help: cold {:?}, warm {:?}", cold, warm);
        for (a, b) in first.iter().zip(second.iter()) {
            assert!(b.from_cache);
            assert_eq!(&RoutingDecision { from_cache: false, ..b.clone() }, a);
        }
    }
}
