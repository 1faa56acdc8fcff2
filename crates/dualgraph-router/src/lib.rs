//! # dualgraph Router
//!
//! Decides, per graph query, whether the in-process graph structure or the
//! persistent Neo4j store should answer it. Decisions depend only on the
//! query text, never on the data.

pub mod analyzer;
pub mod metrics;
pub mod router;

pub use analyzer::ComplexityAnalyzer;
pub use metrics::{RoutingMetrics, RoutingMetricsSnapshot};
pub use router::{normalize_query, QueryRouter, RoutingOptions};
