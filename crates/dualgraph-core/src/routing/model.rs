//! Query routing domain models.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// `max_depth` value reported for unbounded variable-length paths.
pub const UNBOUNDED_DEPTH: u32 = u32::MAX;

/// Why the analyzer could not read a query. Such queries score zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryAnomaly {
    Empty,
    UnbalancedBrackets,
    Unrecognized,
}

impl fmt::Display for QueryAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryAnomaly::Empty => "empty query",
            QueryAnomaly::UnbalancedBrackets => "unbalanced brackets",
            QueryAnomaly::Unrecognized => "no recognizable clause",
        })
    }
}

/// Structural complexity of one query pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    pub score: f64,
    pub is_simple: bool,
    /// Deepest traversal across patterns; `UNBOUNDED_DEPTH` for `*` / `*n..`.
    pub max_depth: u32,
    pub pattern_count: usize,
    pub relationship_count: usize,
    pub has_variable_length: bool,
    pub has_unbounded_path: bool,
    pub has_aggregation: bool,
    pub has_union: bool,
    pub anomaly: Option<QueryAnomaly>,
}

impl ComplexityScore {
    /// The lowest bucket, used for input the analyzer cannot read.
    pub fn anomalous(anomaly: QueryAnomaly) -> Self {
        Self {
            score: 0.0,
            is_simple: true,
            max_depth: 0,
            pattern_count: 0,
            relationship_count: 0,
            has_variable_length: false,
            has_unbounded_path: false,
            has_aggregation: false,
            has_union: false,
            anomaly: Some(anomaly),
        }
    }
}

/// Execution backend a query is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingTarget {
    /// In-process graph structure, synchronously up to date.
    FastPath,
    /// Cypher-capable graph database, asynchronously consistent.
    PersistentStore,
}

impl fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoutingTarget::FastPath => "fast_path",
            RoutingTarget::PersistentStore => "persistent_store",
        })
    }
}

/// The feature that decided a routing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingReason {
    Anomaly(QueryAnomaly),
    UnboundedTraversal,
    Aggregation,
    WideVariableLengthPath,
    DepthExceedsFastPath,
    Union,
    MultiplePatterns,
    VariableLengthPath,
    AboveThreshold,
    BelowThreshold,
}

impl fmt::Display for RoutingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingReason::Anomaly(a) => write!(f, "unanalyzable query ({a})"),
            RoutingReason::UnboundedTraversal => f.write_str("unbounded traversal detected"),
            RoutingReason::Aggregation => f.write_str("aggregation detected"),
            RoutingReason::WideVariableLengthPath => f.write_str("variable-length path deeper than fast-path limit"),
            RoutingReason::DepthExceedsFastPath => f.write_str("traversal deeper than fast-path limit"),
            RoutingReason::Union => f.write_str("union detected"),
            RoutingReason::MultiplePatterns => f.write_str("multiple patterns"),
            RoutingReason::VariableLengthPath => f.write_str("variable-length path detected"),
            RoutingReason::AboveThreshold => f.write_str("complexity above threshold"),
            RoutingReason::BelowThreshold => f.write_str("complexity below threshold"),
        }
    }
}

/// Router output for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub target: RoutingTarget,
    pub confidence: f64,
    pub reason: RoutingReason,
    pub complexity: ComplexityScore,
    pub from_cache: bool,
}

/// Thresholds the router applies to a `ComplexityScore`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingThresholds {
    /// Scores strictly below this are simple.
    pub simple_threshold: f64,
    /// Deepest traversal the fast path is trusted with.
    pub max_fast_path_depth: u32,
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self {
            simple_threshold: 10.0,
            max_fast_path_depth: 3,
        }
    }
}

impl RoutingThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.simple_threshold.is_finite() || self.simple_threshold <= 0.0 {
            return Err(ConfigError::invalid(format!(
                "simple_threshold must be a positive number, got {}",
                self.simple_threshold
            )));
        }
        if self.max_fast_path_depth == 0 {
            return Err(ConfigError::invalid("max_fast_path_depth must be at least 1"));
        }
        Ok(())
    }

    /// Identity of this threshold set, for keying cached decisions.
    pub fn fingerprint(&self) -> (u64, u32) {
        (self.simple_threshold.to_bits(), self.max_fast_path_depth)
    }
}
