//! Terminal output formatting.

use colored::{ColoredString, Colorize};

use dualgraph_core::routing::model::{RoutingDecision, RoutingTarget};
use dualgraph_core::stats::SyncStatistics;
use dualgraph_graph::queries::calls::CallNeighbourhood;
use dualgraph_redis::StreamStatus;
use dualgraph_router::RoutingMetricsSnapshot;

fn target_colored(target: RoutingTarget) -> ColoredString {
    match target {
        RoutingTarget::FastPath => target.to_string().green(),
        RoutingTarget::PersistentStore => target.to_string().yellow(),
    }
}

/// Print one routing decision.
pub fn print_decision(query: &str, decision: &RoutingDecision) {
    let c = &decision.complexity;
    println!("{}", truncate(query, 100).cyan());
    println!(
        "  {} {} {}",
        "→".dimmed(),
        target_colored(decision.target).bold(),
        format!("(confidence {:.2})", decision.confidence).dimmed()
    );
    println!("  {}: {}", "Reason".bold(), decision.reason);
    println!(
        "  {}: {:.1}  simple={} depth={} patterns={} hops={}",
        "Score".bold(),
        c.score,
        c.is_simple,
        if c.has_unbounded_path { "∞".to_string() } else { c.max_depth.to_string() },
        c.pattern_count,
        c.relationship_count
    );
    let mut flags = Vec::new();
    if c.has_variable_length {
        flags.push("variable-length");
    }
    if c.has_aggregation {
        flags.push("aggregation");
    }
    if c.has_union {
        flags.push("union");
    }
    if let Some(anomaly) = c.anomaly {
        println!("  {}: {}", "Anomaly".bold(), anomaly.to_string().red());
    }
    if !flags.is_empty() {
        println!("  {}: {}", "Features".bold(), flags.join(", "));
    }
    if decision.from_cache {
        println!("  {}", "(cached)".dimmed());
    }
    println!();
}

pub fn print_routing_metrics(metrics: &RoutingMetricsSnapshot) {
    println!("{}", "Routing metrics".bold());
    println!("  Fast path:          {}", metrics.fast_path);
    println!("  Persistent store:   {}", metrics.persistent_store);
    println!("  Average complexity: {:.1}", metrics.average_complexity);
    println!(
        "  Cache hit rate:     {:.0}% ({} hits, {} misses)",
        metrics.cache_hit_rate * 100.0,
        metrics.cache_hits,
        metrics.cache_misses
    );
}

pub fn print_sync_stats(stream: &str, stats: &SyncStatistics) {
    println!("{} {}", "Stream".bold(), stream.cyan());
    println!("  Nodes synced:       {}", stats.nodes_synced.to_string().green());
    println!("  Edges synced:       {}", stats.edges_synced.to_string().green());
    println!("  Duplicates skipped: {}", stats.duplicates_skipped);
    println!("  Malformed skipped:  {}", stats.malformed_skipped);
    println!("  Retries:            {}", stats.retries);
    let errors = if stats.errors > 0 {
        stats.errors.to_string().red()
    } else {
        stats.errors.to_string().normal()
    };
    println!("  Errors:             {}", errors);
    println!("  Dead-lettered:      {}", stats.dead_lettered);
    println!(
        "  Last acknowledged:  {}",
        stats
            .last_acknowledged_offset
            .as_ref()
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
}

pub fn print_stream_status(streams: &[StreamStatus]) {
    println!("  {:<32} {:>10} {:>10} {:>10}", "Key", "Length", "Pending", "Dead");
    println!("  {}", "─".repeat(65));
    for s in streams {
        let pending = if s.pending > 0 {
            s.pending.to_string().yellow()
        } else {
            s.pending.to_string().normal()
        };
        let dead = if s.dead_lettered > 0 {
            s.dead_lettered.to_string().red()
        } else {
            s.dead_lettered.to_string().normal()
        };
        println!("  {:<32} {:>10} {:>10} {:>10}", truncate(&s.key, 32), s.length, pending, dead);
    }
}

pub fn print_calls(calls: &CallNeighbourhood) {
    println!("{}", calls.id.cyan().bold());
    println!("  {}", "Calls".bold());
    print_ids(&calls.callees);
    println!("  {}", "Called by".bold());
    print_ids(&calls.callers);
}

fn print_ids(ids: &[String]) {
    if ids.is_empty() {
        println!("    {}", "none".dimmed());
    }
    for id in ids {
        println!("    {}", id);
    }
}

/// Truncate a string to max chars, adding "..." if needed.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
