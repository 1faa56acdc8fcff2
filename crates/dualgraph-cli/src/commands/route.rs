//! Query routing CLI command.

use std::io::BufRead;

use anyhow::{Context, Result};
use clap::Args;

use dualgraph_core::config::RouterConfig;
use dualgraph_core::Config;
use dualgraph_router::{QueryRouter, RoutingOptions};

use crate::output;

#[derive(Args)]
pub struct RouteArgs {
    /// Query text; one query per line is read from stdin when omitted
    pub queries: Vec<String>,

    /// Override the simple-query score threshold
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Override the deepest traversal the fast path may take
    #[arg(long)]
    pub max_depth: Option<u32>,
}

pub fn execute(args: RouteArgs, config: &Config, json: bool) -> Result<()> {
    let mut router_config: RouterConfig = config.router.clone();
    if let Some(threshold) = args.threshold {
        router_config.thresholds.simple_threshold = threshold;
    }
    if let Some(depth) = args.max_depth {
        router_config.thresholds.max_fast_path_depth = depth;
    }
    let router = QueryRouter::new(&router_config)?;

    let queries = if args.queries.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .context("Failed to read queries from stdin")?
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect()
    } else {
        args.queries
    };

    let opts = RoutingOptions::default();
    let decisions: Vec<_> = queries.iter().map(|q| (q, router.route(q, &opts))).collect();

    if json {
        let out: Vec<_> = decisions
            .iter()
            .map(|(query, decision)| serde_json::json!({ "query": query, "decision": decision }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "decisions": out,
                "metrics": router.metrics().snapshot(),
            }))?
        );
        return Ok(());
    }

    for (query, decision) in &decisions {
        output::print_decision(query, decision);
    }
    if decisions.len() > 1 {
        output::print_routing_metrics(&router.metrics().snapshot());
    }
    Ok(())
}
