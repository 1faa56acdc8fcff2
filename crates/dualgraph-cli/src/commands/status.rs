//! Status CLI command.

use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;

use dualgraph_core::Config;
use dualgraph_graph::GraphClient;
use dualgraph_redis::{init_pool, stream_status};

use crate::output;

pub async fn execute(config: &Config, json: bool) -> Result<()> {
    let pool = init_pool(&config.redis.url).await.context("Failed to connect to Redis")?;
    let mut streams = Vec::with_capacity(config.stream.keys.len());
    for key in &config.stream.keys {
        streams.push(stream_status(&pool, key, &config.stream).await?);
    }

    // Neo4j being down is reported, not fatal.
    let graph_config = dualgraph_core::config::GraphConfig {
        connect_timeout_secs: config.graph.connect_timeout_secs.min(5),
        ..config.graph.clone()
    };
    let counts = match GraphClient::connect(&graph_config).await {
        Ok(client) => Some(client.get_counts().await?),
        Err(e) => {
            tracing::warn!(error = %e, "Neo4j unavailable");
            None
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "streams": streams, "graph": counts }))?
        );
        return Ok(());
    }

    println!("{}", "Streams".bold());
    output::print_stream_status(&streams);
    println!();
    println!("{}", "Graph".bold());
    match counts {
        Some(counts) => {
            println!("  Nodes:         {}", counts.nodes);
            println!("  Relationships: {}", counts.relationships);
        }
        None => println!("  {}", format!("unreachable at {} (timeout {:?})", config.graph.uri, Duration::from_secs(graph_config.connect_timeout_secs)).dimmed()),
    }
    Ok(())
}
