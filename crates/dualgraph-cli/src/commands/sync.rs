//! CDC sync CLI command.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dualgraph_core::stats::SyncStatistics;
use dualgraph_core::Config;
use dualgraph_graph::schema::initialize_schema;
use dualgraph_graph::{GraphClient, GraphStore, SyncWorker};
use dualgraph_redis::{init_pool, RedisDedupStore, RedisEventStream};

use crate::output;

#[derive(Args)]
pub struct SyncArgs {
    /// Stream key to drain; may be repeated (defaults to the configured keys)
    #[arg(long = "stream")]
    pub streams: Vec<String>,

    /// Drain what is currently in the streams, then exit
    #[arg(long)]
    pub once: bool,

    /// Skip creating the Neo4j constraint and index
    #[arg(long)]
    pub skip_schema: bool,
}

pub async fn execute(args: SyncArgs, config: &Config, json: bool) -> Result<()> {
    let keys = if args.streams.is_empty() {
        config.stream.keys.clone()
    } else {
        args.streams
    };

    let client = GraphClient::connect(&config.graph).await?;
    if !args.skip_schema {
        initialize_schema(&client).await?;
    }
    let store: Arc<dyn GraphStore> = Arc::new(client);
    let pool = init_pool(&config.redis.url).await.context("Failed to connect to Redis")?;

    let mut workers = Vec::with_capacity(keys.len());
    for key in &keys {
        let stream = RedisEventStream::connect(&config.redis.url, key, &config.stream)
            .await
            .with_context(|| format!("Failed to open stream '{}'", key))?;
        let dedup = RedisDedupStore::new(pool.clone(), key, config.sync.dedup_ttl_secs);
        let worker = SyncWorker::new(
            Arc::new(stream),
            Arc::new(dedup),
            store.clone(),
            &config.sync,
            config.stream.batch_size,
        )?;
        workers.push(worker);
    }

    let results = if args.once {
        drain(workers).await?
    } else {
        run_until_interrupted(workers).await?
    };

    if json {
        let out: Vec<_> = results
            .iter()
            .map(|(stream, stats)| serde_json::json!({ "stream": stream, "statistics": stats }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for (stream, stats) in &results {
            output::print_sync_stats(stream, stats);
        }
    }
    Ok(())
}

async fn drain(workers: Vec<SyncWorker>) -> Result<Vec<(String, SyncStatistics)>> {
    let mut results = Vec::with_capacity(workers.len());
    for mut worker in workers {
        while worker.run_once().await? > 0 {}
        results.push((worker.stream_name().to_string(), worker.stats().clone()));
    }
    Ok(results)
}

/// One task per stream, so a backoff on one never stalls another.
async fn run_until_interrupted(workers: Vec<SyncWorker>) -> Result<Vec<(String, SyncStatistics)>> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping sync workers");
                cancel.cancel();
            }
        });
    }

    println!("{}", format!("Syncing {} stream(s), Ctrl-C to stop", workers.len()).bold());

    let mut tasks = JoinSet::new();
    for mut worker in workers {
        let cancel = cancel.child_token();
        tasks.spawn(async move {
            let name = worker.stream_name().to_string();
            (name, worker.run(cancel).await)
        });
    }

    let mut results = Vec::new();
    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        let (stream, outcome) = joined.context("Sync worker task panicked")?;
        match outcome {
            Ok(stats) => results.push((stream, stats)),
            Err(e) => {
                error!(stream = %stream, error = %e, "Sync worker stopped");
                cancel.cancel();
                failure.get_or_insert(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(results),
    }
}
