//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dualgraph_core::Config;

pub mod calls;
pub mod publish;
pub mod route;
pub mod status;
pub mod sync;

/// dualgraph - complexity-routed queries over a CDC-mirrored code graph
#[derive(Parser)]
#[command(name = "dualgraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to ./dualgraph.toml when present)
    #[arg(short, long, global = true, env = "DUALGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mirror the event streams into Neo4j until interrupted
    Sync(sync::SyncArgs),

    /// Decide which backend should answer a query
    Route(route::RouteArgs),

    /// Publish a graph mutation event
    Publish(publish::PublishArgs),

    /// Show what a node calls and what calls it
    Calls(calls::CallsArgs),

    /// Show stream backlog and graph counts
    Status,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let json = self.json;

        match self.command {
            Commands::Sync(args) => sync::execute(args, &config, json).await,
            Commands::Route(args) => route::execute(args, &config, json),
            Commands::Publish(args) => publish::execute(args, &config, json).await,
            Commands::Calls(args) => calls::execute(args, &config, json).await,
            Commands::Status => status::execute(&config, json).await,
        }
    }
}
