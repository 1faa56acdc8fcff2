//! Call-graph lookup against the persistent store.

use anyhow::{Context, Result};
use clap::Args;

use dualgraph_core::Config;
use dualgraph_graph::queries::calls;
use dualgraph_graph::GraphClient;

use crate::output;

#[derive(Args)]
pub struct CallsArgs {
    /// Node id
    pub id: String,
}

pub async fn execute(args: CallsArgs, config: &Config, json: bool) -> Result<()> {
    let client = GraphClient::connect(&config.graph).await?;
    let neighbourhood = calls::neighbourhood(&client, &args.id)
        .await
        .with_context(|| format!("Failed to query calls for '{}'", args.id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&neighbourhood)?);
    } else {
        output::print_calls(&neighbourhood);
    }
    Ok(())
}
