//! Event publishing CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::{Map, Value};

use dualgraph_core::event::model::GraphEvent;
use dualgraph_core::Config;

#[derive(Args)]
pub struct PublishArgs {
    #[command(subcommand)]
    pub event: PublishEvent,

    /// Target stream (defaults to the first configured key)
    #[arg(long, global = true)]
    pub stream: Option<String>,

    /// Event id (a random UUID when omitted)
    #[arg(long, global = true)]
    pub event_id: Option<String>,
}

#[derive(Subcommand)]
pub enum PublishEvent {
    /// NodeCreated
    Node {
        /// Node id
        id: String,
        /// Extra label; may be repeated
        #[arg(long = "label")]
        labels: Vec<String>,
        /// Properties as a JSON object
        #[arg(long)]
        props: Option<String>,
    },

    /// NodeUpdated
    Update {
        /// Node id
        id: String,
        /// Properties to merge, as a JSON object
        #[arg(long)]
        props: String,
    },

    /// EdgeCreated
    Edge {
        source: String,
        target: String,
        #[arg(long = "type", default_value = "CALLS")]
        rel_type: String,
    },

    /// EdgeDeleted
    Unlink {
        source: String,
        target: String,
        #[arg(long = "type", default_value = "CALLS")]
        rel_type: String,
    },
}

fn parse_props(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(text) => match serde_json::from_str::<Value>(text).context("--props is not valid JSON")? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("--props must be a JSON object"),
        },
    }
}

pub async fn execute(args: PublishArgs, config: &Config, json: bool) -> Result<()> {
    let event_id = args.event_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let event = match &args.event {
        PublishEvent::Node { id, labels, props } => {
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            GraphEvent::node_created(event_id, id, &labels, parse_props(props.as_deref())?)
        }
        PublishEvent::Update { id, props } => GraphEvent::node_updated(event_id, id, parse_props(Some(props))?),
        PublishEvent::Edge { source, target, rel_type } => GraphEvent::edge_created(event_id, source, target, rel_type),
        PublishEvent::Unlink { source, target, rel_type } => GraphEvent::edge_deleted(event_id, source, target, rel_type),
    };

    let stream = match args.stream {
        Some(stream) => stream,
        None => config
            .stream
            .keys
            .first()
            .cloned()
            .context("No stream key configured")?,
    };

    let pool = dualgraph_redis::init_pool(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    let offset = dualgraph_redis::publish_event(&pool, &stream, &event).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "stream": stream, "event_id": event.event_id, "offset": offset })
        );
    } else {
        println!(
            "{} {} {} {}",
            "Published".green().bold(),
            event.kind().to_string().cyan(),
            event.event_id.dimmed(),
            format!("at {}:{}", stream, offset).dimmed()
        );
    }
    Ok(())
}
