//! Neo4j connection client.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use dualgraph_core::config::GraphConfig;
use dualgraph_core::error::StoreError;

use crate::mutation::{Mutation, NODE_LABEL};
use crate::store::{Direction, GraphStore};

/// Client for the persistent Neo4j store.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Create a new GraphClient from config.
    ///
    /// neo4rs builds its pool lazily, so a `RETURN 1` ping forces the bolt
    /// handshake and the connect timeout covers an unreachable server.
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let neo4j_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .fetch_size(200)
            .build()
            .context("Failed to build Neo4j config")?;

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let graph = tokio::time::timeout(timeout, async {
            let graph = Graph::connect(neo4j_config)
                .await
                .context("Failed to create Neo4j connection pool")?;
            graph
                .run(Query::new("RETURN 1".to_string()))
                .await
                .context("Neo4j is not responding to queries")?;
            Ok::<_, anyhow::Error>(graph)
        })
        .await
        .with_context(|| format!("Timed out connecting to Neo4j at {}", config.uri))??;

        info!(uri = %config.uri, database = %config.database, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Execute a Cypher query that returns no results.
    pub async fn execute(&self, query: Query) -> Result<()> {
        self.graph.run(query).await.context("Neo4j query execution failed")?;
        Ok(())
    }

    /// Execute a Cypher query and return results as rows.
    pub async fn query(&self, query: Query) -> Result<Vec<neo4rs::Row>> {
        let mut result = self.graph.execute(query).await.context("Neo4j query failed")?;

        let mut rows = Vec::new();
        while let Some(row) = result.next().await.context("Failed to read Neo4j result row")? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a Cypher query and return a single scalar value.
    pub async fn query_scalar<T: DeserializeOwned>(&self, query: Query, field: &str) -> Result<Option<T>> {
        let rows = self.query(query).await?;
        if let Some(row) = rows.into_iter().next() {
            let val: T = row
                .get(field)
                .map_err(|e| anyhow::anyhow!("Failed to get field '{}': {:?}", field, e))?;
            Ok(Some(val))
        } else {
            Ok(None)
        }
    }

    /// Get node and relationship counts for status display.
    pub async fn get_counts(&self) -> Result<GraphCounts> {
        let node_query = Query::new(format!("MATCH (n:{NODE_LABEL}) RETURN count(n) as count"));
        let rel_query = Query::new(format!("MATCH (:{NODE_LABEL})-[r]->(:{NODE_LABEL}) RETURN count(r) as count"));

        let node_count: i64 = self.query_scalar(node_query, "count").await?.unwrap_or(0);
        let rel_count: i64 = self.query_scalar(rel_query, "count").await?.unwrap_or(0);

        Ok(GraphCounts {
            nodes: node_count as usize,
            relationships: rel_count as usize,
        })
    }
}

/// Node and relationship counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
}

/// Bolt-level failures (connection loss, leader switch, timeouts) are worth
/// retrying; a statement that keeps failing is bounded by the worker's
/// delivery limit instead.
fn store_error(err: neo4rs::Error) -> StoreError {
    StoreError::transient(err.to_string())
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn apply(&self, mutation: &Mutation) -> Result<(), StoreError> {
        self.graph.run(mutation.to_query()).await.map_err(store_error)?;
        debug!(event_id = %mutation.event_id, kind = %mutation.kind, "Applied mutation");
        Ok(())
    }

    async fn related(&self, node_id: &str, rel_type: &str, direction: Direction) -> Result<Vec<String>, StoreError> {
        let pattern = match direction {
            Direction::Outgoing => format!("(a:{NODE_LABEL} {{id: $id}})-[r]->(b:{NODE_LABEL})"),
            Direction::Incoming => format!("(a:{NODE_LABEL} {{id: $id}})<-[r]-(b:{NODE_LABEL})"),
        };
        let query = Query::new(format!("MATCH {pattern} WHERE type(r) = $rel RETURN DISTINCT b.id AS id ORDER BY id"))
            .param("id", node_id)
            .param("rel", rel_type);

        let mut result = self.graph.execute(query).await.map_err(store_error)?;
        let mut ids = Vec::new();
        while let Some(row) = result.next().await.map_err(store_error)? {
            let id: String = row
                .get("id")
                .map_err(|e| StoreError::permanent(format!("Unexpected row shape: {:?}", e)))?;
            ids.push(id);
        }
        Ok(ids)
    }
}
