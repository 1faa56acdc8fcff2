//! Call-graph lookups.
//!
//! Answer "what does A call" and "who calls A" from whichever
//! [`GraphStore`] the caller routed to.

use serde::Serialize;

use dualgraph_core::error::StoreError;

use crate::store::{Direction, GraphStore};

pub const CALLS: &str = "CALLS";

/// Direct call neighbourhood of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallNeighbourhood {
    pub id: String,
    pub callees: Vec<String>,
    pub callers: Vec<String>,
}

/// Ids of the nodes `node_id` calls.
pub async fn callees(store: &dyn GraphStore, node_id: &str) -> Result<Vec<String>, StoreError> {
    store.related(node_id, CALLS, Direction::Outgoing).await
}

/// Ids of the nodes calling `node_id`.
pub async fn callers(store: &dyn GraphStore, node_id: &str) -> Result<Vec<String>, StoreError> {
    store.related(node_id, CALLS, Direction::Incoming).await
}

pub async fn neighbourhood(store: &dyn GraphStore, node_id: &str) -> Result<CallNeighbourhood, StoreError> {
    Ok(CallNeighbourhood {
        id: node_id.to_string(),
        callees: callees(store, node_id).await?,
        callers: callers(store, node_id).await?,
    })
}
