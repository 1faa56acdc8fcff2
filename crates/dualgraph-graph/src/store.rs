//! Port to the persistent graph store.

use async_trait::async_trait;

use dualgraph_core::error::StoreError;

use crate::mutation::Mutation;

/// Which end of a relationship the queried node sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `(node)-[rel]->(other)`
    Outgoing,
    /// `(other)-[rel]->(node)`
    Incoming,
}

/// Submit-a-mutation and submit-a-query against the persistent store.
///
/// Implementations report failures as [`StoreError::Transient`] when a later
/// attempt may succeed and [`StoreError::Permanent`] otherwise.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn apply(&self, mutation: &Mutation) -> Result<(), StoreError>;

    /// Ids of nodes linked to `node_id` by `rel_type`, sorted.
    async fn related(&self, node_id: &str, rel_type: &str, direction: Direction) -> Result<Vec<String>, StoreError>;
}
