//! Validated mutations and their Cypher form.
//!
//! Every node carries the `CodeNode` label so all statements can match on the
//! uniquely-constrained `CodeNode.id`. Writer-supplied labels and
//! relationship types are interpolated into the statement text, so they must
//! already be validated identifiers (the processor guarantees this); ids and
//! properties always travel as parameters.

use neo4rs::{BoltList, BoltMap, BoltNull, BoltString, BoltType, Query};
use serde_json::{Map, Value};

use dualgraph_core::event::model::{EventKind, StreamOffset};

/// Label shared by every mirrored node.
pub const NODE_LABEL: &str = "CodeNode";

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOp {
    /// Assert a node with its labels and properties.
    UpsertNode {
        id: String,
        labels: Vec<String>,
        properties: Map<String, Value>,
    },
    /// Merge properties into a node, creating it if absent.
    MergeNode {
        id: String,
        properties: Map<String, Value>,
    },
    /// Assert a directed relationship, creating missing endpoints as placeholders.
    MergeEdge {
        source: String,
        target: String,
        rel_type: String,
        properties: Map<String, Value>,
    },
    /// Remove the relationship of that type between the two nodes, if any.
    DeleteEdge {
        source: String,
        target: String,
        rel_type: String,
    },
}

/// One operation against the persistent store, traced back to its event.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub event_id: String,
    pub offset: StreamOffset,
    pub kind: EventKind,
    pub op: MutationOp,
}

impl Mutation {
    pub fn is_node(&self) -> bool {
        self.kind.is_node()
    }

    pub fn cypher(&self) -> String {
        match &self.op {
            MutationOp::UpsertNode { labels, .. } => {
                let mut text = format!("MERGE (n:{NODE_LABEL} {{id: $id}})");
                if !labels.is_empty() {
                    text.push_str(" SET n:");
                    text.push_str(&labels.join(":"));
                }
                text.push_str(" SET n += $props");
                text
            }
            MutationOp::MergeNode { .. } => format!("MERGE (n:{NODE_LABEL} {{id: $id}}) SET n += $props"),
            MutationOp::MergeEdge { rel_type, .. } => format!(
                "MERGE (s:{NODE_LABEL} {{id: $source}}) \
                 MERGE (t:{NODE_LABEL} {{id: $target}}) \
                 MERGE (s)-[r:{rel_type}]->(t) SET r += $props"
            ),
            MutationOp::DeleteEdge { rel_type, .. } => format!(
                "MATCH (s:{NODE_LABEL} {{id: $source}})-[r:{rel_type}]->(t:{NODE_LABEL} {{id: $target}}) DELETE r"
            ),
        }
    }

    pub fn to_query(&self) -> Query {
        let query = Query::new(self.cypher());
        match &self.op {
            MutationOp::UpsertNode { id, properties, .. } | MutationOp::MergeNode { id, properties } => query
                .param("id", id.as_str())
                .param("props", properties_to_bolt(properties)),
            MutationOp::MergeEdge {
                source,
                target,
                properties,
                ..
            } => query
                .param("source", source.as_str())
                .param("target", target.as_str())
                .param("props", properties_to_bolt(properties)),
            MutationOp::DeleteEdge { source, target, .. } => {
                query.param("source", source.as_str()).param("target", target.as_str())
            }
        }
    }
}

/// Convert a JSON property map into a Bolt map for `SET x += $props`.
pub fn properties_to_bolt(properties: &Map<String, Value>) -> BoltType {
    let mut map = BoltMap::new();
    for (key, value) in properties {
        map.put(BoltString::from(key.as_str()), json_to_bolt(value));
    }
    BoltType::Map(map)
}

/// Neo4j properties are scalars or lists of scalars; nested objects are
/// stored as their JSON text.
fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.as_str()),
        Value::Array(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(json_to_bolt(item));
            }
            BoltType::List(list)
        }
        Value::Object(_) => BoltType::from(value.to_string()),
    }
}
