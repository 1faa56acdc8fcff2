//! CDC event processor: raw log entry to validated mutation.
//!
//! Malformed entries are an expected input, not an error path. `decode`
//! says why an entry was rejected; `process` is the plain optional form the
//! worker uses.

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use dualgraph_core::event::model::{
    EdgePayload, EventKind, GraphChange, GraphEvent, NodePayload, RawEvent, FIELD_EVENT_ID, FIELD_KIND,
    FIELD_PAYLOAD,
};

use crate::mutation::{Mutation, MutationOp};

/// Why an entry could not become a mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedEvent {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("unknown event kind '{0}'")]
    UnknownKind(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("empty {0}")]
    EmptyId(&'static str),

    #[error("'{0}' is not a valid label or relationship type")]
    InvalidIdentifier(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventProcessor;

impl EventProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Zero-or-one mutation for one entry; never panics on bad input.
    pub fn process(&self, raw: &RawEvent) -> Option<Mutation> {
        match self.decode(raw) {
            Ok(mutation) => Some(mutation),
            Err(reason) => {
                debug!(offset = %raw.offset, event_id = ?raw.event_id(), %reason, "Skipping malformed event");
                None
            }
        }
    }

    /// Mutations for every valid entry, in input order.
    pub fn process_batch<'a>(&self, raws: impl IntoIterator<Item = &'a RawEvent>) -> Vec<Mutation> {
        raws.into_iter().filter_map(|raw| self.process(raw)).collect()
    }

    pub fn decode(&self, raw: &RawEvent) -> Result<Mutation, MalformedEvent> {
        let event = parse_event(raw)?;
        let kind = event.kind();
        let op = match event.change {
            GraphChange::NodeCreated(p) => MutationOp::UpsertNode {
                id: p.id,
                labels: p.labels,
                properties: p.properties,
            },
            GraphChange::NodeUpdated(p) => MutationOp::MergeNode {
                id: p.id,
                properties: p.properties,
            },
            GraphChange::EdgeCreated(p) => MutationOp::MergeEdge {
                source: p.source,
                target: p.target,
                rel_type: p.rel_type,
                properties: p.properties,
            },
            GraphChange::EdgeDeleted(p) => MutationOp::DeleteEdge {
                source: p.source,
                target: p.target,
                rel_type: p.rel_type,
            },
        };
        Ok(Mutation {
            event_id: event.event_id,
            offset: raw.offset.clone(),
            kind,
            op,
        })
    }
}

/// Validate a raw entry into a typed event carrying its offset.
pub fn parse_event(raw: &RawEvent) -> Result<GraphEvent, MalformedEvent> {
    let event_id = raw.event_id().ok_or(MalformedEvent::MissingField(FIELD_EVENT_ID))?;
    let kind_text = raw.field(FIELD_KIND).ok_or(MalformedEvent::MissingField(FIELD_KIND))?;
    let kind = EventKind::parse(kind_text).ok_or_else(|| MalformedEvent::UnknownKind(kind_text.to_string()))?;
    let payload = raw.field(FIELD_PAYLOAD).ok_or(MalformedEvent::MissingField(FIELD_PAYLOAD))?;

    let change = match kind {
        EventKind::NodeCreated => GraphChange::NodeCreated(node_payload(payload)?),
        EventKind::NodeUpdated => GraphChange::NodeUpdated(node_payload(payload)?),
        EventKind::EdgeCreated => GraphChange::EdgeCreated(edge_payload(payload)?),
        EventKind::EdgeDeleted => GraphChange::EdgeDeleted(edge_payload(payload)?),
    };

    let mut event = GraphEvent::new(event_id, change);
    event.stream_offset = Some(raw.offset.clone());
    Ok(event)
}

fn decode_json<T: DeserializeOwned>(payload: &str) -> Result<T, MalformedEvent> {
    serde_json::from_str(payload).map_err(|e| MalformedEvent::InvalidPayload(e.to_string()))
}

fn node_payload(payload: &str) -> Result<NodePayload, MalformedEvent> {
    let node: NodePayload = decode_json(payload)?;
    require_id(&node.id, "node id")?;
    for label in &node.labels {
        require_identifier(label)?;
    }
    Ok(node)
}

fn edge_payload(payload: &str) -> Result<EdgePayload, MalformedEvent> {
    let edge: EdgePayload = decode_json(payload)?;
    require_id(&edge.source, "source id")?;
    require_id(&edge.target, "target id")?;
    require_identifier(&edge.rel_type)?;
    Ok(edge)
}

fn require_id(id: &str, what: &'static str) -> Result<(), MalformedEvent> {
    if id.trim().is_empty() {
        return Err(MalformedEvent::EmptyId(what));
    }
    Ok(())
}

/// Labels and relationship types are spliced into Cypher text.
fn require_identifier(name: &str) -> Result<(), MalformedEvent> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MalformedEvent::InvalidIdentifier(name.to_string()))
    }
}
