//! CDC event domain models.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names of a raw log entry.
pub const FIELD_EVENT_ID: &str = "event_id";
pub const FIELD_KIND: &str = "kind";
pub const FIELD_PAYLOAD: &str = "payload";

/// Opaque cursor assigned by the log to an entry.
///
/// Redis stream ids (`<millis>-<seq>`) order numerically; anything else
/// falls back to lexical order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamOffset(String);

impl StreamOffset {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parts(&self) -> Option<(u64, u64)> {
        let (ms, seq) = self.0.split_once('-')?;
        Some((ms.parse().ok()?, seq.parse().ok()?))
    }
}

impl fmt::Display for StreamOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for StreamOffset {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parts(), other.parts()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for StreamOffset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One entry as read from the log, before any validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub offset: StreamOffset,
    pub fields: HashMap<String, String>,
}

impl RawEvent {
    pub fn new(offset: StreamOffset, fields: HashMap<String, String>) -> Self {
        Self { offset, fields }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Best-effort event id, for logging rejected entries.
    pub fn event_id(&self) -> Option<&str> {
        self.field(FIELD_EVENT_ID).filter(|id| !id.trim().is_empty())
    }
}

/// The closed set of mutation kinds the writer publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    NodeCreated,
    NodeUpdated,
    EdgeCreated,
    EdgeDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::NodeCreated,
        EventKind::NodeUpdated,
        EventKind::EdgeCreated,
        EventKind::EdgeDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NodeCreated => "NodeCreated",
            EventKind::NodeUpdated => "NodeUpdated",
            EventKind::EdgeCreated => "EdgeCreated",
            EventKind::EdgeDeleted => "EdgeDeleted",
        }
    }

    /// Parse a kind discriminant. Only the exact canonical names are kinds.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NodeCreated" => Some(EventKind::NodeCreated),
            "NodeUpdated" => Some(EventKind::NodeUpdated),
            "EdgeCreated" => Some(EventKind::EdgeCreated),
            "EdgeDeleted" => Some(EventKind::EdgeDeleted),
            _ => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, EventKind::NodeCreated | EventKind::NodeUpdated)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `NodeCreated` / `NodeUpdated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    pub id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Payload of `EdgeCreated` / `EdgeDeleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgePayload {
    #[serde(alias = "source_id")]
    pub source: String,
    #[serde(alias = "target_id")]
    pub target: String,
    #[serde(alias = "type", alias = "relationship")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Kind discriminant plus its kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphChange {
    NodeCreated(NodePayload),
    NodeUpdated(NodePayload),
    EdgeCreated(EdgePayload),
    EdgeDeleted(EdgePayload),
}

impl GraphChange {
    pub fn kind(&self) -> EventKind {
        match self {
            GraphChange::NodeCreated(_) => EventKind::NodeCreated,
            GraphChange::NodeUpdated(_) => EventKind::NodeUpdated,
            GraphChange::EdgeCreated(_) => EventKind::EdgeCreated,
            GraphChange::EdgeDeleted(_) => EventKind::EdgeDeleted,
        }
    }

    /// Serialize the payload half, as stored in the `payload` field.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            GraphChange::NodeCreated(p) | GraphChange::NodeUpdated(p) => serde_json::to_string(p),
            GraphChange::EdgeCreated(p) | GraphChange::EdgeDeleted(p) => serde_json::to_string(p),
        }
    }
}

/// One mutation fact published by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEvent {
    pub event_id: String,
    pub change: GraphChange,
    /// Assigned by the log; `None` until the event has been published.
    pub stream_offset: Option<StreamOffset>,
}

impl GraphEvent {
    pub fn new(event_id: impl Into<String>, change: GraphChange) -> Self {
        Self {
            event_id: event_id.into(),
            change,
            stream_offset: None,
        }
    }

    pub fn node_created(event_id: impl Into<String>, id: &str, labels: &[&str], properties: Map<String, Value>) -> Self {
        Self::new(
            event_id,
            GraphChange::NodeCreated(NodePayload {
                id: id.to_string(),
                labels: labels.iter().map(|l| l.to_string()).collect(),
                properties,
            }),
        )
    }

    pub fn node_updated(event_id: impl Into<String>, id: &str, properties: Map<String, Value>) -> Self {
        Self::new(
            event_id,
            GraphChange::NodeUpdated(NodePayload {
                id: id.to_string(),
                labels: Vec::new(),
                properties,
            }),
        )
    }

    pub fn edge_created(event_id: impl Into<String>, source: &str, target: &str, rel_type: &str) -> Self {
        Self::new(
            event_id,
            GraphChange::EdgeCreated(EdgePayload {
                source: source.to_string(),
                target: target.to_string(),
                rel_type: rel_type.to_string(),
                properties: Map::new(),
            }),
        )
    }

    pub fn edge_deleted(event_id: impl Into<String>, source: &str, target: &str, rel_type: &str) -> Self {
        Self::new(
            event_id,
            GraphChange::EdgeDeleted(EdgePayload {
                source: source.to_string(),
                target: target.to_string(),
                rel_type: rel_type.to_string(),
                properties: Map::new(),
            }),
        )
    }

    pub fn kind(&self) -> EventKind {
        self.change.kind()
    }

    /// Field/value pairs in the wire layout of a log entry.
    pub fn to_fields(&self) -> serde_json::Result<Vec<(String, String)>> {
        Ok(vec![
            (FIELD_EVENT_ID.to_string(), self.event_id.clone()),
            (FIELD_KIND.to_string(), self.kind().as_str().to_string()),
            (FIELD_PAYLOAD.to_string(), self.change.payload_json()?),
        ])
    }
}
