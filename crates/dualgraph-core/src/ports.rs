//! Ports to the durable event log and the de-dup ledger.
//!
//! The sync worker only talks to these traits; `dualgraph-redis` provides the
//! Redis Streams implementation and in-process stand-ins.

use async_trait::async_trait;

use crate::error::StreamError;
use crate::event::model::{RawEvent, StreamOffset};

/// A durable, ordered, append-only log read through a consumer group.
///
/// Delivery is at-least-once: an entry handed out by `read_batch` stays
/// pending until its offset is acknowledged, and is handed out again after
/// `replay_pending` or a restart of the same consumer.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Read up to `max_items` entries. Pending redeliveries come first.
    ///
    /// Returns an empty batch when nothing is available; may wait a bounded
    /// amount of time for new entries before doing so.
    async fn read_batch(&self, max_items: usize) -> Result<Vec<RawEvent>, StreamError>;

    /// Mark entries as fully applied.
    async fn acknowledge(&self, offsets: &[StreamOffset]) -> Result<(), StreamError>;

    /// Make the next `read_batch` start again from the unacknowledged entries.
    async fn replay_pending(&self);

    /// Copy a poison entry to the dead-letter log. The caller still acknowledges it.
    async fn dead_letter(&self, event: &RawEvent, reason: &str) -> Result<(), StreamError>;

    /// Name of the underlying stream, for logs.
    fn name(&self) -> &str;
}

/// Record of event ids whose mutation has already been applied.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn contains(&self, event_id: &str) -> Result<bool, StreamError>;

    async fn mark_applied(&self, event_id: &str) -> Result<(), StreamError>;
}
