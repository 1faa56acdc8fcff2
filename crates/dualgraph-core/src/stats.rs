//! Cumulative statistics of a CDC sync worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::model::StreamOffset;

/// Counters owned by one sync worker. Observers only ever see clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub nodes_synced: u64,
    pub edges_synced: u64,
    /// Events whose application failed after all retry attempts.
    pub errors: u64,
    pub duplicates_skipped: u64,
    /// Events dropped because they failed schema validation.
    pub malformed_skipped: u64,
    pub retries: u64,
    pub dead_lettered: u64,
    pub last_acknowledged_offset: Option<StreamOffset>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl SyncStatistics {
    /// Advance the acknowledged watermark; never moves backwards.
    pub fn acknowledge(&mut self, offset: &StreamOffset) {
        match &self.last_acknowledged_offset {
            Some(current) if current >= offset => {}
            _ => self.last_acknowledged_offset = Some(offset.clone()),
        }
    }

    pub fn synced(&self) -> u64 {
        self.nodes_synced + self.edges_synced
    }
}
