//! In-process event log and de-dup ledger.
//!
//! Same delivery contract as the Redis implementations: entries handed out
//! stay pending until acknowledged, pending entries are handed out again
//! after `replay_pending`, and new entries are delivered in append order.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use dualgraph_core::error::StreamError;
use dualgraph_core::event::model::{GraphEvent, RawEvent, StreamOffset};
use dualgraph_core::ports::{DedupStore, EventStream};

#[derive(Default)]
struct StreamState {
    entries: Vec<RawEvent>,
    /// Index of the next never-delivered entry.
    cursor: usize,
    pending: BTreeMap<StreamOffset, RawEvent>,
    replay: bool,
    acknowledged: u64,
    dead_letters: Vec<(RawEvent, String)>,
    failing_reads: u32,
}

pub struct InMemoryEventStream {
    name: String,
    state: Mutex<StreamState>,
    appended: Notify,
    block: Option<Duration>,
}

impl InMemoryEventStream {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(StreamState {
                replay: true,
                ..StreamState::default()
            }),
            appended: Notify::new(),
            block: None,
        }
    }

    /// Wait up to `block` for an append when a read finds nothing.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = Some(block);
        self
    }

    pub fn append(&self, event: &GraphEvent) -> serde_json::Result<StreamOffset> {
        let fields = event.to_fields()?.into_iter().collect();
        Ok(self.append_fields(fields))
    }

    /// Append arbitrary fields, including ones no writer should produce.
    pub fn append_fields(&self, fields: HashMap<String, String>) -> StreamOffset {
        let offset = {
            let mut state = self.state.lock();
            let offset = StreamOffset::new(format!("{}-0", state.entries.len() + 1));
            state.entries.push(RawEvent::new(offset.clone(), fields));
            offset
        };
        self.appended.notify_waiters();
        offset
    }

    /// Make the next `n` reads fail as if the log were unreachable.
    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().failing_reads = n;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn acknowledged_count(&self) -> u64 {
        self.state.lock().acknowledged
    }

    /// Dead-lettered entries with their reasons, oldest first.
    pub fn dead_letters(&self) -> Vec<(RawEvent, String)> {
        self.state.lock().dead_letters.clone()
    }

    fn take_batch(&self, max_items: usize) -> Result<Vec<RawEvent>, StreamError> {
        let mut state = self.state.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(StreamError::unavailable("injected read failure"));
        }

        let mut batch: Vec<RawEvent> = Vec::new();
        if state.replay {
            batch.extend(state.pending.values().take(max_items).cloned());
            if batch.len() == max_items {
                return Ok(batch);
            }
            state.replay = false;
        }

        let end = (state.cursor + max_items - batch.len()).min(state.entries.len());
        let fresh: Vec<RawEvent> = state.entries[state.cursor..end].to_vec();
        state.cursor = end;
        for event in &fresh {
            state.pending.insert(event.offset.clone(), event.clone());
        }
        batch.extend(fresh);
        Ok(batch)
    }
}

#[async_trait]
impl EventStream for InMemoryEventStream {
    async fn read_batch(&self, max_items: usize) -> Result<Vec<RawEvent>, StreamError> {
        if max_items == 0 {
            return Ok(Vec::new());
        }
        let appended = self.appended.notified();
        let batch = self.take_batch(max_items)?;
        match self.block {
            Some(block) if batch.is_empty() => {
                let _ = tokio::time::timeout(block, appended).await;
                self.take_batch(max_items)
            }
            _ => Ok(batch),
        }
    }

    async fn acknowledge(&self, offsets: &[StreamOffset]) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        for offset in offsets {
            if state.pending.remove(offset).is_some() {
                state.acknowledged += 1;
            }
        }
        Ok(())
    }

    async fn replay_pending(&self) {
        self.state.lock().replay = true;
    }

    async fn dead_letter(&self, event: &RawEvent, reason: &str) -> Result<(), StreamError> {
        self.state.lock().dead_letters.push((event.clone(), reason.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Bounded in-memory applied-event ledger. Oldest ids are forgotten first.
pub struct MemoryDedupStore {
    capacity: usize,
    inner: Mutex<(HashSet<String>, VecDeque<String>)>,
}

impl MemoryDedupStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn contains(&self, event_id: &str) -> Result<bool, StreamError> {
        Ok(self.inner.lock().0.contains(event_id))
    }

    async fn mark_applied(&self, event_id: &str) -> Result<(), StreamError> {
        let mut guard = self.inner.lock();
        let (ids, order) = &mut *guard;
        if !ids.insert(event_id.to_string()) {
            return Ok(());
        }
        order.push_back(event_id.to_string());
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                ids.remove(&oldest);
            }
        }
        Ok(())
    }
}
