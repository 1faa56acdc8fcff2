//! CDC sync worker.
//!
//! Drains one event stream into the persistent store. Each cycle fetches a
//! batch, turns entries into mutations, skips already-applied event ids,
//! applies the rest with bounded retry, and acknowledges what is done.
//!
//! Events are applied strictly in stream order. When an event exhausts its
//! retries the batch stops there: it and everything after it stay pending
//! and are replayed on the next cycle, so a later mutation of the same node
//! or edge never overtakes an earlier one. An event that fails this way
//! `max_deliveries` times, or that the store rejects outright, is copied to
//! the dead-letter log and acknowledged.

pub mod retry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dualgraph_core::config::SyncConfig;
use dualgraph_core::error::{ConfigError, StoreError, StreamError};
use dualgraph_core::event::model::{RawEvent, StreamOffset};
use dualgraph_core::ports::{DedupStore, EventStream};
use dualgraph_core::stats::SyncStatistics;

use crate::mutation::Mutation;
use crate::processor::EventProcessor;
use crate::store::GraphStore;
use retry::{RetryPolicy, Sleeper, TokioSleeper};

/// Where the worker is within its current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Idle,
    Fetching,
    Processing,
    Applying,
    Retrying,
    Acknowledging,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Fetching => "fetching",
            WorkerState::Processing => "processing",
            WorkerState::Applying => "applying",
            WorkerState::Retrying => "retrying",
            WorkerState::Acknowledging => "acknowledging",
        };
        f.write_str(name)
    }
}

/// Conditions that stop the worker. Everything else is absorbed into
/// statistics and logs.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Event stream '{stream}' lost after {failures} consecutive failures: {source}")]
    StreamLost {
        stream: String,
        failures: u32,
        source: StreamError,
    },
}

enum ApplyOutcome {
    Applied,
    /// Transient failures used up every attempt.
    Exhausted(StoreError),
    /// The store will never accept this mutation.
    Rejected(StoreError),
    Cancelled,
}

pub struct SyncWorker {
    stream: Arc<dyn EventStream>,
    dedup: Arc<dyn DedupStore>,
    store: Arc<dyn GraphStore>,
    processor: EventProcessor,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    batch_size: usize,
    max_deliveries: u32,
    idle_backoff: Duration,
    max_stream_failures: u32,
    stats: SyncStatistics,
    stats_tx: watch::Sender<SyncStatistics>,
    state: WorkerState,
    /// Failed cycles per pending entry.
    failures: HashMap<StreamOffset, u32>,
    started: bool,
    cancel: CancellationToken,
}

impl SyncWorker {
    pub fn new(
        stream: Arc<dyn EventStream>,
        dedup: Arc<dyn DedupStore>,
        store: Arc<dyn GraphStore>,
        config: &SyncConfig,
        batch_size: usize,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        if batch_size == 0 {
            return Err(ConfigError::invalid("batch_size must be greater than 0").into());
        }

        let (stats_tx, _) = watch::channel(SyncStatistics::default());
        Ok(Self {
            stream,
            dedup,
            store,
            processor: EventProcessor::new(),
            retry: RetryPolicy::from(&config.retry),
            sleeper: Arc::new(TokioSleeper),
            batch_size,
            max_deliveries: config.max_deliveries,
            idle_backoff: Duration::from_millis(config.idle_backoff_ms),
            max_stream_failures: config.max_stream_failures,
            stats: SyncStatistics::default(),
            stats_tx,
            state: WorkerState::Idle,
            failures: HashMap::new(),
            started: false,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the backoff clock.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Read-only feed of the statistics, updated after every cycle.
    pub fn statistics(&self) -> watch::Receiver<SyncStatistics> {
        self.stats_tx.subscribe()
    }

    pub fn stats(&self) -> &SyncStatistics {
        &self.stats
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stream_name(&self) -> &str {
        self.stream.name()
    }

    /// Run cycles until `cancel` fires or the stream is lost.
    ///
    /// Cancellation only interrupts waits (reads, backoff, idle pauses), never
    /// an in-flight apply. Whatever was not acknowledged stays pending for the
    /// next run.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<SyncStatistics, SyncError> {
        self.cancel = cancel.clone();
        info!(stream = %self.stream.name(), batch_size = self.batch_size, "Sync worker started");

        let mut consecutive_failures = 0u32;
        while !cancel.is_cancelled() {
            match self.run_once().await {
                Ok(0) => {
                    consecutive_failures = 0;
                    self.pause(self.idle_backoff).await;
                }
                Ok(_) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.max_stream_failures {
                        error!(
                            stream = %self.stream.name(),
                            failures = consecutive_failures,
                            error = %e,
                            "Event stream unreachable, stopping worker"
                        );
                        return Err(SyncError::StreamLost {
                            stream: self.stream.name().to_string(),
                            failures: consecutive_failures,
                            source: e,
                        });
                    }
                    warn!(
                        stream = %self.stream.name(),
                        failures = consecutive_failures,
                        error = %e,
                        "Event stream read failed"
                    );
                    self.pause(self.idle_backoff).await;
                }
            }
        }

        info!(
            stream = %self.stream.name(),
            nodes_synced = self.stats.nodes_synced,
            edges_synced = self.stats.edges_synced,
            "Sync worker stopped"
        );
        Ok(self.stats.clone())
    }

    /// One fetch-apply-acknowledge cycle. Returns how many entries were read.
    pub async fn run_once(&mut self) -> Result<usize, StreamError> {
        if !self.started {
            self.stream.replay_pending().await;
            self.started = true;
        }

        self.set_state(WorkerState::Fetching);
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            read = self.stream.read_batch(self.batch_size) => Some(read),
        };
        let batch = match read {
            None => {
                self.set_state(WorkerState::Idle);
                return Ok(0);
            }
            Some(Err(e)) => {
                self.set_state(WorkerState::Idle);
                return Err(e);
            }
            Some(Ok(batch)) => batch,
        };

        if batch.is_empty() {
            self.finish_cycle();
            return Ok(0);
        }

        self.set_state(WorkerState::Processing);
        let mut done: Vec<StreamOffset> = Vec::with_capacity(batch.len());
        let mut halted = false;
        let mut cycle_error = None;

        for raw in &batch {
            let mutation = match self.processor.decode(raw) {
                Ok(mutation) => mutation,
                Err(reason) => {
                    warn!(offset = %raw.offset, event_id = ?raw.event_id(), %reason, "Skipping malformed event");
                    self.stats.malformed_skipped += 1;
                    done.push(raw.offset.clone());
                    continue;
                }
            };

            match self.dedup.contains(&mutation.event_id).await {
                Ok(true) => {
                    debug!(event_id = %mutation.event_id, offset = %raw.offset, "Skipping already-applied event");
                    self.stats.duplicates_skipped += 1;
                    self.failures.remove(&raw.offset);
                    done.push(raw.offset.clone());
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(event_id = %mutation.event_id, error = %e, "De-dup lookup failed, deferring rest of batch");
                    cycle_error = Some(e);
                    halted = true;
                    break;
                }
            }

            self.set_state(WorkerState::Applying);
            let outcome = self.apply_with_retry(&mutation).await;
            self.set_state(WorkerState::Processing);

            match outcome {
                ApplyOutcome::Applied => {
                    self.record_applied(&mutation).await;
                    done.push(raw.offset.clone());
                }
                ApplyOutcome::Rejected(err) => {
                    self.stats.errors += 1;
                    error!(event_id = %mutation.event_id, offset = %raw.offset, error = %err, "Store rejected mutation");
                    if self.dead_letter(raw, &err.to_string()).await {
                        done.push(raw.offset.clone());
                    } else {
                        halted = true;
                        break;
                    }
                }
                ApplyOutcome::Exhausted(err) => {
                    self.stats.errors += 1;
                    let failures = {
                        let count = self.failures.entry(raw.offset.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    if failures >= self.max_deliveries {
                        error!(
                            event_id = %mutation.event_id,
                            offset = %raw.offset,
                            failures,
                            error = %err,
                            "Giving up on event"
                        );
                        let reason = format!("failed {} deliveries: {}", failures, err);
                        if self.dead_letter(raw, &reason).await {
                            done.push(raw.offset.clone());
                            continue;
                        }
                    } else {
                        error!(
                            event_id = %mutation.event_id,
                            offset = %raw.offset,
                            failures,
                            error = %err,
                            "Retries exhausted, leaving event for redelivery"
                        );
                    }
                    halted = true;
                    break;
                }
                ApplyOutcome::Cancelled => {
                    halted = true;
                    break;
                }
            }
        }

        self.set_state(WorkerState::Acknowledging);
        let acked = self.stream.acknowledge(&done).await;
        if halted || acked.is_err() {
            self.stream.replay_pending().await;
        }
        if let Err(e) = acked {
            warn!(stream = %self.stream.name(), error = %e, "Acknowledge failed, entries will be redelivered");
            self.finish_cycle();
            return Err(e);
        }

        if let Some(max) = done.iter().max() {
            self.stats.acknowledge(max);
        }
        debug!(
            stream = %self.stream.name(),
            read = batch.len(),
            acknowledged = done.len(),
            halted,
            "Sync cycle complete"
        );
        self.finish_cycle();

        match cycle_error {
            Some(e) => Err(e),
            None => Ok(batch.len()),
        }
    }

    async fn apply_with_retry(&mut self, mutation: &Mutation) -> ApplyOutcome {
        let mut attempt = 1;
        loop {
            let err = match self.store.apply(mutation).await {
                Ok(()) => return ApplyOutcome::Applied,
                Err(err) if !err.is_transient() => return ApplyOutcome::Rejected(err),
                Err(err) => err,
            };
            if !self.retry.should_retry(attempt) {
                return ApplyOutcome::Exhausted(err);
            }

            let delay = self.retry.delay_for(attempt);
            self.stats.retries += 1;
            self.set_state(WorkerState::Retrying);
            warn!(
                event_id = %mutation.event_id,
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient store failure, retrying"
            );

            let cancelled = tokio::select! {
                _ = self.sleeper.sleep(delay) => false,
                _ = self.cancel.cancelled() => true,
            };
            if cancelled {
                return ApplyOutcome::Cancelled;
            }
            self.set_state(WorkerState::Applying);
            attempt += 1;
        }
    }

    async fn record_applied(&mut self, mutation: &Mutation) {
        if let Err(e) = self.dedup.mark_applied(&mutation.event_id).await {
            warn!(event_id = %mutation.event_id, error = %e, "Failed to record applied event");
        }
        self.failures.remove(&mutation.offset);
        if mutation.is_node() {
            self.stats.nodes_synced += 1;
        } else {
            self.stats.edges_synced += 1;
        }
        debug!(event_id = %mutation.event_id, kind = %mutation.kind, offset = %mutation.offset, "Event applied");
    }

    /// Returns whether the entry may now be acknowledged.
    async fn dead_letter(&mut self, raw: &RawEvent, reason: &str) -> bool {
        match self.stream.dead_letter(raw, reason).await {
            Ok(()) => {
                self.stats.dead_lettered += 1;
                self.failures.remove(&raw.offset);
                true
            }
            Err(e) => {
                warn!(offset = %raw.offset, error = %e, "Dead-letter write failed, keeping event pending");
                false
            }
        }
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        self.state = state;
    }

    fn finish_cycle(&mut self) {
        self.stats.last_cycle_at = Some(Utc::now());
        self.stats_tx.send_replace(self.stats.clone());
        self.set_state(WorkerState::Idle);
    }
}
