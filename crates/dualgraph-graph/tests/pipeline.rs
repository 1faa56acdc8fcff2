//! Event log to graph store, end to end, with in-process collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Map};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use dualgraph_core::config::SyncConfig;
use dualgraph_core::error::StoreError;
use dualgraph_core::event::model::GraphEvent;
use dualgraph_core::ports::DedupStore;
use dualgraph_graph::queries::calls;
use dualgraph_graph::{InMemoryGraphStore, RecordingSleeper, Sleeper, SyncError, SyncWorker};
use dualgraph_redis::{InMemoryEventStream, MemoryDedupStore};

fn fast_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.idle_backoff_ms = 5;
    config
}

fn worker(
    stream: &Arc<InMemoryEventStream>,
    dedup: &Arc<MemoryDedupStore>,
    store: &Arc<InMemoryGraphStore>,
    config: &SyncConfig,
    batch_size: usize,
) -> SyncWorker {
    SyncWorker::new(stream.clone(), dedup.clone(), store.clone(), config, batch_size)
        .unwrap()
        .with_sleeper(Arc::new(RecordingSleeper::new()))
}

/// Backoff that never finishes; signals when a pause begins.
#[derive(Default)]
struct StalledSleeper {
    started: Notify,
}

#[async_trait]
impl Sleeper for StalledSleeper {
    async fn sleep(&self, _duration: Duration) {
        self.started.notify_one();
        std::future::pending::<()>().await;
    }
}

fn function(event_id: &str, id: &str) -> GraphEvent {
    let mut props = Map::new();
    props.insert("name".to_string(), json!(id));
    GraphEvent::node_created(event_id, id, &["Function"], props)
}

#[tokio::test]
async fn a_calls_b_after_one_cycle() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());

    stream.append(&function("e1", "A")).unwrap();
    stream.append(&function("e2", "B")).unwrap();
    stream.append(&GraphEvent::edge_created("e3", "A", "B", "CALLS")).unwrap();

    let mut worker = worker(&stream, &dedup, &store, &fast_config(), 100);
    assert_eq!(worker.run_once().await.unwrap(), 3);

    let stats = worker.stats();
    assert_eq!(stats.nodes_synced, 2);
    assert_eq!(stats.edges_synced, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(calls::callees(store.as_ref(), "A").await.unwrap(), vec!["B"]);
    assert_eq!(stream.pending_len(), 0);
}

#[tokio::test]
async fn redelivered_event_is_applied_once() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());
    let event = function("e1", "A");

    stream.append(&event).unwrap();
    stream.append(&event).unwrap();

    let mut worker = worker(&stream, &dedup, &store, &fast_config(), 100);
    worker.run_once().await.unwrap();

    assert_eq!(worker.stats().nodes_synced, 1);
    assert_eq!(worker.stats().duplicates_skipped, 1);
    assert_eq!(store.applied_count(), 1);
    assert_eq!(stream.pending_len(), 0);
}

#[tokio::test]
async fn failed_event_is_redelivered_after_restart() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());
    let mut config = fast_config();
    config.retry.max_attempts = 3;

    stream.append(&function("e1", "A")).unwrap();
    store.fail_next(3, StoreError::transient("connection reset"));

    let mut first = worker(&stream, &dedup, &store, &config, 100);
    first.run_once().await.unwrap();
    assert_eq!(first.stats().errors, 1);
    assert_eq!(first.stats().nodes_synced, 0);
    assert_eq!(first.stats().last_acknowledged_offset, None);
    assert_eq!(stream.pending_len(), 1);
    drop(first);

    let mut restarted = worker(&stream, &dedup, &store, &config, 100);
    restarted.run_once().await.unwrap();
    assert_eq!(restarted.stats().nodes_synced, 1);
    assert_eq!(restarted.stats().errors, 0);
    assert_eq!(store.applied_count(), 1);
    assert!(store.node("A").is_some());
    assert_eq!(stream.pending_len(), 0);

    // A further redelivery of the same entry is a duplicate, not a second apply.
    assert!(dedup.contains("e1").await.unwrap());
}

#[tokio::test]
async fn poison_event_is_dead_lettered_after_max_deliveries() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());
    let mut config = fast_config();
    config.retry.max_attempts = 2;
    config.max_deliveries = 3;

    stream.append(&function("e1", "bad")).unwrap();
    stream.append(&function("e2", "good")).unwrap();
    store.poison("bad", StoreError::transient("timeout"));

    let mut worker = worker(&stream, &dedup, &store, &config, 100);
    for _ in 0..3 {
        worker.run_once().await.unwrap();
    }

    let stats = worker.stats();
    assert_eq!(stats.errors, 3);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.nodes_synced, 1);
    assert!(store.node("good").is_some());
    assert_eq!(stream.pending_len(), 0);

    let dead = stream.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.event_id(), Some("e1"));
    assert!(dead[0].1.contains("failed 3 deliveries"));
}

#[tokio::test]
async fn malformed_entries_are_counted_and_dropped() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());

    stream.append(&function("e1", "A")).unwrap();
    stream.append_fields(HashMap::from([
        ("event_id".to_string(), "e2".to_string()),
        ("kind".to_string(), "NodeRenamed".to_string()),
        ("payload".to_string(), "{}".to_string()),
    ]));
    stream.append_fields(HashMap::from([("noise".to_string(), "1".to_string())]));
    stream.append(&GraphEvent::edge_created("e4", "A", "B", "CALLS")).unwrap();

    let mut worker = worker(&stream, &dedup, &store, &fast_config(), 100);
    worker.run_once().await.unwrap();

    let stats = worker.stats();
    assert_eq!(stats.malformed_skipped, 2);
    assert_eq!(stats.nodes_synced, 1);
    assert_eq!(stats.edges_synced, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(stream.pending_len(), 0);
    assert_eq!(stream.acknowledged_count(), 4);
}

#[tokio::test]
async fn empty_stream_polling_stops_on_cancel() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events").with_block(Duration::from_millis(50)));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());
    let mut worker = worker(&stream, &dedup, &store, &fast_config(), 100);

    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker did not stop after cancellation")
        .unwrap()
        .unwrap();
    assert_eq!(stats.synced(), 0);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn cancelled_run_resumes_where_it_left_off() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());
    for i in 0..5 {
        stream.append(&function(&format!("e{i}"), &format!("n{i}"))).unwrap();
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut stopped = worker(&stream, &dedup, &store, &fast_config(), 100);
    let stats = stopped.run(cancel).await.unwrap();
    assert_eq!(stats.synced(), 0);
    assert_eq!(stream.acknowledged_count(), 0);

    let mut resumed = worker(&stream, &dedup, &store, &fast_config(), 100);
    resumed.run_once().await.unwrap();
    assert_eq!(resumed.stats().nodes_synced, 5);
}

#[tokio::test]
async fn cancel_during_backoff_leaves_event_pending() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());
    stream.append(&function("e1", "A")).unwrap();
    store.fail_next(1, StoreError::transient("connection reset"));

    let sleeper = Arc::new(StalledSleeper::default());
    let mut stalled = SyncWorker::new(stream.clone(), dedup.clone(), store.clone(), &fast_config(), 100)
        .unwrap()
        .with_sleeper(sleeper.clone());
    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { stalled.run(cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(2), sleeper.started.notified())
        .await
        .expect("worker never started backing off");
    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker ignored cancellation during backoff")
        .unwrap()
        .unwrap();

    assert_eq!(stats.retries, 1);
    assert_eq!(stats.synced(), 0);
    assert_eq!(stats.last_acknowledged_offset, None);
    assert_eq!(stream.acknowledged_count(), 0);
    assert_eq!(stream.pending_len(), 1);
    assert!(store.node("A").is_none());
    assert!(!dedup.contains("e1").await.unwrap());

    let mut resumed = worker(&stream, &dedup, &store, &fast_config(), 100);
    resumed.run_once().await.unwrap();
    assert_eq!(resumed.stats().nodes_synced, 1);
    assert_eq!(store.applied_count(), 1);
    assert_eq!(stream.pending_len(), 0);
    assert_eq!(stream.acknowledged_count(), 1);
}

#[tokio::test]
async fn persistent_stream_failure_stops_worker() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());
    let mut config = fast_config();
    config.max_stream_failures = 3;
    stream.fail_next_reads(10);

    let mut worker = worker(&stream, &dedup, &store, &config, 100);
    let result = tokio::time::timeout(Duration::from_secs(2), worker.run(CancellationToken::new()))
        .await
        .expect("worker kept polling a dead stream");
    assert!(matches!(result, Err(SyncError::StreamLost { failures: 3, .. })));
}

#[tokio::test]
async fn transient_stream_failures_are_absorbed() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(1_000));
    let store = Arc::new(InMemoryGraphStore::new());
    stream.append(&function("e1", "A")).unwrap();
    stream.fail_next_reads(2);

    let mut worker = worker(&stream, &dedup, &store, &fast_config(), 100);
    let mut feed = worker.statistics();
    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(2), feed.wait_for(|s| s.nodes_synced == 1))
        .await
        .expect("event was never applied")
        .unwrap();
    cancel.cancel();
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.nodes_synced, 1);
}

#[tokio::test]
async fn thousand_events_sync_quickly() {
    let stream = Arc::new(InMemoryEventStream::new("repo:events"));
    let dedup = Arc::new(MemoryDedupStore::new(10_000));
    let store = Arc::new(InMemoryGraphStore::new());

    for i in 0..500 {
        stream.append(&function(&format!("n{i}"), &format!("fn{i}"))).unwrap();
    }
    for i in 0..500 {
        let target = (i + 1) % 500;
        stream
            .append(&GraphEvent::edge_created(format!("c{i}"), &format!("fn{i}"), &format!("fn{target}"), "CALLS"))
            .unwrap();
    }

    let mut worker = worker(&stream, &dedup, &store, &fast_config(), 100);
    let started = Instant::now();
    while worker.run_once().await.unwrap() > 0 {}
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(20), "1000 events took {:?}", elapsed);
    assert_eq!(worker.stats().nodes_synced, 500);
    assert_eq!(worker.stats().edges_synced, 500);
    assert_eq!(store.counts().relationships, 500);
    assert_eq!(stream.acknowledged_count(), 1_000);
}
