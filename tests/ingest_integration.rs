//! Ingest pipeline integration tests
//!
//! These tests exercise the queue and worker pool under concurrent
//! producers, both full-queue policies, and per-operation timeouts.

use async_trait::async_trait;
use beacon::config::{QueueFullPolicy, TrackingConfig};
use beacon::ingest::{IngestPipeline, SubmitOutcome};
use beacon::models::{Event, LegacyCounts, ObjectSnapshot};
use beacon::storage::{CounterStore, SqliteStore, StorageResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Helper to create test storage
async fn create_test_storage() -> Arc<dyn CounterStore> {
    let store = SqliteStore::new("sqlite::memory:", 5).await.unwrap();
    store.init().await.unwrap();
    Arc::new(store)
}

/// Store whose writes stall for a fixed time before reaching SQLite
struct StallingStore {
    inner: Arc<dyn CounterStore>,
    stall: Duration,
}

#[async_trait]
impl CounterStore for StallingStore {
    async fn init(&self) -> anyhow::Result<()> {
        self.inner.init().await
    }

    async fn record(&self, event: &Event) -> StorageResult<()> {
        tokio::time::sleep(self.stall).await;
        self.inner.record(event).await
    }

    async fn snapshot(&self, object_id: &str) -> StorageResult<ObjectSnapshot> {
        self.inner.snapshot(object_id).await
    }

    async fn snapshot_many(&self, object_ids: &[String]) -> StorageResult<ObjectSnapshot> {
        self.inner.snapshot_many(object_ids).await
    }

    async fn backfill(&self, object_id: &str, counts: LegacyCounts) -> StorageResult<()> {
        self.inner.backfill(object_id, counts).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_with_worker_pool() {
    let store = create_test_storage().await;
    let config = TrackingConfig {
        queue_capacity: 8,
        workers: 3,
        queue_full_policy: QueueFullPolicy::Block,
        store_timeout_ms: 5000,
    };
    let pipeline = IngestPipeline::start(Arc::clone(&store), &config);

    let mut handles = vec![];
    for producer in 0..8 {
        let queue = pipeline.queue();
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                let object = if i % 2 == 0 { "even" } else { "odd" };
                let outcome = queue
                    .submit(Event::new(object, format!("visitor-{producer}")))
                    .await;
                assert_eq!(outcome, SubmitOutcome::Queued);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = pipeline.stats();
    pipeline.shutdown().await;

    let snap = stats.snapshot();
    assert_eq!(snap.enqueued, 200);
    assert_eq!(snap.applied, 200);
    assert_eq!(snap.dropped, 0);

    let ids = vec!["even".to_string(), "odd".to_string()];
    let totals = store.snapshot_many(&ids).await.unwrap();
    assert_eq!(totals.visits, 200);
    assert_eq!(totals.uniques, 8);
}

#[tokio::test]
async fn test_drop_policy_sheds_load_without_waiting() {
    let inner = create_test_storage().await;
    let store: Arc<dyn CounterStore> = Arc::new(StallingStore {
        inner: Arc::clone(&inner),
        stall: Duration::from_millis(200),
    });
    let config = TrackingConfig {
        queue_capacity: 2,
        workers: 1,
        queue_full_policy: QueueFullPolicy::Drop,
        store_timeout_ms: 5000,
    };
    let pipeline = IngestPipeline::start(store, &config);
    let queue = pipeline.queue();

    let start = Instant::now();
    let mut dropped = 0;
    for i in 0..20 {
        if queue.submit(Event::new("page", format!("v{i}"))).await == SubmitOutcome::Dropped {
            dropped += 1;
        }
    }
    assert!(start.elapsed() < Duration::from_millis(200));
    assert!(dropped >= 17, "only {dropped} events dropped");

    let stats = pipeline.stats();
    pipeline.shutdown().await;

    let snap = stats.snapshot();
    assert_eq!(snap.dropped, dropped);
    assert_eq!(snap.enqueued + snap.dropped, 20);
    assert_eq!(snap.applied, snap.enqueued);
    assert_eq!(
        inner.snapshot("page").await.unwrap().visits as u64,
        snap.applied
    );
}

#[tokio::test]
async fn test_stuck_store_operation_times_out() {
    let inner = create_test_storage().await;
    let store: Arc<dyn CounterStore> = Arc::new(StallingStore {
        inner: Arc::clone(&inner),
        stall: Duration::from_secs(30),
    });
    let config = TrackingConfig {
        queue_capacity: 16,
        workers: 1,
        queue_full_policy: QueueFullPolicy::Block,
        store_timeout_ms: 50,
    };
    let pipeline = IngestPipeline::start(store, &config);
    let queue = pipeline.queue();

    for i in 0..3 {
        queue.submit(Event::new("page", format!("v{i}"))).await;
    }

    let stats = pipeline.stats();
    let start = Instant::now();
    pipeline.shutdown().await;
    assert!(start.elapsed() < Duration::from_secs(5));

    let snap = stats.snapshot();
    assert_eq!(snap.failed, 3);
    assert_eq!(snap.applied, 0);
    assert_eq!(inner.snapshot("page").await.unwrap().visits, 0);
}
