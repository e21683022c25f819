use crate::models::{Event, LegacyCounts, ObjectSnapshot};
use crate::storage::{CounterStore, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Read-caching wrapper for single-object snapshots.
///
/// Tracked events are not reflected until the entry expires, which is within
/// the eventual consistency the ingest queue already implies. Multi-object
/// reads always go to the inner store so they stay a single consistent read.
pub struct CachedCounterStore {
    /// Underlying store implementation
    inner: Arc<dyn CounterStore>,
    /// Snapshot cache keyed by object id
    read_cache: Cache<String, ObjectSnapshot>,
}

impl CachedCounterStore {
    pub fn new(inner: Arc<dyn CounterStore>, max_entries: u64, ttl: Duration) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { inner, read_cache }
    }
}

#[async_trait]
impl CounterStore for CachedCounterStore {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn record(&self, event: &Event) -> StorageResult<()> {
        self.inner.record(event).await
    }

    async fn snapshot(&self, object_id: &str) -> StorageResult<ObjectSnapshot> {
        if let Some(cached) = self.read_cache.get(object_id).await {
            return Ok(cached);
        }

        let snapshot = self.inner.snapshot(object_id).await?;
        self.read_cache
            .insert(object_id.to_string(), snapshot)
            .await;

        Ok(snapshot)
    }

    async fn snapshot_many(&self, object_ids: &[String]) -> StorageResult<ObjectSnapshot> {
        self.inner.snapshot_many(object_ids).await
    }

    async fn backfill(&self, object_id: &str, counts: LegacyCounts) -> StorageResult<()> {
        self.inner.backfill(object_id, counts).await?;
        self.read_cache.invalidate(object_id).await;
        Ok(())
    }
}
