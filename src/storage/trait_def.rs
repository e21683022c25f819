use crate::models::{Event, LegacyCounts, ObjectSnapshot};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Apply one event: add the visitor to the object's unique registers and
    /// increment its visit counter in a single transaction.
    async fn record(&self, event: &Event) -> StorageResult<()>;

    /// Current-scheme counters and legacy counters for one object.
    /// A never-tracked object yields an all-zero snapshot.
    async fn snapshot(&self, object_id: &str) -> StorageResult<ObjectSnapshot>;

    /// Counters for several objects, read in one transaction.
    ///
    /// Visits (current and legacy) are summed once per occurrence of an id, so
    /// duplicates are weighted. `uniques` is the cardinality of the union of
    /// all registers. Legacy uniques are summed like visits.
    async fn snapshot_many(&self, object_ids: &[String]) -> StorageResult<ObjectSnapshot>;

    /// Overwrite the legacy counters of an object
    async fn backfill(&self, object_id: &str, counts: LegacyCounts) -> StorageResult<()>;
}
