//! Read-side aggregation
//!
//! Every reported total goes through `merge`, so current-scheme and
//! legacy-scheme visits are combined the same way for single and multi
//! object reads. The engine never writes.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::{Counts, ObjectSnapshot};
use crate::storage::{CounterStore, StorageError};

/// Upper bound on ids in one multi-object read
pub const MAX_OBJECTS_PER_READ: usize = 1000;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("at least one object id is required")]
    NoObjects,
    #[error("object ids must not be empty")]
    InvalidObject,
    #[error("too many object ids (max {MAX_OBJECTS_PER_READ})")]
    TooManyObjects,
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AggregateError {
    /// Errors caused by the request rather than the store
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AggregateError::NoObjects
                | AggregateError::InvalidObject
                | AggregateError::TooManyObjects
        )
    }
}

/// Effective totals: current visits plus legacy visits, always.
///
/// Legacy uniques are not added: two cardinalities can overlap, and summing
/// them would count a returning visitor twice. Visits saturate at `i64::MAX`.
pub fn merge(snapshot: ObjectSnapshot) -> Counts {
    Counts {
        visits: snapshot.visits.saturating_add(snapshot.legacy.visits),
        uniques: snapshot.uniques,
    }
}

#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(store: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Counts for one object. A never-tracked object is all zeros.
    pub async fn object(&self, object_id: &str) -> Result<Counts, AggregateError> {
        if object_id.is_empty() {
            return Err(AggregateError::InvalidObject);
        }

        let snapshot = tokio::time::timeout(self.timeout, self.store.snapshot(object_id))
            .await
            .map_err(|_| AggregateError::Timeout(self.timeout))??;

        debug!(object_id, ?snapshot, "single object read");
        Ok(merge(snapshot))
    }

    /// Combined counts for several objects, read in one store transaction.
    ///
    /// Repeated ids count once per occurrence toward visits. Uniques are the
    /// size of the union of all visitors, not a sum.
    pub async fn objects(&self, object_ids: &[String]) -> Result<Counts, AggregateError> {
        if object_ids.is_empty() {
            return Err(AggregateError::NoObjects);
        }
        if object_ids.len() > MAX_OBJECTS_PER_READ {
            return Err(AggregateError::TooManyObjects);
        }
        if object_ids.iter().any(|id| id.is_empty()) {
            return Err(AggregateError::InvalidObject);
        }

        let snapshot = tokio::time::timeout(self.timeout, self.store.snapshot_many(object_ids))
            .await
            .map_err(|_| AggregateError::Timeout(self.timeout))??;

        debug!(objects = object_ids.len(), ?snapshot, "multi object read");
        Ok(merge(snapshot))
    }
}
