use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};

use super::IngestStats;
use crate::config::QueueFullPolicy;
use crate::models::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Queue full under `QueueFullPolicy::Drop`, or the pipeline has shut down
    Dropped,
}

/// Producer handle onto the bounded event queue. Cheap to clone.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
    policy: QueueFullPolicy,
    stats: Arc<IngestStats>,
}

impl EventQueue {
    pub(crate) fn new(
        tx: mpsc::Sender<Event>,
        policy: QueueFullPolicy,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self { tx, policy, stats }
    }

    /// Hand an event to the workers.
    ///
    /// Under `Block` this waits for capacity when the queue is full; under
    /// `Drop` it never waits. Never fails: a rejected event is counted.
    pub async fn submit(&self, event: Event) -> SubmitOutcome {
        trace!(object_id = %event.object_id, visitor_id = %event.visitor_id, "queueing event");

        let result = match self.policy {
            QueueFullPolicy::Block => self.tx.send(event).await.map_err(|e| {
                warn!(object_id = %e.0.object_id, "ingest queue closed, dropping event");
            }),
            QueueFullPolicy::Drop => self.tx.try_send(event).map_err(|e| match e {
                TrySendError::Full(event) => {
                    warn!(object_id = %event.object_id, "ingest queue full, dropping event");
                }
                TrySendError::Closed(event) => {
                    warn!(object_id = %event.object_id, "ingest queue closed, dropping event");
                }
            }),
        };

        match result {
            Ok(()) => {
                self.stats.inc_enqueued();
                SubmitOutcome::Queued
            }
            Err(()) => {
                self.stats.inc_dropped();
                SubmitOutcome::Dropped
            }
        }
    }
}
