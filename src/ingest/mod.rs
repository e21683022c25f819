//! Asynchronous event ingestion
//!
//! The pixel handler submits events onto a bounded queue and returns; a
//! fixed pool of workers drains the queue and applies each event to the
//! counter store. Delivery is best effort: an event that fails or times out
//! is logged, counted and dropped.

pub mod queue;
pub mod worker;

pub use queue::{EventQueue, SubmitOutcome};
pub use worker::IngestPipeline;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the queue and the workers
#[derive(Debug, Default)]
pub struct IngestStats {
    enqueued: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub enqueued: u64,
    pub applied: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl IngestStats {
    pub(crate) fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
