use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{EventQueue, IngestStats};
use crate::config::TrackingConfig;
use crate::models::Event;
use crate::storage::CounterStore;

/// One consumer of the event queue.
///
/// Workers in a pool share the receiver; whoever holds the lock takes the
/// next event, then releases it before touching the store.
struct IngestWorker {
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Event>>>,
    store: Arc<dyn CounterStore>,
    store_timeout: Duration,
    stats: Arc<IngestStats>,
}

impl IngestWorker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = self.id, "ingest worker started");

        while let Some(event) = self.next_event(&mut shutdown).await {
            self.apply(event).await;
        }

        debug!(worker = self.id, "ingest worker stopped");
    }

    /// Next queued event, or None once the queue is closed and empty.
    async fn next_event(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Event> {
        let mut rx = self.receiver.lock().await;

        if *shutdown.borrow() {
            rx.close();
            return rx.recv().await;
        }

        tokio::select! {
            event = rx.recv() => event,
            _ = shutdown.changed() => {
                // Stop accepting, keep draining what is already buffered
                rx.close();
                rx.recv().await
            }
        }
    }

    async fn apply(&self, event: Event) {
        match tokio::time::timeout(self.store_timeout, self.store.record(&event)).await {
            Ok(Ok(())) => {
                self.stats.inc_applied();
                trace!(
                    worker = self.id,
                    object_id = %event.object_id,
                    visitor_id = %event.visitor_id,
                    "event recorded"
                );
            }
            Ok(Err(e)) => {
                self.stats.inc_failed();
                warn!(
                    worker = self.id,
                    object_id = %event.object_id,
                    error = %e,
                    "failed to record event, dropping"
                );
            }
            Err(_) => {
                self.stats.inc_failed();
                warn!(
                    worker = self.id,
                    object_id = %event.object_id,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "timed out recording event, dropping"
                );
            }
        }
    }
}

/// Owns the event queue and its worker pool.
///
/// Dropping the pipeline without calling `shutdown` also stops the workers
/// after they drain the queue, but nothing waits for them.
pub struct IngestPipeline {
    queue: EventQueue,
    stats: Arc<IngestStats>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl IngestPipeline {
    /// Create the queue and spawn the workers. Must run inside a tokio runtime.
    pub fn start(store: Arc<dyn CounterStore>, config: &TrackingConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let worker_count = config.workers.max(1);

        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(IngestStats::default());
        let receiver = Arc::new(Mutex::new(rx));

        let workers = (0..worker_count)
            .map(|id| {
                let worker = IngestWorker {
                    id,
                    receiver: Arc::clone(&receiver),
                    store: Arc::clone(&store),
                    store_timeout: config.store_timeout(),
                    stats: Arc::clone(&stats),
                };
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect();

        info!(
            capacity,
            workers = worker_count,
            policy = ?config.queue_full_policy,
            "ingest pipeline started"
        );

        Self {
            queue: EventQueue::new(tx, config.queue_full_policy, Arc::clone(&stats)),
            stats,
            shutdown_tx,
            workers,
        }
    }

    /// Producer handle for request handlers
    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Close the queue, apply everything still buffered, and wait for the workers.
    pub async fn shutdown(self) {
        info!("Shutdown signal received, draining ingest queue...");
        let _ = self.shutdown_tx.send(true);

        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("ingest worker panicked: {}", e);
            }
        }

        let stats = self.stats.snapshot();
        info!(
            enqueued = stats.enqueued,
            applied = stats.applied,
            failed = stats.failed,
            dropped = stats.dropped,
            "ingest pipeline stopped"
        );
    }
}
