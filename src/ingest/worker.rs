//! Ingestion worker actor.
//!
//! The worker owns the dedup set, the resampler anchor and the store. It runs on its own
//! task and is reachable only through [`IngestHandle`], so all of that state has exactly
//! one writer and needs no locking.
//!
//! # Message Flow
//!
//! ```text
//! producer                        worker task
//! --------                        -----------
//! submit(batch) ──unbounded mpsc──> recv (FIFO)
//!                                  dedup → resample → store.insert_batch
//! await outcome <──oneshot──────── BatchOutcome
//! ```
//!
//! Batches are handled strictly one after another: the next batch is only taken off the
//! queue once the previous one has been stored or has failed. A failed insert is reported
//! and the batch is dropped; the queue keeps going.

use super::dedup::RecentKeySet;
use super::resample::{ResampleConfig, Resampler};
use crate::error::{IngestError, IngestResult};
use crate::sample::SampleBatch;
use crate::sinks::BatchSink;
use crate::storage::SampleStore;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of processing one submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch reached storage. `queue_drained` is set when no other batch was waiting.
    Stored {
        /// Rows the store reported as new.
        inserted: usize,
        /// No other batch was waiting when this one finished.
        queue_drained: bool,
    },
    /// Storage rejected the batch. The batch is not retried.
    Failed {
        /// Store error text.
        message: String,
    },
}

impl BatchOutcome {
    /// Whether the batch reached storage.
    pub fn is_stored(&self) -> bool {
        matches!(self, BatchOutcome::Stored { .. })
    }
}

/// Worker tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Capacity of the recent-key set.
    pub dedup_capacity: usize,
    /// Resampler tunables.
    pub resample: ResampleConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: super::dedup::DEFAULT_DEDUP_CAPACITY,
            resample: ResampleConfig::default(),
        }
    }
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Batches taken off the queue.
    pub batches: u64,
    /// Batches the store rejected.
    pub failed_batches: u64,
    /// Samples received.
    pub samples_in: u64,
    /// Samples removed as duplicates or for lacking a timestamp.
    pub samples_dropped: u64,
    /// Samples the store reported as inserted.
    pub samples_stored: u64,
}

struct Job {
    batch: SampleBatch,
    reply: Option<oneshot::Sender<BatchOutcome>>,
}

/// Cloneable sender side of the worker queue.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl IngestHandle {
    /// Queues a batch and returns a receiver for its outcome.
    pub fn submit(&self, batch: SampleBatch) -> IngestResult<oneshot::Receiver<BatchOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job {
                batch,
                reply: Some(reply),
            })
            .map_err(|_| IngestError::WorkerStopped)?;
        Ok(rx)
    }

    /// Queues a batch without tracking its outcome.
    pub fn submit_detached(&self, batch: SampleBatch) -> IngestResult<()> {
        self.tx
            .send(Job { batch, reply: None })
            .map_err(|_| IngestError::WorkerStopped)
    }

    /// Queues a batch and waits for it to be processed.
    pub async fn submit_and_wait(&self, batch: SampleBatch) -> IngestResult<BatchOutcome> {
        self.submit(batch)?
            .await
            .map_err(|_| IngestError::WorkerStopped)
    }

    /// Whether the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl BatchSink for IngestHandle {
    fn submit_batch(&self, batch: SampleBatch) {
        if let Err(e) = self.submit_detached(batch) {
            warn!(error = %e, "Dropping sample batch");
        }
    }
}

/// The worker itself. Construct with [`IngestWorker::spawn`].
pub struct IngestWorker<S> {
    rx: mpsc::UnboundedReceiver<Job>,
    dedup: RecentKeySet,
    resampler: Resampler,
    store: S,
    stats: WorkerStats,
}

impl<S: SampleStore + 'static> IngestWorker<S> {
    /// Spawns the worker task. It stops once every handle has been dropped and the queue
    /// is empty, flushing the store on the way out.
    pub fn spawn(config: WorkerConfig, store: S) -> (IngestHandle, JoinHandle<WorkerStats>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            rx,
            dedup: RecentKeySet::new(config.dedup_capacity),
            resampler: Resampler::new(config.resample),
            store,
            stats: WorkerStats::default(),
        };
        (IngestHandle { tx }, tokio::spawn(worker.run()))
    }

    async fn run(mut self) -> WorkerStats {
        info!("Ingestion worker started");
        while let Some(job) = self.rx.recv().await {
            let outcome = self.process(job.batch).await;
            if let Some(reply) = job.reply {
                let _ = reply.send(outcome);
            }
        }

        if let Err(e) = self.store.flush().await {
            error!(error = %e, "Failed to flush sample store on shutdown");
        }
        info!(
            batches = self.stats.batches,
            stored = self.stats.samples_stored,
            "Ingestion worker stopped"
        );
        self.stats
    }

    async fn process(&mut self, batch: SampleBatch) -> BatchOutcome {
        self.stats.batches += 1;
        let received = batch.len();
        self.stats.samples_in += received as u64;

        let unique = self.dedup.filter_batch(batch);
        self.stats.samples_dropped += (received - unique.len()) as u64;

        let resampled = self.resampler.resample_batch(unique);
        debug!(
            received,
            kept = resampled.len(),
            anchor = ?self.resampler.last_time(),
            "Batch deduplicated and resampled"
        );

        match self.store.insert_batch(&resampled).await {
            Ok(inserted) => {
                self.stats.samples_stored += inserted as u64;
                BatchOutcome::Stored {
                    inserted,
                    queue_drained: self.rx.is_empty(),
                }
            }
            Err(e) => {
                self.stats.failed_batches += 1;
                error!(error = %e, samples = resampled.len(), "Failed to store batch");
                BatchOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}
