//! Integration tests for the ingestion worker queue.

use async_trait::async_trait;
use board_ingest::error::{IngestError, IngestResult};
use board_ingest::ingest::{BatchOutcome, IngestWorker, WorkerConfig};
use board_ingest::sample::{RawSample, Sample};
use board_ingest::sinks::BatchSink;
use board_ingest::storage::{MemoryStore, SampleStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const T0: i64 = 1_700_000_000_000;
const WAIT: Duration = Duration::from_secs(5);

/// Store that sleeps on every insert and records the order of batches.
struct SlowStore {
    delay: Duration,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SampleStore for SlowStore {
    async fn insert_batch(&mut self, samples: &[Sample]) -> IngestResult<usize> {
        tokio::time::sleep(self.delay).await;
        if let Some(first) = samples.first() {
            self.seen.lock().push(first.signal_id.to_string());
        }
        Ok(samples.len())
    }
}

/// Store that rejects any batch containing the signal `bad`.
struct PickyStore {
    inner: MemoryStore,
}

#[async_trait]
impl SampleStore for PickyStore {
    async fn insert_batch(&mut self, samples: &[Sample]) -> IngestResult<usize> {
        if samples.iter().any(|s| s.signal_id.as_str() == "bad") {
            return Err(IngestError::Persistence("unique constraint violated".into()));
        }
        self.inner.insert_batch(samples).await
    }
}

#[tokio::test]
async fn test_duplicates_store_once() {
    let store = MemoryStore::new();
    let (handle, worker) = IngestWorker::spawn(WorkerConfig::default(), store.clone());

    let batch = vec![
        RawSample::new("rpm", T0, 900.0),
        RawSample::new("rpm", T0, 900.0),
    ];
    let outcome = handle.submit_and_wait(batch.clone()).await.unwrap();
    assert_eq!(
        outcome,
        BatchOutcome::Stored {
            inserted: 1,
            queue_drained: true
        }
    );

    // Seen again in a later batch: filtered before storage.
    let outcome = handle.submit_and_wait(batch).await.unwrap();
    assert!(matches!(outcome, BatchOutcome::Stored { inserted: 0, .. }));

    drop(handle);
    let stats = timeout(WAIT, worker).await.unwrap().unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(stats.samples_in, 4);
    assert_eq!(stats.samples_dropped, 3);
}

#[tokio::test]
async fn test_unstamped_samples_are_dropped() {
    let store = MemoryStore::new();
    let (handle, _worker) = IngestWorker::spawn(WorkerConfig::default(), store.clone());

    let outcome = handle
        .submit_and_wait(vec![
            RawSample::unstamped("rpm", 1.0),
            RawSample::new("rpm", T0, 2.0),
        ])
        .await
        .unwrap();

    assert!(outcome.is_stored());
    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, 2.0);
}

#[tokio::test]
async fn test_batches_processed_in_fifo_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = SlowStore {
        delay: Duration::from_millis(30),
        seen: seen.clone(),
    };
    let (handle, worker) = IngestWorker::spawn(WorkerConfig::default(), store);

    let mut receivers = Vec::new();
    for n in 0..5 {
        let batch = vec![RawSample::new(format!("s{n}").as_str(), T0 + n, n as f64)];
        receivers.push(handle.submit(batch).unwrap());
    }

    let mut outcomes = Vec::new();
    for rx in receivers {
        outcomes.push(timeout(WAIT, rx).await.unwrap().unwrap());
    }

    assert_eq!(*seen.lock(), vec!["s0", "s1", "s2", "s3", "s4"]);
    // Only the last batch finds the queue empty.
    assert!(matches!(
        outcomes.last(),
        Some(BatchOutcome::Stored {
            queue_drained: true,
            ..
        })
    ));
    assert!(matches!(
        outcomes.first(),
        Some(BatchOutcome::Stored {
            queue_drained: false,
            ..
        })
    ));

    drop(handle);
    let stats = timeout(WAIT, worker).await.unwrap().unwrap();
    assert_eq!(stats.batches, 5);
}

#[tokio::test]
async fn test_failed_batch_reported_and_queue_continues() {
    let inner = MemoryStore::new();
    let store = PickyStore {
        inner: inner.clone(),
    };
    let (handle, worker) = IngestWorker::spawn(WorkerConfig::default(), store);

    let failed = handle.submit(vec![RawSample::new("bad", T0, 1.0)]).unwrap();
    let stored = handle.submit(vec![RawSample::new("good", T0, 1.0)]).unwrap();

    match timeout(WAIT, failed).await.unwrap().unwrap() {
        BatchOutcome::Failed { message } => assert!(message.contains("unique constraint")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(timeout(WAIT, stored).await.unwrap().unwrap().is_stored());
    assert_eq!(inner.len(), 1);

    drop(handle);
    let stats = timeout(WAIT, worker).await.unwrap().unwrap();
    assert_eq!(stats.failed_batches, 1);
}

#[tokio::test]
async fn test_recent_key_overflow_forgets_old_keys() {
    let store = MemoryStore::new();
    let config = WorkerConfig {
        dedup_capacity: 2,
        ..WorkerConfig::default()
    };
    let (handle, _worker) = IngestWorker::spawn(config, store.clone());

    let a = RawSample::new("a", T0, 1.0);
    let b = RawSample::new("b", T0, 1.0);
    let c = RawSample::new("c", T0, 1.0);

    handle.submit_and_wait(vec![a.clone(), b]).await.unwrap();
    // Set full: inserting `c` resets it, so `a` is unknown again.
    handle.submit_and_wait(vec![c]).await.unwrap();
    let outcome = handle.submit_and_wait(vec![a]).await.unwrap();

    // The worker lets it through; the store's own uniqueness still holds.
    assert!(matches!(outcome, BatchOutcome::Stored { inserted: 0, .. }));
    assert_eq!(store.len(), 3);
    assert_eq!(store.batch_sizes(), vec![2, 1, 0]);
}

#[tokio::test]
async fn test_large_bursts_merge_in_time_order() {
    let store = MemoryStore::new();
    let (handle, _worker) = IngestWorker::spawn(WorkerConfig::default(), store.clone());

    let mut batch: Vec<RawSample> = (0..600)
        .map(|i| RawSample::new("vibration", T0 + i, i as f64))
        .collect();
    batch.extend((0..20).map(|i| RawSample::new("rpm", T0 + i * 30, 900.0 + i as f64)));

    let outcome = handle.submit_and_wait(batch).await.unwrap();
    assert!(matches!(outcome, BatchOutcome::Stored { inserted: 1020, .. }));

    let rows = store.rows();
    assert!(rows.windows(2).all(|w| w[0].time <= w[1].time));
    let vibration: Vec<&Sample> = rows
        .iter()
        .filter(|s| s.signal_id.as_str() == "vibration")
        .collect();
    assert_eq!(vibration.len(), 1000);
    assert_eq!(vibration.last().map(|s| s.time), Some(T0 + 599));
}

#[tokio::test]
async fn test_batch_sink_after_worker_stops() {
    let (handle, worker) = IngestWorker::spawn(WorkerConfig::default(), MemoryStore::new());
    worker.abort();
    let _ = worker.await;

    assert!(handle.is_closed());
    assert!(matches!(
        handle.submit(vec![RawSample::new("a", T0, 1.0)]),
        Err(IngestError::WorkerStopped)
    ));
    // Sink form never panics.
    handle.submit_batch(vec![RawSample::new("a", T0, 1.0)]);
}
