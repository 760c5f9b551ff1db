//! Persistence of resampled samples.
//!
//! Stores take whole batches and silently skip samples they already hold, the way a
//! bulk insert with "ignore duplicates" behaves on a database with a unique key.
use crate::error::IngestResult;
use crate::ingest::DedupKey;
use crate::sample::Sample;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "storage_csv")]
pub mod csv;

#[cfg(feature = "storage_csv")]
pub use self::csv::CsvStore;

/// Trait for a sample persistence backend.
#[async_trait]
pub trait SampleStore: Send {
    /// Inserts a batch, skipping exact duplicates. Returns the number of rows written.
    async fn insert_batch(&mut self, samples: &[Sample]) -> IngestResult<usize>;

    /// Pushes buffered rows to the backing medium.
    async fn flush(&mut self) -> IngestResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SampleStore for Box<dyn SampleStore> {
    async fn insert_batch(&mut self, samples: &[Sample]) -> IngestResult<usize> {
        (**self).insert_batch(samples).await
    }

    async fn flush(&mut self) -> IngestResult<()> {
        (**self).flush().await
    }
}

#[derive(Default)]
struct MemoryInner {
    rows: Vec<Sample>,
    keys: HashSet<DedupKey>,
    batches: Vec<usize>,
}

/// In-memory store. Clones share the same rows, so a test can keep one clone to inspect
/// what the worker persisted.
///
/// ```
/// use board_ingest::sample::Sample;
/// use board_ingest::storage::{MemoryStore, SampleStore};
///
/// # tokio_test::block_on(async {
/// let view = MemoryStore::new();
/// let mut store = view.clone();
/// store.insert_batch(&[Sample::new("rpm", 1, 900.0)]).await.unwrap();
/// assert_eq!(view.len(), 1);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored rows in insertion order.
    pub fn rows(&self) -> Vec<Sample> {
        self.inner.lock().rows.clone()
    }

    /// Rows written by each insert call, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().batches.clone()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().rows.is_empty()
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn insert_batch(&mut self, samples: &[Sample]) -> IngestResult<usize> {
        let mut inner = self.inner.lock();
        let mut inserted = 0;
        for sample in samples {
            let key = DedupKey::new(sample.signal_id.clone(), sample.time, sample.value);
            if inner.keys.insert(key) {
                inner.rows.push(sample.clone());
                inserted += 1;
            }
        }
        inner.batches.push(inserted);
        Ok(inserted)
    }
}
