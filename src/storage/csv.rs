//! CSV sample store.
use super::SampleStore;
use crate::error::{IngestError, IngestResult};
use crate::ingest::{DedupKey, RecentKeySet};
use crate::sample::Sample;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Appends samples to a session CSV file.
///
/// Duplicate rows are skipped as long as their key is among the recently written ones.
/// The key memory is bounded the same way as the worker's filter.
pub struct CsvStore {
    path: PathBuf,
    writer: csv::Writer<File>,
    written: RecentKeySet,
}

impl CsvStore {
    /// Creates `<dir>/session_<UTC timestamp>.csv` and writes the header.
    pub fn create_in(dir: impl AsRef<Path>) -> IngestResult<Self> {
        let file_name = format!("session_{}.csv", Utc::now().format("%Y%m%d_%H%M%S"));
        let dir = dir.as_ref();
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
        Self::create(dir.join(file_name))
    }

    /// Creates (or truncates) the file at `path` and writes the header.
    pub fn create(path: impl Into<PathBuf>) -> IngestResult<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| {
            IngestError::Persistence(format!("Failed to create CSV file {}: {e}", path.display()))
        })?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["time", "timestamp", "signal_id", "value"])?;
        tracing::info!("CSV store writing to '{}'", path.display());

        Ok(Self {
            path,
            writer,
            written: RecentKeySet::default(),
        })
    }

    /// Caps how many written keys are remembered for duplicate detection.
    #[must_use]
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.written = RecentKeySet::new(capacity);
        self
    }

    /// Path of the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of keys currently remembered.
    pub fn remembered_keys(&self) -> usize {
        self.written.len()
    }
}

#[async_trait]
impl SampleStore for CsvStore {
    async fn insert_batch(&mut self, samples: &[Sample]) -> IngestResult<usize> {
        let mut inserted = 0;
        for sample in samples {
            let key = DedupKey::new(sample.signal_id.clone(), sample.time, sample.value);
            if !self.written.insert(key) {
                continue;
            }
            let timestamp = Utc
                .timestamp_millis_opt(sample.time)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            self.writer.write_record(&[
                sample.time.to_string(),
                timestamp,
                sample.signal_id.to_string(),
                sample.value.to_string(),
            ])?;
            inserted += 1;
        }
        self.writer.flush()?;
        Ok(inserted)
    }

    async fn flush(&mut self) -> IngestResult<()> {
        self.writer.flush()?;
        tracing::info!("CSV store flushed.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_header_and_skips_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CsvStore::create_in(dir.path()).unwrap();

        let rows = vec![
            Sample::new("rpm", 1_700_000_000_000, 900.0),
            Sample::new("rpm", 1_700_000_000_000, 900.0),
            Sample::new("rpm", 1_700_000_000_001, 901.5),
        ];
        assert_eq!(store.insert_batch(&rows).await.unwrap(), 2);

        let contents = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "time,timestamp,signal_id,value");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].ends_with("rpm,901.5"));
    }

    #[tokio::test]
    async fn duplicate_memory_stays_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CsvStore::create(dir.path().join("bounded.csv"))
            .unwrap()
            .with_dedup_capacity(4);

        for batch in 0..10 {
            let rows: Vec<Sample> = (0..3)
                .map(|n| Sample::new("vibration", batch * 3 + n, 1.0))
                .collect();
            assert_eq!(store.insert_batch(&rows).await.unwrap(), 3);
            assert!(store.remembered_keys() <= 4);
        }

        // Recent rows are still recognised.
        let recent = [Sample::new("vibration", 29, 1.0)];
        assert_eq!(store.insert_batch(&recent).await.unwrap(), 0);

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents.lines().count(), 31);
    }
}
