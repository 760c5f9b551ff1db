//! Sample ingestion: deduplication, resampling and hand-off to storage.
pub mod dedup;
pub mod resample;
pub mod worker;

pub use dedup::{DedupKey, RecentKeySet, DEFAULT_DEDUP_CAPACITY};
pub use resample::{pad_to_target, rounded_time_step, ResampleConfig, Resampler};
pub use worker::{BatchOutcome, IngestHandle, IngestWorker, WorkerConfig, WorkerStats};
