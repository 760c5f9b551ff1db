//! # Board Ingest Core Library
//!
//! This crate ingests telemetry from data-acquisition boards that stream binary frames over
//! TCP. It keeps a single socket alive to the active board, splits the byte stream into
//! frames, decodes board health and sensor readings, and feeds them to live consumers and
//! to a sequential ingestion worker that deduplicates, resamples and persists samples.
//!
//! ## Crate Structure
//!
//! - **`connection`**: The connection actor and its `ConnectionHandle`. Owns the socket and
//!   the connect-timeout, watchdog and reconnect-backoff state machine.
//! - **`protocol`**: Frame splitting on the `CD EF` delimiter and payload decoding behind the
//!   `PayloadDecoder` trait.
//! - **`sinks`**: Traits for the consumers of decoded data (health, history, live stream,
//!   sample batches) and their channel-backed implementations.
//! - **`ingest`**: The ingestion worker, the bounded recent-key set and the resampler.
//! - **`storage`**: The `SampleStore` trait with in-memory and CSV backends.
//! - **`config`**: Figment-based configuration loading and validation.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`error`**: The crate-wide `IngestError` and the per-frame `FrameError`.
//! - **`sample`**: Signal identifiers and sample types shared by every stage.

pub mod config;
pub mod connection;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod protocol;
pub mod sample;
pub mod sinks;
pub mod storage;

pub use connection::{BoardEndpoint, ConnectionBuilder, ConnectionHandle, ConnectionState};
pub use error::{FrameError, IngestError, IngestResult};
pub use ingest::{BatchOutcome, IngestHandle, IngestWorker};
pub use sample::{RawSample, Sample, SignalId};
