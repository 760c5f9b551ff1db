//! Custom error types for the ingestion pipeline.
//!
//! This module defines the primary error type, `IngestError`, for the whole crate and the
//! per-frame `FrameError` raised by the protocol decoder. Using the `thiserror` crate, it
//! provides a centralized and consistent way to handle the different kinds of failures the
//! pipeline can hit, from configuration problems to socket and persistence errors.
//!
//! ## Error Hierarchy
//!
//! - **Connection errors** (`Io`, `ConnectionTimeout`, `ConnectionClosed`): never escape to
//!   callers of `send`/`send_sequence`. The connection actor routes them into its reconnect
//!   state machine unless the link was closed manually.
//! - **`FrameError`**: isolated to the frame that produced it. The decoder logs it and keeps
//!   decoding the rest of the chunk.
//! - **`Persistence`**: reported to whoever submitted the batch, as a `BatchOutcome`. The
//!   ingestion queue keeps going.
//! - **`Config`** / **`Configuration`**: raised at startup while loading and validating the
//!   configuration file.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Socket or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `connect` was given no endpoints.
    #[error("Endpoint list is empty")]
    NoEndpoints,

    /// The requested endpoint index is past the end of the list.
    #[error("Endpoint index {index} is out of range ({len} endpoints configured)")]
    EndpointIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of endpoints.
        len: usize,
    },

    /// The handshake did not complete in time.
    #[error("Connection to {0} timed out")]
    ConnectionTimeout(String),

    /// A manual disconnect ended a pending connect.
    #[error("Connection closed before the handshake completed")]
    ConnectionClosed,

    /// The connection task has stopped.
    #[error("Connection actor is no longer running")]
    ConnectionActorStopped,

    /// A single frame failed to decode.
    #[error("Frame decode error: {0}")]
    Frame(#[from] FrameError),

    /// The store rejected a write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The ingestion worker has stopped.
    #[error("Ingestion worker is no longer running")]
    WorkerStopped,
}

impl From<figment::Error> for IngestError {
    fn from(value: figment::Error) -> Self {
        Self::Config(Box::new(value))
    }
}

#[cfg(feature = "storage_csv")]
impl From<csv::Error> for IngestError {
    fn from(value: csv::Error) -> Self {
        Self::Persistence(value.to_string())
    }
}

/// Failure to decode a single delimiter-bounded frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame does not begin with the delimiter.
    #[error("frame does not start with the CD EF delimiter")]
    MissingDelimiter,

    /// The frame is shorter than its fixed header.
    #[error("frame truncated: need at least {needed} bytes, got {actual}")]
    Truncated {
        /// Header length.
        needed: usize,
        /// Frame length.
        actual: usize,
    },

    /// The frame length differs from what its header declares.
    #[error("frame length mismatch: header declares {declared} bytes, frame has {actual}")]
    LengthMismatch {
        /// Length from the header.
        declared: usize,
        /// Frame length.
        actual: usize,
    },

    /// A reading is NaN or infinite.
    #[error("frame contains a non-finite value on channel {channel}")]
    NonFiniteValue {
        /// Wire channel of the reading.
        channel: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_error_converts_into_ingest_error() {
        let err: IngestError = FrameError::MissingDelimiter.into();
        assert!(matches!(err, IngestError::Frame(FrameError::MissingDelimiter)));
        assert!(err.to_string().contains("CD EF"));
    }

    #[test]
    fn index_error_mentions_bounds() {
        let err = IngestError::EndpointIndexOutOfRange { index: 3, len: 2 };
        assert_eq!(
            err.to_string(),
            "Endpoint index 3 is out of range (2 endpoints configured)"
        );
    }
}
