//! Sample types shared by the decoder, the connection actor and the ingestion worker.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable identifier of a measurement channel.
///
/// Cheap to clone: batches carry the same identifier on every sample of a burst.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(Arc<str>);

impl SignalId {
    /// Creates a signal identifier from any string-like value.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Fallback identifier for a board channel that has no configured name.
    pub fn from_channel(channel: u16) -> Self {
        Self::new(format!("ch{channel}"))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SignalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A value stamped with epoch milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    /// Epoch milliseconds.
    pub time: i64,
    /// Reading.
    pub value: f64,
}

/// A sample as submitted to the ingestion worker.
///
/// `time` may be absent when a producer could not stamp the sample; such samples are
/// dropped during deduplication.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    /// Signal the reading belongs to.
    pub signal_id: SignalId,
    /// Epoch milliseconds, if the producer had a clock.
    #[serde(default)]
    pub time: Option<i64>,
    /// Reading.
    pub value: f64,
}

impl RawSample {
    /// Creates a stamped sample.
    pub fn new(signal_id: impl Into<SignalId>, time: i64, value: f64) -> Self {
        Self {
            signal_id: signal_id.into(),
            time: Some(time),
            value,
        }
    }

    /// Creates a sample without a timestamp.
    pub fn unstamped(signal_id: impl Into<SignalId>, value: f64) -> Self {
        Self {
            signal_id: signal_id.into(),
            time: None,
            value,
        }
    }
}

/// A stamped sample, as produced by the resampler and handed to storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Signal the reading belongs to.
    pub signal_id: SignalId,
    /// Epoch milliseconds after resampling.
    pub time: i64,
    /// Reading.
    pub value: f64,
}

impl Sample {
    /// Creates a stamped sample.
    pub fn new(signal_id: impl Into<SignalId>, time: i64, value: f64) -> Self {
        Self {
            signal_id: signal_id.into(),
            time,
            value,
        }
    }
}

/// Ordered samples from one decode pass. Order follows frame arrival order.
pub type SampleBatch = Vec<RawSample>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_sample_accepts_missing_time() {
        let json = r#"[{"signalId":"rpm","time":1000,"value":1.5},{"signalId":"rpm","value":2.0}]"#;
        let batch: SampleBatch = serde_json::from_str(json).unwrap();

        assert_eq!(batch[0], RawSample::new("rpm", 1000, 1.5));
        assert_eq!(batch[1].time, None);
    }

    #[test]
    fn channel_fallback_name() {
        assert_eq!(SignalId::from_channel(7).as_str(), "ch7");
    }
}
