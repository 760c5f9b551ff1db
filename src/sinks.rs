//! Collaborators fed by the connection actor.
//!
//! The actor does not know who consumes board status, history, live updates or sample
//! batches. Each consumer sits behind a small trait so the daemon can wire real
//! implementations and tests can wire channels.
//!
//! ```text
//! socket → FrameDecoder ─┬─ Status ──────────────→ BoardHealthSink
//!                        └─ Data ─┬─ HistoryEntry → HistoryRecorder
//!                                 ├─ LiveMessage  → StreamPublisher
//!                                 └─ SampleBatch  → BatchSink (ingestion worker)
//! ```

use crate::protocol::BoardStatus;
use crate::sample::{SampleBatch, SignalId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// One history record per decoded data frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Frame time in epoch ms.
    pub time: i64,
    /// Latest value per signal in the frame.
    pub data: BTreeMap<SignalId, f64>,
}

/// Message pushed to live display consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "UPPERCASE")]
pub enum LiveMessage {
    /// Latest value per signal, stamped according to the configured clock source.
    Data {
        /// Epoch milliseconds.
        time: i64,
        /// Latest value per signal.
        values: BTreeMap<SignalId, f64>,
    },
    /// Human-readable connection notice (e.g. reconnecting).
    Notification(String),
}

/// Receives decoded board status.
pub trait BoardHealthSink: Send + Sync {
    /// Replaces the last known status.
    fn update_status(&self, status: BoardStatus);
}

/// Receives one entry per data frame carrying a timestamp.
pub trait HistoryRecorder: Send + Sync {
    /// Appends one entry.
    fn record(&self, entry: HistoryEntry);
}

/// Receives live updates and notifications.
pub trait StreamPublisher: Send + Sync {
    /// Pushes one message to live consumers.
    fn publish(&self, message: LiveMessage);
}

/// Receives raw sample batches for dedup, resampling and storage.
pub trait BatchSink: Send + Sync {
    /// Queues a batch. Never blocks and never fails.
    fn submit_batch(&self, batch: SampleBatch);
}

impl BoardHealthSink for watch::Sender<Option<BoardStatus>> {
    fn update_status(&self, status: BoardStatus) {
        self.send_replace(Some(status));
    }
}

impl StreamPublisher for broadcast::Sender<LiveMessage> {
    fn publish(&self, message: LiveMessage) {
        // No subscribers is normal when no display is attached.
        let _ = self.send(message);
    }
}

impl StreamPublisher for mpsc::UnboundedSender<LiveMessage> {
    fn publish(&self, message: LiveMessage) {
        let _ = self.send(message);
    }
}

impl HistoryRecorder for mpsc::UnboundedSender<HistoryEntry> {
    fn record(&self, entry: HistoryEntry) {
        let _ = self.send(entry);
    }
}

impl BatchSink for mpsc::UnboundedSender<SampleBatch> {
    fn submit_batch(&self, batch: SampleBatch) {
        let _ = self.send(batch);
    }
}

/// A thread-safe, fixed-capacity history buffer. Oldest entries are evicted first.
#[derive(Clone)]
pub struct HistoryBuffer {
    entries: Arc<Mutex<VecDeque<HistoryEntry>>>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// Empty buffer keeping the latest `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entry is held.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copies the buffered entries, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl HistoryRecorder for HistoryBuffer {
    fn record(&self, entry: HistoryEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

/// The set of collaborators a connection dispatches to. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Receives status frames.
    pub health: Option<Arc<dyn BoardHealthSink>>,
    /// Receives history entries.
    pub history: Option<Arc<dyn HistoryRecorder>>,
    /// Receives live updates and notifications.
    pub publisher: Option<Arc<dyn StreamPublisher>>,
    /// Receives sample batches.
    pub batches: Option<Arc<dyn BatchSink>>,
}

impl Collaborators {
    /// No collaborators wired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires the status sink.
    pub fn with_health(mut self, sink: impl BoardHealthSink + 'static) -> Self {
        self.health = Some(Arc::new(sink));
        self
    }

    /// Wires the history recorder.
    pub fn with_history(mut self, recorder: impl HistoryRecorder + 'static) -> Self {
        self.history = Some(Arc::new(recorder));
        self
    }

    /// Wires the live publisher.
    pub fn with_publisher(mut self, publisher: impl StreamPublisher + 'static) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    /// Wires the batch sink.
    pub fn with_batches(mut self, sink: impl BatchSink + 'static) -> Self {
        self.batches = Some(Arc::new(sink));
        self
    }

    pub(crate) fn notify(&self, text: impl Into<String>) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(LiveMessage::Notification(text.into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(time: i64) -> HistoryEntry {
        HistoryEntry {
            time,
            data: BTreeMap::new(),
        }
    }

    #[test]
    fn history_buffer_evicts_oldest() {
        let buffer = HistoryBuffer::new(2);
        buffer.record(entry(1));
        buffer.record(entry(2));
        buffer.record(entry(3));

        let times: Vec<i64> = buffer.snapshot().iter().map(|e| e.time).collect();
        assert_eq!(times, vec![2, 3]);
    }

    #[test]
    fn live_message_wire_shape() {
        let mut values = BTreeMap::new();
        values.insert(SignalId::new("rpm"), 900.0);
        let json = serde_json::to_value(LiveMessage::Data { time: 5, values }).unwrap();

        assert_eq!(json["type"], "DATA");
        assert_eq!(json["message"]["values"]["rpm"], 900.0);

        let note = serde_json::to_value(LiveMessage::Notification("x".into())).unwrap();
        assert_eq!(note["type"], "NOTIFICATION");
    }

    #[test]
    fn watch_sink_keeps_latest_status() {
        let (tx, rx) = watch::channel(None);
        tx.update_status(BoardStatus::default());
        assert_eq!(*rx.borrow(), Some(BoardStatus::default()));
    }
}
