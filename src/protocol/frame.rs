//! Delimiter framing and frame classification.
use super::payload::{BoardPayloadDecoder, BoardStatus, DataFrame, PayloadDecoder};
use super::{DELIMITER, STATUS_MARKER};
use crate::error::FrameError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Frame class, decided from the first three bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `CD EF ED ...`
    Status,
    /// Everything else.
    Data,
}

impl FrameKind {
    /// Classifies a delimiter-prefixed frame.
    pub fn of(frame: &[u8]) -> Self {
        if frame.len() >= 3 && frame[..2] == DELIMITER && frame[2] == STATUS_MARKER {
            FrameKind::Status
        } else {
            FrameKind::Data
        }
    }
}

/// A classified and decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// Board health report.
    Status(BoardStatus),
    /// Signal readings.
    Data(DataFrame),
}

/// Splits a chunk into delimiter-prefixed frames.
///
/// Each frame runs from one delimiter up to the next delimiter or the end of the chunk.
/// Bytes before the first delimiter are not part of any frame and are skipped; the
/// number of skipped bytes is returned alongside the frames.
pub fn split_frames(chunk: &[u8]) -> (Vec<&[u8]>, usize) {
    let starts = delimiter_offsets(chunk);
    let skipped = starts.first().copied().unwrap_or(chunk.len());
    let frames = (0..starts.len())
        .map(|n| &chunk[starts[n]..candidate_end(chunk, &starts, n + 1)])
        .collect();

    (frames, skipped)
}

fn delimiter_offsets(chunk: &[u8]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + DELIMITER.len() <= chunk.len() {
        if chunk[i..i + DELIMITER.len()] == DELIMITER {
            starts.push(i);
            i += DELIMITER.len();
        } else {
            i += 1;
        }
    }
    starts
}

/// End of the candidate frame that stops before delimiter number `next`.
fn candidate_end(chunk: &[u8], starts: &[usize], next: usize) -> usize {
    starts.get(next).copied().unwrap_or(chunk.len())
}

/// Stateless chunk decoder.
///
/// Nothing is carried between calls: a frame split across two socket reads is lost
/// (its head fails to decode, its tail is skipped as leading bytes of the next chunk).
#[derive(Clone)]
pub struct FrameDecoder {
    payload: Arc<dyn PayloadDecoder>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(BoardPayloadDecoder::new())
    }
}

impl FrameDecoder {
    /// Creates a decoder around a payload layout.
    pub fn new(payload: impl PayloadDecoder + 'static) -> Self {
        Self {
            payload: Arc::new(payload),
        }
    }

    /// Decodes a single frame.
    pub fn decode_frame(&self, frame: &[u8]) -> Result<DecodedFrame, FrameError> {
        match FrameKind::of(frame) {
            FrameKind::Status => self.payload.decode_status(frame).map(DecodedFrame::Status),
            FrameKind::Data => self.payload.decode_data(frame).map(DecodedFrame::Data),
        }
    }

    /// Decodes every frame of a chunk, in arrival order.
    ///
    /// A candidate shorter than the length its header declares is joined with the
    /// candidates that follow it, as long as that lands exactly on the declared length.
    /// This recovers frames whose payload happens to contain the delimiter. Malformed
    /// frames are logged and skipped; they never abort the chunk.
    pub fn decode_chunk(&self, chunk: &[u8]) -> Vec<DecodedFrame> {
        let starts = delimiter_offsets(chunk);
        let skipped = starts.first().copied().unwrap_or(chunk.len());
        if skipped > 0 {
            debug!(skipped, "Discarding bytes before first frame delimiter");
        }

        let mut decoded = Vec::with_capacity(starts.len());
        let mut n = 0;
        while n < starts.len() {
            let start = starts[n];
            let next = self.rejoin(chunk, &starts, n);
            let frame = &chunk[start..candidate_end(chunk, &starts, next)];
            match self.decode_frame(frame) {
                Ok(result) => decoded.push(result),
                Err(e) => warn!(offset = start, len = frame.len(), error = %e, "Dropping malformed frame"),
            }
            n = next;
        }
        decoded
    }

    /// Index of the first delimiter after the frame starting at delimiter `n`.
    fn rejoin(&self, chunk: &[u8], starts: &[usize], n: usize) -> usize {
        let start = starts[n];
        let Some(declared) = self.payload.frame_len(&chunk[start..]) else {
            return n + 1;
        };

        let mut next = n + 1;
        while candidate_end(chunk, starts, next) - start < declared && next < starts.len() {
            next += 1;
        }
        if next > n + 1 && candidate_end(chunk, starts, next) - start == declared {
            debug!(offset = start, joined = next - n, "Delimiter bytes inside frame payload");
            next
        } else {
            n + 1
        }
    }
}
