//! Board payload layouts.
//!
//! The exact field layout of status and data frames belongs to the board firmware. The
//! decoder only depends on the [`PayloadDecoder`] trait; [`BoardPayloadDecoder`] is the
//! layout shipped with the acquisition boards we talk to:
//!
//! ```text
//! status: CD EF ED | n: u8 | n x online: u8
//! data:   CD EF | kind: u8 (!= ED) | board_time: i64 LE | n: u16 LE |
//!         n x (channel: u16 LE, time: i64 LE, value: f32 LE)
//! ```
//!
//! All multi-byte fields are little-endian. A frame must be exactly as long as its header
//! declares. Payload bytes are not escaped, so `CD EF` can occur inside a frame; the
//! declared length is what lets the chunk decoder put such a frame back together.

use super::{DELIMITER, STATUS_MARKER};
use crate::error::FrameError;
use crate::sample::{RawSample, SignalId, TimedValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const STATUS_HEADER_LEN: usize = 4;
const DATA_HEADER_LEN: usize = 13;
const DATA_ENTRY_LEN: usize = 14;

/// Decodes the payload of an already-classified frame.
///
/// Implementations receive the whole frame, delimiter included.
pub trait PayloadDecoder: Send + Sync {
    /// Decodes a frame starting with `CD EF ED`.
    fn decode_status(&self, frame: &[u8]) -> Result<BoardStatus, FrameError>;

    /// Decodes any other frame.
    fn decode_data(&self, frame: &[u8]) -> Result<DataFrame, FrameError>;

    /// Length the header of the frame at the start of `bytes` declares, if the layout has
    /// one and enough header bytes are present. `bytes` runs to the end of the chunk.
    fn frame_len(&self, _bytes: &[u8]) -> Option<usize> {
        None
    }
}

/// Health of a single acquisition board slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    /// Position in the status frame.
    pub slot: u8,
    /// Whether the board reports itself online.
    pub online: bool,
}

/// Decoded status frame.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardStatus {
    /// One entry per slot, in wire order.
    pub boards: Vec<BoardState>,
}

impl BoardStatus {
    /// Number of slots reporting online.
    pub fn online_count(&self) -> usize {
        self.boards.iter().filter(|b| b.online).count()
    }
}

/// Decoded data frame: signal readings in wire order.
#[derive(Clone, Debug, PartialEq)]
pub struct DataFrame {
    /// Board clock at frame emission, epoch ms. `None` when the board clock is not set.
    pub board_time: Option<i64>,
    /// Readings in wire order.
    pub readings: Vec<(SignalId, TimedValue)>,
}

impl DataFrame {
    /// Latest value per signal. Later readings of the same signal win.
    pub fn values(&self) -> BTreeMap<SignalId, f64> {
        self.readings
            .iter()
            .map(|(id, tv)| (id.clone(), tv.value))
            .collect()
    }

    /// Flattens the frame into worker input samples.
    pub fn samples(&self) -> impl Iterator<Item = RawSample> + '_ {
        self.readings
            .iter()
            .map(|(id, tv)| RawSample::new(id.clone(), tv.time, tv.value))
    }
}

/// Default payload layout. Maps wire channel numbers to configured signal ids.
#[derive(Clone, Debug, Default)]
pub struct BoardPayloadDecoder {
    signals: HashMap<u16, SignalId>,
}

impl BoardPayloadDecoder {
    /// Decoder that names every channel `ch<N>`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder with a channel → signal name table.
    pub fn with_signals(signals: HashMap<u16, SignalId>) -> Self {
        Self { signals }
    }

    fn signal_for(&self, channel: u16) -> SignalId {
        self.signals
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| SignalId::from_channel(channel))
    }
}

impl PayloadDecoder for BoardPayloadDecoder {
    fn frame_len(&self, bytes: &[u8]) -> Option<usize> {
        if !bytes.starts_with(&DELIMITER) || bytes.len() < 3 {
            return None;
        }
        if bytes[2] == STATUS_MARKER {
            bytes
                .get(3)
                .map(|count| STATUS_HEADER_LEN + *count as usize)
        } else {
            let count = u16::from_le_bytes([*bytes.get(11)?, *bytes.get(12)?]) as usize;
            Some(DATA_HEADER_LEN + count * DATA_ENTRY_LEN)
        }
    }

    fn decode_status(&self, frame: &[u8]) -> Result<BoardStatus, FrameError> {
        check_delimiter(frame)?;
        if frame.len() < STATUS_HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: STATUS_HEADER_LEN,
                actual: frame.len(),
            });
        }

        let count = frame[3] as usize;
        let declared = STATUS_HEADER_LEN + count;
        if frame.len() != declared {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: frame.len(),
            });
        }

        let boards = frame[STATUS_HEADER_LEN..]
            .iter()
            .enumerate()
            .map(|(slot, flag)| BoardState {
                slot: slot as u8,
                online: *flag != 0,
            })
            .collect();

        Ok(BoardStatus { boards })
    }

    fn decode_data(&self, frame: &[u8]) -> Result<DataFrame, FrameError> {
        check_delimiter(frame)?;
        if frame.len() < DATA_HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: DATA_HEADER_LEN,
                actual: frame.len(),
            });
        }

        let board_time = read_i64(&frame[3..11]);
        let count = u16::from_le_bytes([frame[11], frame[12]]) as usize;
        let declared = DATA_HEADER_LEN + count * DATA_ENTRY_LEN;
        if frame.len() != declared {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: frame.len(),
            });
        }

        let mut readings = Vec::with_capacity(count);
        for entry in frame[DATA_HEADER_LEN..].chunks_exact(DATA_ENTRY_LEN) {
            let channel = u16::from_le_bytes([entry[0], entry[1]]);
            let time = read_i64(&entry[2..10]);
            let value = f32::from_le_bytes([entry[10], entry[11], entry[12], entry[13]]);
            if !value.is_finite() {
                return Err(FrameError::NonFiniteValue { channel });
            }
            readings.push((
                self.signal_for(channel),
                TimedValue {
                    time,
                    value: f64::from(value),
                },
            ));
        }

        Ok(DataFrame {
            board_time: (board_time > 0).then_some(board_time),
            readings,
        })
    }
}

fn check_delimiter(frame: &[u8]) -> Result<(), FrameError> {
    if frame.starts_with(&DELIMITER) {
        Ok(())
    } else {
        Err(FrameError::MissingDelimiter)
    }
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_le_bytes(buf)
}

/// Encodes a status frame in the default layout. Used by simulators and tests.
pub fn encode_status_frame(online: &[bool]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(STATUS_HEADER_LEN + online.len());
    buf.extend_from_slice(&DELIMITER);
    buf.push(STATUS_MARKER);
    buf.push(online.len() as u8);
    buf.extend(online.iter().map(|o| u8::from(*o)));
    buf
}

/// Encodes a data frame in the default layout. Entries are `(channel, time, value)`.
pub fn encode_data_frame(kind: u8, board_time: i64, entries: &[(u16, i64, f32)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DATA_HEADER_LEN + entries.len() * DATA_ENTRY_LEN);
    buf.extend_from_slice(&DELIMITER);
    buf.push(kind);
    buf.extend_from_slice(&board_time.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (channel, time, value) in entries {
        buf.extend_from_slice(&channel.to_le_bytes());
        buf.extend_from_slice(&time.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}
