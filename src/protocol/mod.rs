//! Board wire protocol.
//!
//! The board streams frames over TCP, each introduced by the 2-byte delimiter `CD EF`.
//! A frame whose third byte is `ED` carries board status; every other frame carries
//! signal readings.
pub mod frame;
pub mod payload;

pub use frame::{split_frames, DecodedFrame, FrameDecoder, FrameKind};
pub use payload::{
    encode_data_frame, encode_status_frame, BoardPayloadDecoder, BoardState, BoardStatus,
    DataFrame, PayloadDecoder,
};

/// Frame delimiter.
pub const DELIMITER: [u8; 2] = [0xCD, 0xEF];

/// Third byte of a status frame.
pub const STATUS_MARKER: u8 = 0xED;
