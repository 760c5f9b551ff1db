//! Integration tests for chunk framing and decoding.

use board_ingest::protocol::{
    encode_data_frame, encode_status_frame, split_frames, BoardPayloadDecoder, DecodedFrame,
    FrameDecoder,
};
use board_ingest::sample::SignalId;
use std::collections::HashMap;

const T0: i64 = 1_700_000_000_000;

fn data_frame(board_time: i64, entries: &[(u16, i64, f32)]) -> Vec<u8> {
    encode_data_frame(0x01, board_time, entries)
}

#[test]
fn test_n_frames_yield_n_results_in_order() {
    let mut chunk = Vec::new();
    chunk.extend(encode_status_frame(&[true, true]));
    chunk.extend(data_frame(T0, &[(1, T0, 900.0)]));
    chunk.extend(data_frame(T0 + 10, &[(1, T0 + 10, 901.5), (2, T0 + 10, 85.25)]));
    chunk.extend(encode_status_frame(&[true, false]));

    let decoded = FrameDecoder::default().decode_chunk(&chunk);
    assert_eq!(decoded.len(), 4);

    assert!(matches!(&decoded[0], DecodedFrame::Status(s) if s.online_count() == 2));
    match &decoded[2] {
        DecodedFrame::Data(frame) => {
            assert_eq!(frame.board_time, Some(T0 + 10));
            assert_eq!(frame.readings.len(), 2);
        }
        other => panic!("expected data frame, got {other:?}"),
    }
    assert!(matches!(&decoded[3], DecodedFrame::Status(s) if s.online_count() == 1));
}

#[test]
fn test_malformed_frame_is_isolated() {
    let good = data_frame(T0, &[(1, T0, 1.0)]);
    let mut truncated = data_frame(T0 + 1, &[(1, T0 + 1, 2.0), (2, T0 + 1, 3.0)]);
    truncated.truncate(truncated.len() - 5);

    let mut chunk = Vec::new();
    chunk.extend(&good);
    chunk.extend(&truncated);
    chunk.extend(&good);

    let decoded = FrameDecoder::default().decode_chunk(&chunk);
    assert_eq!(decoded.len(), 2, "only the truncated frame is dropped");
}

#[test]
fn test_frame_split_across_reads_is_lost() {
    let frame = data_frame(T0, &[(1, T0, 1.0), (2, T0, 2.0)]);
    let next = data_frame(T0 + 20, &[(1, T0 + 20, 4.0)]);
    let (head, tail) = frame.split_at(9);

    let decoder = FrameDecoder::default();
    assert!(decoder.decode_chunk(head).is_empty());

    let mut second = tail.to_vec();
    second.extend(&next);
    let (frames, skipped) = split_frames(&second);
    assert_eq!(skipped, tail.len());
    assert_eq!(frames.len(), 1);

    let decoded = decoder.decode_chunk(&second);
    assert_eq!(decoded.len(), 1);
    assert!(matches!(&decoded[0], DecodedFrame::Data(f) if f.board_time == Some(T0 + 20)));
}

#[test]
fn test_chunk_without_delimiter_yields_nothing() {
    let decoded = FrameDecoder::default().decode_chunk(&[0x01, 0x02, 0x03, 0xCD]);
    assert!(decoded.is_empty());
}

#[test]
fn test_configured_signal_names() {
    let mut signals = HashMap::new();
    signals.insert(1u16, SignalId::new("engine_rpm"));
    let decoder = FrameDecoder::new(BoardPayloadDecoder::with_signals(signals));

    let chunk = data_frame(T0, &[(1, T0, 900.0), (7, T0, 1.0)]);
    let decoded = decoder.decode_chunk(&chunk);
    let DecodedFrame::Data(frame) = &decoded[0] else {
        panic!("expected data frame");
    };

    let names: Vec<&str> = frame.readings.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(names, vec!["engine_rpm", "ch7"]);
}

#[test]
fn test_zero_board_time_means_unstamped() {
    let chunk = data_frame(0, &[(1, T0, 5.0)]);
    let decoded = FrameDecoder::default().decode_chunk(&chunk);
    assert!(matches!(&decoded[0], DecodedFrame::Data(f) if f.board_time.is_none()));
}

#[test]
fn test_delimiter_bytes_inside_payload_keep_every_frame() {
    // Little-endian 0xEFCD puts `CD EF` on the wire inside the timestamp fields.
    let tricky = (T0 & !0xFFFF) | 0xEFCD;

    let mut chunk = Vec::new();
    chunk.extend(data_frame(tricky, &[(1, tricky, 1.0)]));
    chunk.extend(encode_status_frame(&[true]));
    chunk.extend(data_frame(T0, &[(1, T0, 2.0), (2, tricky, 3.0)]));

    let decoded = FrameDecoder::default().decode_chunk(&chunk);
    assert_eq!(decoded.len(), 3);
    match &decoded[0] {
        DecodedFrame::Data(frame) => {
            assert_eq!(frame.board_time, Some(tricky));
            assert_eq!(frame.readings[0].1.time, tricky);
        }
        other => panic!("expected data frame, got {other:?}"),
    }
    assert!(matches!(&decoded[1], DecodedFrame::Status(_)));
    assert!(matches!(&decoded[2], DecodedFrame::Data(f) if f.readings.len() == 2));
}
