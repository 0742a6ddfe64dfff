//! Contract tests for hand-built WebSocket frames and the inbound decoder.

use bytes::BytesMut;
use fleet_broker::bridge::frame::{
    apply_mask, close_frame, encode_frame, text_frame, FrameDecoder, Message, Opcode,
};
use tokio_util::codec::Decoder;

const MASK: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];

fn unmask(frame: &[u8], header_len: usize) -> Vec<u8> {
    let mut key = [0u8; 4];
    key.copy_from_slice(&frame[header_len - 4..header_len]);
    let mut payload = frame[header_len..].to_vec();
    apply_mask(&mut payload, key);
    payload
}

/// Server-side (unmasked) frame.
fn server_frame(first: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![first];
    let len = payload.len();
    if len < 126 {
        frame.push(u8::try_from(len).unwrap());
    } else if let Ok(medium) = u16::try_from(len) {
        frame.push(126);
        frame.extend_from_slice(&medium.to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&u64::try_from(len).unwrap().to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

#[test]
fn short_text_frame_layout() {
    let frame = encode_frame(Opcode::Text, b"hi", MASK);
    assert_eq!(frame.len(), 8);
    assert_eq!(frame[0], 0x81);
    assert_eq!(frame[1], 0x82);
    assert_eq!(&frame[2..6], &MASK);
    assert_eq!(frame[6], b'h' ^ MASK[0]);
    assert_eq!(frame[7], b'i' ^ MASK[1]);
}

#[test]
fn medium_payload_uses_16_bit_length() {
    let payload = vec![b'x'; 130];
    let frame = encode_frame(Opcode::Text, &payload, MASK);
    assert_eq!(frame[0], 0x81);
    assert_eq!(frame[1], 0x80 | 126);
    assert_eq!(&frame[2..4], &[0x00, 0x82]);
    assert_eq!(frame.len(), 2 + 2 + 4 + 130);
    assert_eq!(unmask(&frame, 8), payload);
}

#[test]
fn boundary_lengths_pick_the_right_form() {
    assert_eq!(encode_frame(Opcode::Text, &[0; 125], MASK)[1], 0x80 | 125);
    assert_eq!(encode_frame(Opcode::Text, &[0; 126], MASK)[1], 0x80 | 126);
    assert_eq!(encode_frame(Opcode::Text, &[0; 65535], MASK)[1], 0x80 | 126);
    assert_eq!(encode_frame(Opcode::Text, &[0; 65536], MASK)[1], 0x80 | 127);
}

#[test]
fn large_payload_uses_64_bit_length() {
    let payload = vec![b'y'; 70_000];
    let frame = encode_frame(Opcode::Text, &payload, MASK);
    assert_eq!(frame[1], 0x80 | 127);
    let mut len = [0u8; 8];
    len.copy_from_slice(&frame[2..10]);
    assert_eq!(u64::from_be_bytes(len), 70_000);
    assert_eq!(frame.len(), 2 + 8 + 4 + 70_000);
    assert_eq!(unmask(&frame, 14), payload);
}

#[test]
fn text_frame_is_masked_and_recoverable() {
    let frame = text_frame(r#"{"type":"BEACON"}"#);
    assert_eq!(frame[0], 0x81);
    assert_ne!(frame[1] & 0x80, 0, "client frames must be masked");
    assert_eq!(unmask(&frame, 6), br#"{"type":"BEACON"}"#);
}

#[test]
fn close_frame_carries_status_code() {
    let frame = close_frame(1001);
    assert_eq!(frame[0], 0x88);
    assert_eq!(frame[1], 0x82);
    assert_eq!(unmask(&frame, 6), 1001u16.to_be_bytes());
}

#[test]
fn decoder_reads_unmasked_text() {
    let mut decoder = FrameDecoder::new(1024);
    let mut buf = BytesMut::from(&server_frame(0x81, b"hello")[..]);
    let msg = decoder.decode(&mut buf).expect("decode");
    assert_eq!(msg, Some(Message::Text("hello".into())));
    assert!(buf.is_empty());
}

#[test]
fn decoder_reads_masked_text() {
    let mut decoder = FrameDecoder::new(1024);
    let mut buf = BytesMut::from(&encode_frame(Opcode::Text, b"masked", MASK)[..]);
    let msg = decoder.decode(&mut buf).expect("decode");
    assert_eq!(msg, Some(Message::Text("masked".into())));
}

#[test]
fn decoder_waits_for_complete_frame() {
    let mut decoder = FrameDecoder::new(1024);
    let frame = server_frame(0x81, &[b'z'; 200]);
    let mut buf = BytesMut::from(&frame[..3]);
    assert_eq!(decoder.decode(&mut buf).expect("partial header"), None);
    buf.extend_from_slice(&frame[3..100]);
    assert_eq!(decoder.decode(&mut buf).expect("partial payload"), None);
    buf.extend_from_slice(&frame[100..]);
    let msg = decoder.decode(&mut buf).expect("decode").expect("complete");
    assert_eq!(msg, Message::Text("z".repeat(200)));
}

#[test]
fn decoder_reassembles_fragments_around_a_ping() {
    let mut decoder = FrameDecoder::new(1024);
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&server_frame(0x01, b"hel"));
    buf.extend_from_slice(&server_frame(0x89, b"p"));
    buf.extend_from_slice(&server_frame(0x80, b"lo"));

    let first = decoder.decode(&mut buf).expect("decode").expect("ping");
    assert_eq!(first, Message::Ping(bytes::Bytes::from_static(b"p")));
    let second = decoder.decode(&mut buf).expect("decode").expect("text");
    assert_eq!(second, Message::Text("hello".into()));
}

#[test]
fn decoder_reads_two_frames_from_one_buffer() {
    let mut decoder = FrameDecoder::new(1024);
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&server_frame(0x81, b"a"));
    buf.extend_from_slice(&server_frame(0x81, b"b"));
    assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Message::Text("a".into())));
    assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Message::Text("b".into())));
    assert_eq!(decoder.decode(&mut buf).unwrap(), None);
}

#[test]
fn decoder_reads_close_with_and_without_code() {
    let mut decoder = FrameDecoder::new(1024);
    let mut buf = BytesMut::from(&server_frame(0x88, &1000u16.to_be_bytes())[..]);
    assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Message::Close(Some(1000))));
    let mut buf = BytesMut::from(&server_frame(0x88, b"")[..]);
    assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Message::Close(None)));
}

#[test]
fn decoder_rejects_oversized_frame_from_header() {
    let mut decoder = FrameDecoder::new(16);
    // Only the header is present; the size check must not wait for the body.
    let mut buf = BytesMut::from(&[0x82u8, 126, 0x10, 0x00][..]);
    assert!(decoder.decode(&mut buf).is_err());
}

#[test]
fn decoder_rejects_oversized_fragmented_message() {
    let mut decoder = FrameDecoder::new(8);
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&server_frame(0x01, b"12345"));
    buf.extend_from_slice(&server_frame(0x80, b"67890"));
    assert!(decoder.decode(&mut buf).is_err());
}

#[test]
fn decoder_rejects_protocol_violations() {
    let cases: [&[u8]; 5] = [
        &[0xC1, 0x00],             // RSV1 set
        &[0x83, 0x00],             // reserved opcode
        &[0x80, 0x01, b'x'],       // continuation with nothing to continue
        &[0x09, 0x00],             // fragmented ping
        &[0x81, 0x02, 0xFF, 0xFE], // text that is not UTF-8
    ];
    for bytes in cases {
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(bytes);
        assert!(decoder.decode(&mut buf).is_err(), "accepted {bytes:02x?}");
    }
}

#[test]
fn decoder_passes_binary_through() {
    let mut decoder = FrameDecoder::new(1024);
    let mut buf = BytesMut::from(&server_frame(0x82, &[0, 1, 2])[..]);
    assert_eq!(
        decoder.decode(&mut buf).unwrap(),
        Some(Message::Binary(bytes::Bytes::from_static(&[0, 1, 2])))
    );
}

#[test]
fn opcode_wire_values_round_trip() {
    for opcode in [
        Opcode::Continuation,
        Opcode::Text,
        Opcode::Binary,
        Opcode::Close,
        Opcode::Ping,
        Opcode::Pong,
    ] {
        assert_eq!(Opcode::from_u8(opcode.as_u8()), Some(opcode));
    }
    assert_eq!(Opcode::from_u8(0x3), None);
    assert!(Opcode::Ping.is_control());
    assert!(!Opcode::Text.is_control());
}
