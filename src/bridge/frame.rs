//! WebSocket frame building and decoding (RFC 6455, client role).
//!
//! Outbound frames are built by hand with [`encode_frame`]: a single
//! unfragmented frame, always masked with a fresh random key, using the
//! 7-bit, 16-bit or 64-bit length form as the payload requires.
//!
//! Inbound frames are decoded by [`FrameDecoder`], a
//! [`tokio_util::codec::Decoder`] that reassembles fragmented data
//! messages and enforces a maximum message size before buffering.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

const FIN: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;
const MAX_CONTROL_PAYLOAD: usize = 125;

/// Close code sent when the broker shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text.
    Text,
    /// Binary data.
    Binary,
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl Opcode {
    /// Four-bit wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Decode a four-bit wire value.
    #[must_use]
    pub const fn from_u8(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Whether this is a control opcode (close, ping, pong).
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
    /// Ping with application data.
    Ping(Bytes),
    /// Pong with application data.
    Pong(Bytes),
    /// Close, with the status code if one was sent.
    Close(Option<u16>),
}

/// Build one masked, unfragmented frame.
#[must_use]
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(14 + len);
    frame.push(FIN | opcode.as_u8());

    match (u8::try_from(len), u16::try_from(len)) {
        (Ok(short), _) if short < LEN_16 => frame.push(MASK_BIT | short),
        (_, Ok(medium)) => {
            frame.push(MASK_BIT | LEN_16);
            frame.extend_from_slice(&medium.to_be_bytes());
        }
        _ => {
            frame.push(MASK_BIT | LEN_64);
            let long = u64::try_from(len).unwrap_or(u64::MAX);
            frame.extend_from_slice(&long.to_be_bytes());
        }
    }

    frame.extend_from_slice(&mask);
    let start = frame.len();
    frame.extend_from_slice(payload);
    apply_mask(&mut frame[start..], mask);
    frame
}

/// Build a masked text frame with a fresh random key.
#[must_use]
pub fn text_frame(text: &str) -> Vec<u8> {
    encode_frame(Opcode::Text, text.as_bytes(), random_mask())
}

/// Build a masked close frame carrying `code`.
#[must_use]
pub fn close_frame(code: u16) -> Vec<u8> {
    encode_frame(Opcode::Close, &code.to_be_bytes(), random_mask())
}

/// Fresh random masking key.
#[must_use]
pub fn random_mask() -> [u8; 4] {
    rand::random()
}

/// XOR `data` in place with the repeating 4-byte `mask`.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Parsed frame header.
#[derive(Debug)]
struct Header {
    fin: bool,
    opcode: Opcode,
    mask: Option<[u8; 4]>,
    header_len: usize,
    payload_len: usize,
}

/// Inbound frame decoder with fragment reassembly.
#[derive(Debug)]
pub struct FrameDecoder {
    max_message_bytes: usize,
    partial: Option<(Opcode, BytesMut)>,
}

impl FrameDecoder {
    /// Create a decoder that rejects messages larger than `max_message_bytes`.
    #[must_use]
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            max_message_bytes,
            partial: None,
        }
    }
}

impl Decoder for FrameDecoder {
    type Item = Message;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            let Some(header) = parse_header(src)? else {
                return Ok(None);
            };
            if header.payload_len > self.max_message_bytes {
                return Err(AppError::Bridge(format!(
                    "frame too large: {} > {} bytes",
                    header.payload_len, self.max_message_bytes
                )));
            }

            let total = header.header_len + header.payload_len;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            src.advance(header.header_len);
            let mut payload = src.split_to(header.payload_len);
            if let Some(mask) = header.mask {
                apply_mask(&mut payload, mask);
            }

            if header.opcode.is_control() {
                if !header.fin || header.payload_len > MAX_CONTROL_PAYLOAD {
                    return Err(AppError::Bridge("malformed control frame".into()));
                }
                return Ok(Some(control_message(header.opcode, payload.freeze())));
            }

            let (opcode, body) = match header.opcode {
                Opcode::Continuation => {
                    let Some((opcode, mut body)) = self.partial.take() else {
                        return Err(AppError::Bridge("unexpected continuation frame".into()));
                    };
                    if body.len() + payload.len() > self.max_message_bytes {
                        return Err(AppError::Bridge(format!(
                            "fragmented message exceeds {} bytes",
                            self.max_message_bytes
                        )));
                    }
                    body.extend_from_slice(&payload);
                    (opcode, body)
                }
                opcode => {
                    if self.partial.is_some() {
                        return Err(AppError::Bridge(
                            "new data frame inside a fragmented message".into(),
                        ));
                    }
                    (opcode, payload)
                }
            };

            if header.fin {
                return data_message(opcode, body).map(Some);
            }
            self.partial = Some((opcode, body));
        }
    }
}

fn parse_header(src: &BytesMut) -> Result<Option<Header>> {
    if src.len() < 2 {
        return Ok(None);
    }
    let (b0, b1) = (src[0], src[1]);
    if b0 & RSV_BITS != 0 {
        return Err(AppError::Bridge("reserved bits set without extension".into()));
    }
    let opcode = Opcode::from_u8(b0 & OPCODE_BITS)
        .ok_or_else(|| AppError::Bridge(format!("unknown opcode {:#x}", b0 & OPCODE_BITS)))?;

    let masked = b1 & MASK_BIT != 0;
    let (ext_len, payload_len) = match b1 & LEN_BITS {
        LEN_16 => {
            if src.len() < 4 {
                return Ok(None);
            }
            (2, u64::from(u16::from_be_bytes([src[2], src[3]])))
        }
        LEN_64 => {
            if src.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&src[2..10]);
            (8, u64::from_be_bytes(raw))
        }
        short => (0, u64::from(short)),
    };

    let mask_offset = 2 + ext_len;
    let header_len = mask_offset + if masked { 4 } else { 0 };
    if src.len() < header_len {
        return Ok(None);
    }
    let mask = masked.then(|| {
        let mut key = [0u8; 4];
        key.copy_from_slice(&src[mask_offset..header_len]);
        key
    });

    let payload_len = usize::try_from(payload_len)
        .map_err(|_| AppError::Bridge("frame length does not fit in memory".into()))?;

    Ok(Some(Header {
        fin: b0 & FIN != 0,
        opcode,
        mask,
        header_len,
        payload_len,
    }))
}

fn control_message(opcode: Opcode, payload: Bytes) -> Message {
    match opcode {
        Opcode::Ping => Message::Ping(payload),
        Opcode::Pong => Message::Pong(payload),
        _ => {
            let code = (payload.len() >= 2).then(|| u16::from_be_bytes([payload[0], payload[1]]));
            Message::Close(code)
        }
    }
}

fn data_message(opcode: Opcode, body: BytesMut) -> Result<Message> {
    match opcode {
        Opcode::Text => String::from_utf8(body.to_vec())
            .map(Message::Text)
            .map_err(|e| AppError::Bridge(format!("text frame is not utf-8: {e}"))),
        _ => Ok(Message::Binary(body.freeze())),
    }
}
