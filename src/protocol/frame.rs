//! Binary media framing
//!
//! Every media frame travels as one binary WebSocket message:
//!
//! ```text
//! +---------+------------------------+-------------------+
//! | Kind(1) | Length(4, big-endian)  | Payload(Length)   |
//! +---------+------------------------+-------------------+
//!   0 = video (JPEG), 1 = audio (PCM16)
//! ```
//!
//! The header is built once per produced frame and the resulting `Bytes`
//! is shared by reference count across every viewer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::media::{FrameKind, MediaFrame};

use super::constants::FRAME_HEADER_SIZE;

/// A binary message decoded off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    /// Media kind from the header
    pub kind: FrameKind,
    /// Payload, sliced from the received message without copying
    pub payload: Bytes,
}

/// Build the 5-byte header for a payload of `len` bytes
pub fn encode_header(kind: FrameKind, len: u32) -> [u8; FRAME_HEADER_SIZE] {
    let len = len.to_be_bytes();
    [kind.as_byte(), len[0], len[1], len[2], len[3]]
}

/// Encode a media frame into a complete wire message
///
/// Fails if the payload exceeds `max_payload` (or cannot be described by a
/// 32-bit length).
pub fn encode(frame: &MediaFrame, max_payload: usize) -> Result<Bytes, ProtocolError> {
    let size = frame.payload.len();
    if size > max_payload || size > u32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: max_payload,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + size);
    buf.put_slice(&encode_header(frame.kind, size as u32));
    buf.put_slice(&frame.payload);
    Ok(buf.freeze())
}

/// Decode one binary message
///
/// Messages under 5 bytes, with a declared length larger than what follows
/// the header, with a payload over `max_payload`, or with an unknown kind
/// byte are rejected. Bytes trailing the declared payload are ignored.
pub fn decode(data: Bytes, max_payload: usize) -> Result<WireFrame, ProtocolError> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(ProtocolError::FrameTooShort(data.len()));
    }

    let mut buf = data;
    let kind_byte = buf.get_u8();
    let declared = buf.get_u32();

    if declared as usize > buf.remaining() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            available: buf.remaining(),
        });
    }
    if declared as usize > max_payload {
        return Err(ProtocolError::FrameTooLarge {
            size: declared as usize,
            max: max_payload,
        });
    }

    let kind = FrameKind::from_byte(kind_byte).ok_or(ProtocolError::UnknownFrameKind(kind_byte))?;
    let payload = buf.split_to(declared as usize);

    Ok(WireFrame { kind, payload })
}
