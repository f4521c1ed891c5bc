use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::checksum::body_checksum;
use crate::error::{FrameError, Result};

/// Byte that opens every frame.
pub const START_MARKER: u8 = 0x7E;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Start marker + length byte.
pub const HEADER_SIZE: usize = 2;

/// Little-endian CRC16.
pub const TRAILER_SIZE: usize = 2;

/// Wire size of a frame carrying `payload_len` bytes.
pub const fn frame_size(payload_len: usize) -> usize {
    HEADER_SIZE + payload_len + TRAILER_SIZE
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬──────────────────┬──────────────┐
/// │ Start    │ Length   │ Payload          │ CRC16        │
/// │ 0x7E     │ (1B)     │ (Length bytes)   │ (2B LE)      │
/// └──────────┴──────────┴──────────────────┴──────────────┘
/// ```
///
/// The CRC covers `Length || Payload`. Nothing is written to `dst` when the
/// payload is too large.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = u8::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: MAX_PAYLOAD,
    })?;
    dst.reserve(frame_size(payload.len()));
    dst.put_u8(START_MARKER);
    dst.put_u8(length);
    dst.put_slice(payload);
    dst.put_u16_le(body_checksum(length, payload));
    Ok(())
}

/// Build a standalone frame for `payload`.
pub fn build_frame(payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(frame_size(payload.len()));
    encode_frame(payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Validate the bytes that follow a start marker (`length || payload || crc`)
/// and return the payload.
pub fn parse_frame(raw: &[u8]) -> Result<Bytes> {
    let Some((&length, rest)) = raw.split_first() else {
        return Err(FrameError::LengthMismatch {
            declared: 0,
            actual: 0,
        });
    };
    let declared = usize::from(length);
    if rest.len() != declared + TRAILER_SIZE {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: rest.len().saturating_sub(TRAILER_SIZE),
        });
    }

    let (payload, trailer) = rest.split_at(declared);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    let computed = body_checksum(length, payload);
    if received != computed {
        return Err(FrameError::ChecksumMismatch { computed, received });
    }
    Ok(Bytes::copy_from_slice(payload))
}

/// Outcome of consuming one frame-sized span from a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A frame whose checksum verified.
    Frame(Bytes),
    /// A frame-shaped span that failed validation and was dropped.
    Corrupt { length: u8, computed: u16, received: u16 },
}

impl Decoded {
    /// Bytes this outcome consumed from the buffer (marker included).
    pub fn wire_size(&self) -> usize {
        match self {
            Decoded::Frame(payload) => frame_size(payload.len()),
            Decoded::Corrupt { length, .. } => frame_size(usize::from(*length)),
        }
    }
}

/// Decode the next frame from a receive buffer, resynchronising on noise.
///
/// Everything before the first start marker is discarded; a buffer holding no
/// marker at all is cleared. Returns `None` when more bytes are needed, leaving
/// the partial frame (from its marker on) in `src`. A span whose checksum fails
/// is consumed and reported as [`Decoded::Corrupt`] so the caller can keep
/// scanning.
pub fn decode_frame(src: &mut BytesMut) -> Option<Decoded> {
    match src.iter().position(|&b| b == START_MARKER) {
        Some(0) => {}
        Some(idx) => src.advance(idx),
        None => {
            src.clear();
            return None;
        }
    }

    if src.len() < HEADER_SIZE {
        return None; // Need the length byte
    }

    let length = src[1];
    let total = frame_size(usize::from(length));
    if src.len() < total {
        return None; // Need more data
    }

    let span = src.split_to(total);
    match parse_frame(&span[1..]) {
        Ok(payload) => Some(Decoded::Frame(payload)),
        Err(FrameError::ChecksumMismatch { computed, received }) => Some(Decoded::Corrupt {
            length,
            computed,
            received,
        }),
        // The span was cut to exactly the declared size, so only the checksum can fail.
        Err(_) => Some(Decoded::Corrupt {
            length,
            computed: 0,
            received: 0,
        }),
    }
}
