//! Start-marker framing for half-duplex serial links.
//!
//! Every message is framed with:
//! - A `0x7E` start marker for resynchronisation
//! - A 1-byte payload length (0..=255)
//! - A 2-byte little-endian CRC16/MODBUS over length and payload
//!
//! Receivers skip noise up to the next marker and drop frames whose checksum
//! fails, so callers only ever see payloads that verified.

pub mod checksum;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use checksum::{body_checksum, checksum, CRC16};
pub use codec::{
    build_frame, decode_frame, encode_frame, frame_size, parse_frame, Decoded, HEADER_SIZE,
    MAX_PAYLOAD, START_MARKER, TRAILER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::{FrameReader, ReaderStats};
pub use writer::FrameWriter;
