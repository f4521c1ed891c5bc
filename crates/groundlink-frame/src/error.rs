/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit the one-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame body is shorter or longer than its length byte declares.
    #[error("frame length mismatch (declared {declared} payload bytes, got {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The trailing CRC16 does not match the frame body.
    #[error("checksum mismatch (computed 0x{computed:04X}, received 0x{received:04X})")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached end of file.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
