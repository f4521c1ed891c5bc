use std::path::PathBuf;

/// Errors that can occur while talking to hardware.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// Failed to open a device node (serial port, SPI device, GPIO line).
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The serial backend rejected the port or one of its settings.
    #[error("serial port error on {port}: {source}")]
    Serial {
        port: String,
        source: serialport::Error,
    },

    /// The requested line setting is not supported by the backend.
    #[error("unsupported setting {setting}: {detail}")]
    Unsupported {
        setting: &'static str,
        detail: String,
    },

    /// An I/O error occurred on an open device.
    #[error("hardware I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The exclusive resource is already held by another handle.
    #[error("{resource} is already allocated")]
    AlreadyAllocated { resource: String },

    /// A GPIO backend operation failed.
    #[error("gpio {pin}: {detail}")]
    Gpio { pin: u64, detail: String },

    /// An SPI backend operation failed.
    #[error("spi device {path}: {detail}")]
    Spi { path: PathBuf, detail: String },
}

pub type Result<T> = std::result::Result<T, HalError>;

impl embedded_hal::digital::Error for HalError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

impl embedded_hal::spi::Error for HalError {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}
