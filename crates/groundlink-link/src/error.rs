use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while validating construction-time configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required field is absent.
    #[error("{section} config missing key: '{field}'")]
    Missing {
        section: &'static str,
        field: &'static str,
    },

    /// A field is present but has the wrong type or an out-of-range value.
    #[error("{section} config has invalid '{field}': {reason}")]
    Invalid {
        section: &'static str,
        field: &'static str,
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A radio property table does not describe the expected command set.
    #[error("radio config {path}: {reason}")]
    RadioProperties { path: PathBuf, reason: String },
}

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Hardware-level error.
    #[error("hardware error: {0}")]
    Hal(#[from] groundlink_hal::HalError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] groundlink_frame::FrameError),

    /// Configuration rejected at construction.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A packet in a transmit batch is empty or too large; nothing was queued.
    #[error("packet {index} has invalid size {size} (expected 1..={max})")]
    InvalidPacket {
        index: usize,
        size: usize,
        max: usize,
    },

    /// The radio never reported clear-to-send during initialisation.
    #[error("radio not ready after {stage} (waited {timeout:?})")]
    HandshakeTimeout {
        stage: &'static str,
        timeout: Duration,
    },

    /// The transport has been shut down.
    #[error("{0} has been shut down")]
    Shutdown(&'static str),

    /// `shutdown` was called a second time.
    #[error("{0} is already shut down")]
    AlreadyShutdown(&'static str),
}

pub type Result<T> = std::result::Result<T, LinkError>;
