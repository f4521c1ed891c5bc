use std::fmt;
use std::io;

use groundlink_frame::FrameError;
use groundlink_hal::HalError;
use groundlink_link::{ConfigError, LinkError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
/// Bad configuration, property tables or payloads.
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn hal_error(context: &str, err: HalError) -> CliError {
    match err {
        HalError::Open { source, .. } | HalError::Io(source) => io_error(context, source),
        HalError::Unsupported { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        HalError::AlreadyAllocated { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Hal(err) => hal_error(context, err),
        LinkError::Frame(err) => frame_error(context, err),
        LinkError::Config(err) => config_error(context, err),
        LinkError::InvalidPacket { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        LinkError::HandshakeTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn link_errors_map_to_exit_codes() {
        let too_big = LinkError::Frame(FrameError::PayloadTooLarge { size: 300, max: 255 });
        assert_eq!(link_error("send", too_big).code, DATA_INVALID);

        let silent = LinkError::HandshakeTimeout {
            stage: "POWER_UP",
            timeout: Duration::from_millis(100),
        };
        assert_eq!(link_error("open", silent).code, TIMEOUT);

        let taken = LinkError::Hal(HalError::AlreadyAllocated {
            resource: "si446x-radio".to_string(),
        });
        assert_eq!(link_error("open", taken).code, FAILURE);

        let denied = LinkError::Hal(HalError::Io(io::Error::from(io::ErrorKind::PermissionDenied)));
        assert_eq!(link_error("open", denied).code, PERMISSION_DENIED);

        let busy = LinkError::Hal(HalError::Gpio {
            pin: 17,
            detail: "Device or resource busy".to_string(),
        });
        assert_eq!(link_error("open", busy).code, TRANSPORT_ERROR);
    }

    #[test]
    fn config_errors_carry_context() {
        let err = config_error(
            "load",
            ConfigError::Missing {
                section: "radio",
                field: "channel",
            },
        );
        assert_eq!(err.code, DATA_INVALID);
        assert_eq!(err.to_string(), "load: radio config missing key: 'channel'");
    }
}
