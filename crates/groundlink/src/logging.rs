use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

use crate::cmd::TransportKind;

/// Overrides the computed filter with a full `EnvFilter` directive string.
pub const LOG_ENV: &str = "GROUNDLINK_LOG";

/// Crates whose events follow `--log-level`. Everything else, e.g. the
/// serial backend, is held at `warn`.
const LINK_TARGETS: [&str; 4] = [
    "groundlink",
    "groundlink_link",
    "groundlink_frame",
    "groundlink_hal",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Filter directives for `level`, with one transport's module raised to
/// `trace` when `focus` is given (its SPI commands, chunk writes and frame
/// events become visible without flooding the others).
pub fn directives(level: LogLevel, focus: Option<TransportKind>) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        LINK_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.directive())),
    );
    if let Some(kind) = focus {
        directives.push(format!("groundlink_link::{}=trace", kind.name()));
    }
    directives.join(",")
}

/// Install the stderr subscriber. `GROUNDLINK_LOG`, when set and valid,
/// replaces the directives built from the flags.
pub fn init_logging(format: LogFormat, level: LogLevel, focus: Option<TransportKind>) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(directives(level, focus)));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groundlink_crates_follow_level() {
        assert_eq!(
            directives(LogLevel::Debug, None),
            "warn,groundlink=debug,groundlink_link=debug,groundlink_frame=debug,groundlink_hal=debug"
        );
    }

    #[test]
    fn focused_transport_is_traced() {
        let text = directives(LogLevel::Info, Some(TransportKind::Radio));
        assert!(text.ends_with(",groundlink_link::radio=trace"));
        assert!(text.contains("groundlink_link=info"));
        assert!(EnvFilter::try_new(&text).is_ok());
    }

    #[test]
    fn every_transport_maps_to_its_module() {
        for (kind, module) in [
            (TransportKind::Framed, "framed"),
            (TransportKind::Bus, "bus"),
            (TransportKind::Radio, "radio"),
        ] {
            let text = directives(LogLevel::Warn, Some(kind));
            assert!(text.contains(&format!("groundlink_link::{module}=trace")), "{text}");
        }
    }
}
