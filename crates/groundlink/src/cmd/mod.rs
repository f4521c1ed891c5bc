use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod crc;
pub mod doctor;
pub mod listen;
pub mod radio_props;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one payload over a transport.
    Send(SendArgs),
    /// Print payloads received on a transport.
    Listen(ListenArgs),
    /// Compute the CRC16/MODBUS checksum or frame encoding of a payload.
    Crc(CrcArgs),
    /// Parse a WDS radio configuration header and list its properties.
    RadioProps(RadioPropsArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Crc(args) => crc::run(args, format),
        Command::RadioProps(args) => radio_props::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// CRC-framed packets over RS-485.
    Framed,
    /// Unframed byte stream over RS-485.
    Bus,
    /// Si446x packet radio.
    Radio,
}

impl TransportKind {
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::Framed => "framed",
            TransportKind::Bus => "bus",
            TransportKind::Radio => "radio",
        }
    }
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Transport to open.
    #[arg(long, short = 't', value_enum, default_value = "framed")]
    pub transport: TransportKind,
    /// JSON link configuration with `framed`, `bus` and `radio` sections.
    #[arg(long, value_name = "FILE", env = "GROUNDLINK_CONFIG")]
    pub config: Option<PathBuf>,
    /// Drive simulated hardware instead of real devices.
    #[arg(long)]
    pub simulate: bool,
}

#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// Payload as a UTF-8 string.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Payload as hex digits (e.g. 7e01ff).
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Exit after receiving N payloads.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up after this long without the requested payloads (e.g. 5s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// With --simulate, hex bytes delivered by the simulated far end (repeatable).
    #[arg(long, value_name = "HEX", requires = "simulate")]
    pub inject: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CrcArgs {
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Also print the complete frame.
    #[arg(long)]
    pub frame: bool,
}

#[derive(Args, Debug)]
pub struct RadioPropsArgs {
    /// WDS-generated radio_config.h.
    pub path: PathBuf,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    /// Link configuration to validate.
    #[arg(long, value_name = "FILE", env = "GROUNDLINK_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show target, hardware backend and link limits.
    #[arg(long)]
    pub extended: bool,
}
