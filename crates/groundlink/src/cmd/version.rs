use groundlink_frame::MAX_PAYLOAD;
use groundlink_link::radio::command::MAX_PACKET_SIZE;
use serde::Serialize;

use crate::cmd::{TransportKind, VersionArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
    /// GPIO/SPI backend compiled in; `simulated` means only `--simulate` works.
    hardware: &'static str,
    transports: Vec<&'static str>,
    checksum: &'static str,
    max_frame_payload: usize,
    max_radio_packet: usize,
}

impl VersionInfo {
    fn current() -> Self {
        Self {
            name: "groundlink",
            version: env!("CARGO_PKG_VERSION"),
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
            hardware: if cfg!(target_os = "linux") {
                "linux-embedded-hal (sysfs gpio, spidev)"
            } else {
                "simulated"
            },
            transports: [TransportKind::Framed, TransportKind::Bus, TransportKind::Radio]
                .into_iter()
                .map(TransportKind::name)
                .collect(),
            checksum: "CRC-16/MODBUS",
            max_frame_payload: MAX_PAYLOAD,
            max_radio_packet: MAX_PACKET_SIZE,
        }
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.extended {
        println!("groundlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let info = VersionInfo::current();
    match format {
        OutputFormat::Json => print_json(&info),
        _ => {
            println!("{} {}", info.name, info.version);
            println!("target: {}-{}", info.target_arch, info.target_os);
            println!("hardware: {}", info.hardware);
            println!("transports: {}", info.transports.join(", "));
            println!(
                "limits: frame payload {} bytes ({}), radio packet {} bytes",
                info.max_frame_payload, info.checksum, info.max_radio_packet
            );
        }
    }
    Ok(SUCCESS)
}
