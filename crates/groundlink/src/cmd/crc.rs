use groundlink_frame::{build_frame, checksum};
use serde::Serialize;

use crate::cmd::CrcArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::input::{resolve_payload, to_hex};
use crate::output::{print_json, print_pairs, print_raw, OutputFormat};

#[derive(Debug, Serialize)]
struct CrcOutput {
    size: usize,
    crc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame: Option<String>,
}

pub fn run(args: CrcArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args.payload)?;
    let frame = if args.frame {
        Some(build_frame(&payload).map_err(|err| frame_error("framing failed", err))?)
    } else {
        None
    };

    let output = CrcOutput {
        size: payload.len(),
        crc: format!("0x{:04x}", checksum(&payload)),
        frame: frame.as_deref().map(to_hex),
    };

    match format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Table => {
            let mut rows = vec![
                ("size".to_string(), output.size.to_string()),
                ("crc16/modbus".to_string(), output.crc.clone()),
            ];
            if let Some(frame) = &output.frame {
                rows.push(("frame".to_string(), frame.clone()));
            }
            print_pairs(["FIELD", "VALUE"], &rows);
        }
        OutputFormat::Pretty => match &output.frame {
            Some(frame) => println!("crc={} frame={frame}", output.crc),
            None => println!("crc={}", output.crc),
        },
        OutputFormat::Raw => match &frame {
            Some(frame) => print_raw(frame),
            None => print_raw(&checksum(&payload).to_le_bytes()),
        },
    }

    Ok(SUCCESS)
}
