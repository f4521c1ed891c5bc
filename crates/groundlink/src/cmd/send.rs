use tracing::info;

use crate::cmd::SendArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::input::{resolve_payload, to_hex};
use crate::output::{print_send_report, OutputFormat, SendReport};
use crate::session::Session;

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args.payload)?;
    let session = Session::open(&args.link)?;

    if let Err(err) = session.send(&payload) {
        let _ = session.shutdown();
        return Err(err);
    }
    info!(transport = session.kind().name(), bytes = payload.len(), "payload sent");

    // Shutdown drains queued writes before the capture is read.
    session.shutdown()?;

    let report = SendReport {
        transport: session.kind().name(),
        bytes_sent: payload.len(),
        wire: session.wire(payload.len()).map(|bytes| to_hex(&bytes)),
        stats: session.stats(),
    };
    print_send_report(&report, format);

    Ok(SUCCESS)
}
