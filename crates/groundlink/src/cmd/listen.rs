use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cmd::ListenArgs;
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::input::{parse_duration, parse_hex};
use crate::output::{print_packet, OutputFormat};
use crate::session::Session;

const RECEIVE_SLICE: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let injected = args
        .inject
        .iter()
        .map(|hex| parse_hex(hex))
        .collect::<CliResult<Vec<_>>>()?;

    let session = Session::open(&args.link)?;
    let result = listen(&session, &args, timeout, &injected, format);
    let closed = session.shutdown();
    let code = result?;
    closed?;
    Ok(code)
}

fn listen(
    session: &Session,
    args: &ListenArgs,
    timeout: Option<Duration>,
    injected: &[Vec<u8>],
    format: OutputFormat,
) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    for bytes in injected {
        session.inject(bytes)?;
    }

    let kind = session.kind();
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut printed = 0usize;
    info!(transport = kind.name(), "listening");

    while running.load(Ordering::SeqCst) {
        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("timed out after receiving {printed} payload(s)"),
                    ));
                }
                RECEIVE_SLICE.min(deadline - now)
            }
            None => RECEIVE_SLICE,
        };

        for payload in session.receive(wait) {
            print_packet(kind, &payload, format);
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                return Ok(SUCCESS);
            }
        }
    }

    debug!(printed, "interrupted");
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
