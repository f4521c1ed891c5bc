//! One open transport, real or simulated, behind a common interface.

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use groundlink_hal::HandleAllocator;
use groundlink_link::{
    FramedSerial, FramedSerialConfig, LinkConfig, Radio, RawBus, RawBusConfig, SerialLine,
    SimRadio, SimSerialLine,
};
use serde_json::Value;
use tracing::debug;

use crate::cmd::{LinkArgs, TransportKind};
use crate::exit::{config_error, link_error, CliError, CliResult, USAGE};

const SIM_PORT: &str = "sim";
const SIM_BAUD: u32 = 115_200;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const WIRE_WAIT: Duration = Duration::from_secs(1);

pub enum Session {
    Framed {
        link: FramedSerial,
        sim: Option<SimSerialLine>,
    },
    Bus {
        link: RawBus,
        sim: Option<SimSerialLine>,
    },
    Radio {
        link: Radio,
        sim: Option<SimRadio>,
    },
}

impl Session {
    pub fn open(args: &LinkArgs) -> CliResult<Self> {
        let config = match &args.config {
            Some(path) => LinkConfig::from_path(path).map_err(|err| {
                config_error(&format!("failed loading {}", path.display()), err)
            })?,
            None => LinkConfig::default(),
        };
        debug!(transport = args.transport.name(), simulate = args.simulate, "opening link");

        match args.transport {
            TransportKind::Framed => {
                if args.simulate {
                    let config = config
                        .framed
                        .unwrap_or_else(|| FramedSerialConfig::new(SIM_PORT, SIM_BAUD, 0));
                    let (line, sim) = SerialLine::simulated();
                    let link = FramedSerial::with_line(config, line)
                        .map_err(|err| link_error("open failed", err))?;
                    Ok(Session::Framed {
                        link,
                        sim: Some(sim),
                    })
                } else {
                    let config = config.framed.ok_or_else(|| missing_section("framed"))?;
                    let link =
                        FramedSerial::open(config).map_err(|err| link_error("open failed", err))?;
                    Ok(Session::Framed { link, sim: None })
                }
            }
            TransportKind::Bus => {
                if args.simulate {
                    let mut config = match config.bus {
                        Some(config) => config,
                        None => RawBusConfig::new(SIM_BAUD, 8, 1, "N")
                            .map_err(|err| config_error("default bus config", err))?,
                    };
                    config.port = SIM_PORT.to_string();
                    let (line, sim) = SerialLine::simulated();
                    let link = RawBus::with_line(config, line)
                        .map_err(|err| link_error("open failed", err))?;
                    Ok(Session::Bus {
                        link,
                        sim: Some(sim),
                    })
                } else {
                    let config = config.bus.ok_or_else(|| missing_section("bus"))?;
                    let link = RawBus::open(config).map_err(|err| link_error("open failed", err))?;
                    Ok(Session::Bus { link, sim: None })
                }
            }
            TransportKind::Radio => {
                let config = config.radio.ok_or_else(|| missing_section("radio"))?;
                if args.simulate {
                    let (hardware, sim) = SimRadio::new();
                    let link = Radio::with_hardware(config, hardware, &HandleAllocator::global())
                        .map_err(|err| link_error("open failed", err))?;
                    Ok(Session::Radio {
                        link,
                        sim: Some(sim),
                    })
                } else {
                    let link = Radio::open(config).map_err(|err| link_error("open failed", err))?;
                    Ok(Session::Radio { link, sim: None })
                }
            }
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Session::Framed { .. } => TransportKind::Framed,
            Session::Bus { .. } => TransportKind::Bus,
            Session::Radio { .. } => TransportKind::Radio,
        }
    }

    pub fn send(&self, payload: &[u8]) -> CliResult<()> {
        let sent = match self {
            Session::Framed { link, .. } => link.send(payload),
            Session::Bus { link, .. } => link.write(payload),
            Session::Radio { link, .. } => link.transmit(&[payload]),
        };
        sent.map_err(|err| link_error("send failed", err))
    }

    /// Bytes the simulated far end saw, once `expected` payload bytes have
    /// gone out. `None` on real hardware.
    pub fn wire(&self, expected: usize) -> Option<Vec<u8>> {
        match self {
            Session::Framed { sim, .. } => sim.as_ref().map(|sim| sim.peer.written()),
            Session::Bus { sim, .. } => sim.as_ref().map(|sim| {
                sim.peer.wait_for_written(expected, WIRE_WAIT);
                sim.peer.written()
            }),
            Session::Radio { sim, .. } => sim.as_ref().map(|sim| {
                sim.wait_for_transmitted(1, WIRE_WAIT);
                sim.transmitted().concat()
            }),
        }
    }

    /// Deliver `bytes` from the simulated far end. For the radio, `bytes` is
    /// one packet.
    pub fn inject(&self, bytes: &[u8]) -> CliResult<()> {
        let injected = match self {
            Session::Framed { sim, .. } | Session::Bus { sim, .. } => sim.as_ref().map(|sim| {
                sim.peer.inject(bytes);
            }),
            Session::Radio { sim, .. } => sim.as_ref().map(|sim| sim.inject_packet(bytes)),
        };
        injected.ok_or_else(|| CliError::new(USAGE, "--inject requires --simulate"))
    }

    /// Payloads that arrive within `wait`. Returns early once anything arrives.
    pub fn receive(&self, wait: Duration) -> Vec<Bytes> {
        if let Session::Framed { link, .. } = self {
            return link.read_frame(Some(wait)).into_iter().collect();
        }

        let deadline = Instant::now() + wait;
        loop {
            let received = match self {
                Session::Bus { link, .. } => {
                    let data = link.read();
                    if data.is_empty() {
                        Vec::new()
                    } else {
                        vec![data]
                    }
                }
                Session::Radio { link, .. } => link.receive(),
                Session::Framed { .. } => Vec::new(),
            };
            let now = Instant::now();
            if !received.is_empty() || now >= deadline {
                return received;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    pub fn stats(&self) -> Value {
        let stats = match self {
            Session::Framed { link, .. } => serde_json::to_value(link.stats()),
            Session::Bus { link, .. } => serde_json::to_value(link.stats()),
            Session::Radio { link, .. } => serde_json::to_value(link.stats()),
        };
        stats.unwrap_or(Value::Null)
    }

    pub fn shutdown(&self) -> CliResult<()> {
        let result = match self {
            Session::Framed { link, .. } => link.shutdown(),
            Session::Bus { link, .. } => link.shutdown(),
            Session::Radio { link, .. } => link.shutdown(),
        };
        result.map_err(|err| link_error("shutdown failed", err))
    }
}

fn missing_section(section: &str) -> CliError {
    CliError::new(
        USAGE,
        format!("the {section} transport needs --config with a \"{section}\" section"),
    )
}
