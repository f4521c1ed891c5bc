use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use groundlink_frame::{frame_size, FrameError, FrameReader, FrameWriter, ReaderStats, MAX_PAYLOAD};
use groundlink_hal::{SerialSettings, SerialStream};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::FramedSerialConfig;
use crate::direction::DirectionControl;
use crate::error::{LinkError, Result};
use crate::hardware::SerialLine;
use crate::worker::{join_with_timeout, lock, spawn};

const NAME: &str = "framed serial";

/// Pause after a failed UART read before trying again.
pub const RX_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How long shutdown waits for the receiver thread.
pub const RX_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Counters for a [`FramedSerial`] link.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FramedStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Frames dropped for a checksum mismatch.
    pub frames_dropped: u64,
    /// Noise bytes skipped while resynchronising.
    pub bytes_discarded: u64,
}

struct Shared {
    running: AtomicBool,
    delivered: Mutex<VecDeque<Bytes>>,
    arrived: Condvar,
    rx_stats: Mutex<ReaderStats>,
}

struct TxSide {
    writer: FrameWriter<SerialStream>,
    direction: DirectionControl,
}

/// CRC-framed packets over a half-duplex RS-485 line.
///
/// A background thread reassembles inbound frames; [`FramedSerial::send`]
/// turns the transceiver around for each outbound frame.
pub struct FramedSerial {
    settings: SerialSettings,
    shared: Arc<Shared>,
    /// `None` once shut down; dropping it closes the UART and releases DE/RE.
    tx: Mutex<Option<TxSide>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    frames_sent: AtomicU64,
    shut_down: AtomicBool,
}

impl FramedSerial {
    /// Open the UART and direction lines named in `config`.
    pub fn open(config: FramedSerialConfig) -> Result<Self> {
        let settings = config.serial_settings();
        let line = SerialLine::open(&settings, config.de_pin, config.re_pin)?;
        Self::with_line(config, line)
    }

    /// Build from a JSON config object (see [`FramedSerialConfig::from_value`]).
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::open(FramedSerialConfig::from_value(value)?)
    }

    /// Start the link on already-opened hardware.
    pub fn with_line(config: FramedSerialConfig, line: SerialLine) -> Result<Self> {
        let SerialLine { mut serial, de, re } = line;
        let settings = config.serial_settings();

        let direction = DirectionControl::half_duplex(de, re)?;
        let reader_stream = prepare_reader(&mut serial, settings.read_timeout)?;

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            delivered: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
            rx_stats: Mutex::new(ReaderStats::default()),
        });

        let worker_shared = Arc::clone(&shared);
        let receiver = spawn("framed-rx", move || {
            receive_loop(FrameReader::new(reader_stream), &worker_shared)
        })?;

        info!(port = %settings.port, baud = settings.baud_rate, "framed serial link started");
        Ok(Self {
            settings,
            shared,
            tx: Mutex::new(Some(TxSide {
                writer: FrameWriter::new(serial),
                direction,
            })),
            receiver: Mutex::new(Some(receiver)),
            frames_sent: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Frame and transmit `payload`.
    ///
    /// Payloads over 255 bytes are rejected before the line is touched. The
    /// call holds the line until the frame has cleared the wire.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            }
            .into());
        }
        if self.is_shutdown() {
            return Err(LinkError::Shutdown(NAME));
        }

        let mut tx = lock(&self.tx);
        let TxSide { writer, direction } = tx.as_mut().ok_or(LinkError::Shutdown(NAME))?;

        direction.transmit()?;
        let sent = writer.send(payload).map_err(LinkError::from).map(|wire_len| {
            thread::sleep(self.settings.wire_time(wire_len));
            wire_len
        });
        let restored = direction.receive();

        let wire_len = sent?;
        restored?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        debug!(len = payload.len(), wire_len, "frame sent");
        Ok(())
    }

    /// Pop the next delivered payload.
    ///
    /// `None` blocks until a frame arrives; `Some(timeout)` gives up after
    /// `timeout` (`Duration::ZERO` polls). After shutdown only frames already
    /// delivered are returned.
    pub fn read_frame(&self, timeout: Option<Duration>) -> Option<Bytes> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut delivered = lock(&self.shared.delivered);
        loop {
            if let Some(payload) = delivered.pop_front() {
                return Some(payload);
            }
            if !self.shared.running.load(Ordering::Acquire) {
                return None;
            }
            delivered = match deadline {
                None => self
                    .shared
                    .arrived
                    .wait(delivered)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.shared
                        .arrived
                        .wait_timeout(delivered, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Stop the receiver, close the UART and release both direction lines.
    ///
    /// A second call fails with [`LinkError::AlreadyShutdown`].
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(LinkError::AlreadyShutdown(NAME));
        }
        self.teardown();
        Ok(())
    }

    fn teardown(&self) {
        self.shared.running.store(false, Ordering::Release);
        {
            // Readers check the flag under this lock, so the wakeup cannot be missed.
            let _delivered = lock(&self.shared.delivered);
            self.shared.arrived.notify_all();
        }

        if let Some(handle) = lock(&self.receiver).take() {
            join_with_timeout(handle, RX_JOIN_TIMEOUT);
        }

        drop(lock(&self.tx).take());
        info!(port = %self.settings.port, "framed serial link shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn baud_rate(&self) -> u32 {
        self.settings.baud_rate
    }

    pub fn port(&self) -> &str {
        &self.settings.port
    }

    pub fn stats(&self) -> FramedStats {
        let rx = *lock(&self.shared.rx_stats);
        FramedStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: rx.frames,
            frames_dropped: rx.corrupt,
            bytes_discarded: rx.discarded_bytes,
        }
    }

    /// Wire time of a frame carrying `payload_len` bytes at this link's settings.
    pub fn frame_wire_time(&self, payload_len: usize) -> Duration {
        self.settings.wire_time(frame_size(payload_len))
    }
}

impl Drop for FramedSerial {
    fn drop(&mut self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.teardown();
        }
    }
}

impl std::fmt::Debug for FramedSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedSerial")
            .field("port", &self.settings.port)
            .field("baud_rate", &self.settings.baud_rate)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn prepare_reader(serial: &mut SerialStream, timeout: Duration) -> Result<SerialStream> {
    serial.set_read_timeout(timeout)?;
    Ok(serial.try_clone()?)
}

fn receive_loop(mut reader: FrameReader<SerialStream>, shared: &Shared) {
    while shared.running.load(Ordering::Acquire) {
        let result = reader.read_frame();
        *lock(&shared.rx_stats) = reader.stats();
        match result {
            Ok(Some(payload)) => {
                debug!(len = payload.len(), "frame received");
                lock(&shared.delivered).push_back(payload);
                shared.arrived.notify_all();
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "serial receive failed, backing off");
                thread::sleep(RX_ERROR_BACKOFF);
            }
        }
    }
    debug!("framed receiver exiting");
}
