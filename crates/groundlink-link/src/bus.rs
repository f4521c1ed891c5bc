use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use groundlink_hal::{DataBits, Parity, SerialSettings, SerialStream, StopBits};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RawBusConfig;
use crate::direction::DirectionControl;
use crate::error::{LinkError, Result};
use crate::hardware::SerialLine;
use crate::worker::{join_with_timeout, lock, spawn, ShutdownDeadline};

const NAME: &str = "RS485 bus";
const RX_CHUNK_SIZE: usize = 256;

/// Counters for a [`RawBus`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub write_errors: u64,
    pub read_errors: u64,
}

#[derive(Default)]
struct TxState {
    pending: Vec<u8>,
    /// A drained chunk is being written.
    busy: bool,
    stop: bool,
}

#[derive(Default)]
struct Counters {
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    write_errors: AtomicU64,
    read_errors: AtomicU64,
}

struct Shared {
    tx: Mutex<TxState>,
    /// Signalled when bytes are pending or a stop is requested. A stop also
    /// cuts short the wait for a chunk to clear the wire.
    tx_ready: Condvar,
    /// Signalled when the transmitter finishes a chunk.
    tx_idle: Condvar,
    rx: Mutex<Vec<u8>>,
    running: AtomicBool,
    counters: Counters,
}

/// Unframed byte stream over the RS-485 line.
///
/// Writes are buffered and pushed out by a transmit thread; a receive thread
/// accumulates whatever arrives. Framing, if any, is the caller's business.
pub struct RawBus {
    config: RawBusConfig,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl RawBus {
    /// Open the UART and direction lines named in `config`.
    pub fn open(config: RawBusConfig) -> Result<Self> {
        let line = SerialLine::open(&config.serial_settings(), config.de_pin, config.re_pin)?;
        Self::with_line(config, line)
    }

    /// Build from a JSON config object (see [`RawBusConfig::from_value`]).
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::open(RawBusConfig::from_value(value)?)
    }

    /// Start the bus on already-opened hardware.
    pub fn with_line(config: RawBusConfig, line: SerialLine) -> Result<Self> {
        let SerialLine { mut serial, de, re } = line;
        let direction = DirectionControl::driver_only(de, re)?;

        serial.set_read_timeout(config.poll_interval)?;
        let rx_serial = serial.try_clone()?;

        let shared = Arc::new(Shared {
            tx: Mutex::new(TxState::default()),
            tx_ready: Condvar::new(),
            tx_idle: Condvar::new(),
            rx: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            counters: Counters::default(),
        });

        let settings = config.serial_settings();
        let tx_shared = Arc::clone(&shared);
        // On a failed spawn the closure, and with it the direction lines, is dropped.
        let transmitter = spawn("bus-tx", move || {
            transmit_loop(serial, direction, &settings, &tx_shared)
        })?;

        let rx_shared = Arc::clone(&shared);
        let poll_interval = config.poll_interval;
        let receiver = match spawn("bus-rx", move || {
            receive_loop(rx_serial, poll_interval, &rx_shared)
        }) {
            Ok(handle) => handle,
            Err(err) => {
                stop_transmitter(&shared);
                join_with_timeout(transmitter, config.shutdown_timeout);
                return Err(err);
            }
        };

        info!(
            port = %config.port,
            baud = config.baud_rate,
            format = %format_args!(
                "{}{}{}",
                config.data_bits.count(),
                config.parity,
                config.stop_bits.count()
            ),
            "RS485 bus started"
        );
        Ok(Self {
            config,
            shared,
            workers: Mutex::new(vec![transmitter, receiver]),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Queue `data` for transmission. The bytes go out contiguously.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.is_shutdown() {
            return Err(LinkError::Shutdown(NAME));
        }
        if data.is_empty() {
            return Ok(());
        }
        let mut tx = lock(&self.shared.tx);
        if tx.stop {
            return Err(LinkError::Shutdown(NAME));
        }
        tx.pending.extend_from_slice(data);
        self.shared.tx_ready.notify_one();
        Ok(())
    }

    /// Take everything received since the previous call. Never blocks.
    pub fn read(&self) -> Bytes {
        Bytes::from(std::mem::take(&mut *lock(&self.shared.rx)))
    }

    /// Drain pending writes, stop both workers and release the line, all
    /// within the configured shutdown timeout. A chunk still on the wire when
    /// draining runs out is cut short and the driver disabled.
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
        let deadline = ShutdownDeadline::start(self.config.shutdown_timeout);
        let tx = lock(&self.shared.tx);
        let (tx, wait) = self
            .shared
            .tx_idle
            .wait_timeout_while(tx, deadline.drain_left(), |tx| {
                !tx.pending.is_empty() || tx.busy
            })
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() {
            warn!(
                abandoned = tx.pending.len(),
                timeout = ?self.config.shutdown_timeout,
                "pending bytes not drained before shutdown"
            );
        }
        drop(tx);

        stop_transmitter(&self.shared);
        self.shared.running.store(false, Ordering::Release);

        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        deadline.join_all(workers);
        info!(port = %self.config.port, "RS485 bus shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }

    pub fn data_bits(&self) -> DataBits {
        self.config.data_bits
    }

    pub fn stop_bits(&self) -> StopBits {
        self.config.stop_bits
    }

    pub fn parity(&self) -> Parity {
        self.config.parity
    }

    pub fn stats(&self) -> BusStats {
        let c = &self.shared.counters;
        BusStats {
            bytes_written: c.bytes_written.load(Ordering::Relaxed),
            bytes_read: c.bytes_read.load(Ordering::Relaxed),
            write_errors: c.write_errors.load(Ordering::Relaxed),
            read_errors: c.read_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RawBus {
    fn drop(&mut self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.teardown();
        }
    }
}

impl std::fmt::Debug for RawBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBus")
            .field("port", &self.config.port)
            .field("baud_rate", &self.config.baud_rate)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn stop_transmitter(shared: &Shared) {
    lock(&shared.tx).stop = true;
    shared.tx_ready.notify_all();
}

fn transmit_loop(
    mut serial: SerialStream,
    mut direction: DirectionControl,
    settings: &SerialSettings,
    shared: &Shared,
) {
    loop {
        let chunk = {
            let mut tx = lock(&shared.tx);
            while tx.pending.is_empty() && !tx.stop {
                tx = shared
                    .tx_ready
                    .wait(tx)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if tx.stop {
                break;
            }
            tx.busy = true;
            std::mem::take(&mut tx.pending)
        };

        match transmit_chunk(&mut serial, &mut direction, settings, shared, &chunk) {
            Ok(()) => {
                shared
                    .counters
                    .bytes_written
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                debug!(len = chunk.len(), "bus chunk written");
            }
            Err(err) => {
                shared.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                warn!(len = chunk.len(), error = %err, "bus write failed, chunk dropped");
            }
        }

        lock(&shared.tx).busy = false;
        shared.tx_idle.notify_all();
    }

    drop(direction);
    debug!("bus transmitter exiting");
}

fn transmit_chunk(
    serial: &mut SerialStream,
    direction: &mut DirectionControl,
    settings: &SerialSettings,
    shared: &Shared,
    chunk: &[u8],
) -> Result<()> {
    direction.transmit()?;
    let written = serial.write_all(chunk).and_then(|()| serial.flush());
    if written.is_ok() {
        wait_on_wire(shared, settings.wire_time(chunk.len()));
    }
    let restored = direction.receive();
    written.map_err(groundlink_hal::HalError::Io)?;
    restored
}

/// Hold the driver for `wire_time`, returning early if a stop is requested.
fn wait_on_wire(shared: &Shared, wire_time: Duration) {
    let tx = lock(&shared.tx);
    let (tx, _) = shared
        .tx_ready
        .wait_timeout_while(tx, wire_time, |tx| !tx.stop)
        .unwrap_or_else(PoisonError::into_inner);
    if tx.stop {
        debug!(?wire_time, "wire wait cut short by shutdown");
    }
}

fn receive_loop(mut serial: SerialStream, poll_interval: Duration, shared: &Shared) {
    let mut buf = [0u8; RX_CHUNK_SIZE];
    while shared.running.load(Ordering::Acquire) {
        match serial.read_available(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                shared
                    .counters
                    .bytes_read
                    .fetch_add(n as u64, Ordering::Relaxed);
                lock(&shared.rx).extend_from_slice(&buf[..n]);
            }
            Err(err) => {
                shared.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "bus read failed");
                thread::sleep(poll_interval);
            }
        }
    }
    debug!("bus receiver exiting");
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;
    use std::time::Instant;

    use super::*;
    use crate::hardware::SimSerialLine;

    fn config(baud_rate: u32) -> RawBusConfig {
        let mut config = RawBusConfig::new(baud_rate, 8, 1, "N").unwrap();
        config.poll_interval = Duration::from_millis(5);
        config
    }

    fn start_with(config: RawBusConfig) -> (RawBus, SimSerialLine) {
        let (line, sim) = SerialLine::simulated();
        (RawBus::with_line(config, line).unwrap(), sim)
    }

    fn start() -> (RawBus, SimSerialLine) {
        start_with(config(115_200))
    }

    fn read_until(bus: &RawBus, len: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut out = Vec::new();
        while out.len() < len && Instant::now() < deadline {
            out.extend_from_slice(&bus.read());
            thread::sleep(Duration::from_millis(1));
        }
        out
    }

    #[test]
    fn write_is_sent_with_driver_enabled() {
        let (bus, sim) = start();
        bus.write(b"hello").unwrap();
        assert!(sim.peer.wait_for_written(5, Duration::from_secs(2)));
        assert_eq!(sim.peer.written(), b"hello");

        let deadline = Instant::now() + Duration::from_secs(1);
        while sim.de.history().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sim.de.history(), vec![false, true, false]);
        assert!(sim.re.history().iter().all(|high| !high));
    }

    #[test]
    fn concurrent_writes_stay_contiguous() {
        let (bus, sim) = start();
        let bus = Arc::new(bus);
        let writers: Vec<_> = [b"foo".as_ref(), b"bar".as_ref()]
            .into_iter()
            .map(|data| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || bus.write(data).unwrap())
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert!(sim.peer.wait_for_written(6, Duration::from_secs(2)));
        let written = sim.peer.written();
        assert!(written == b"foobar" || written == b"barfoo", "{written:?}");
    }

    #[test]
    fn many_writers_never_interleave_within_a_buffer() {
        let (bus, sim) = start();
        let bus = Arc::new(bus);
        let writers: Vec<_> = (0..8u8)
            .map(|id| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    for _ in 0..16 {
                        bus.write(&[id; 4]).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert!(sim.peer.wait_for_written(8 * 16 * 4, Duration::from_secs(2)));
        for chunk in sim.peer.written().chunks(4) {
            assert!(chunk.iter().all(|&b| b == chunk[0]), "{chunk:?}");
        }
    }

    #[test]
    fn read_drains_inbound_buffer() {
        let (bus, sim) = start();
        assert!(bus.read().is_empty());

        sim.peer.inject(b"\x01\x02\x03");
        assert_eq!(read_until(&bus, 3), vec![1, 2, 3]);
        assert!(bus.read().is_empty());
        assert_eq!(bus.stats().bytes_read, 3);
    }

    #[test]
    fn read_error_is_counted_and_survived() {
        let (bus, sim) = start();
        sim.peer.inject_read_error(ErrorKind::BrokenPipe);
        sim.peer.inject(b"ok");
        assert_eq!(read_until(&bus, 2), b"ok");
        assert_eq!(bus.stats().read_errors, 1);
    }

    #[test]
    fn shutdown_drains_pending_writes() {
        let (bus, sim) = start();
        bus.write(b"last words").unwrap();
        bus.shutdown().unwrap();

        assert_eq!(sim.peer.written(), b"last words");
        assert!(sim.de.is_released());
        assert!(sim.re.is_released());
    }

    #[test]
    fn shutdown_is_bounded_when_line_is_slow() {
        let timeout = Duration::from_millis(50);
        let mut config = config(1_200);
        config.shutdown_timeout = timeout;
        let (bus, sim) = start_with(config);

        // 600 bytes at 1200 baud hold the line for about five seconds.
        bus.write(&[0x55; 600]).unwrap();
        assert!(sim.peer.wait_for_written(600, Duration::from_secs(2)));
        bus.write(b"never sent").unwrap();

        let started = Instant::now();
        bus.shutdown().unwrap();
        let elapsed = started.elapsed();
        assert!(
            elapsed <= timeout + Duration::from_millis(100),
            "shutdown took {elapsed:?}"
        );
        assert_eq!(sim.peer.written().len(), 600);
        assert!(!sim.de.level());
        assert_eq!(sim.de.history().last(), Some(&false));
        assert!(sim.de.is_released());
    }

    #[test]
    fn shutdown_with_long_timeout_still_drains() {
        let mut config = config(9_600);
        config.shutdown_timeout = Duration::from_secs(5);
        let (bus, sim) = start_with(config);

        // About 100 ms on the wire.
        bus.write(&[0xA5; 96]).unwrap();
        bus.shutdown().unwrap();
        assert_eq!(sim.peer.written().len(), 96);
        assert_eq!(sim.de.history(), vec![false, true, false]);
    }

    #[test]
    fn misuse_after_shutdown() {
        let (bus, _sim) = start();
        bus.shutdown().unwrap();
        assert!(bus.is_shutdown());
        assert!(matches!(bus.write(b"x"), Err(LinkError::Shutdown(_))));
        assert!(matches!(bus.shutdown(), Err(LinkError::AlreadyShutdown(_))));
    }

    #[test]
    fn accessors_report_line_settings() {
        let (line, _sim) = SerialLine::simulated();
        let config = RawBusConfig::new(57_600, 7, 2, "O").unwrap();
        let bus = RawBus::with_line(config, line).unwrap();
        assert_eq!(bus.baud_rate(), 57_600);
        assert_eq!(bus.data_bits(), DataBits::Seven);
        assert_eq!(bus.stop_bits(), StopBits::Two);
        assert_eq!(bus.parity(), Parity::Odd);
    }
}
