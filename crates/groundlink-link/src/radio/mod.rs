//! Si446x packet radio over SPI.
//!
//! Construction loads the WDS property table, resets and configures the chip,
//! then starts two workers:
//!
//! - `radio-irq` waits for falling edges on NIRQ and reads each received
//!   packet out of the RX FIFO;
//! - `radio-tx` drains the transmit queue, one FIFO load and `START_TX` per
//!   packet, and re-enters RX when a batch is done.
//!
//! Every SPI transaction, from either worker or from shutdown, happens under a
//! single bus lock, taken per packet so shutdown never waits on a whole batch.
//! Each command is followed by a `READ_CMD_BUFF` poll until the chip reports
//! CTS, the configured timeout passes or shutdown begins. A missing CTS during
//! construction is fatal; afterwards it is counted and logged.

pub mod command;
pub mod props;
pub mod sim;

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use groundlink_hal::{HandleAllocator, HandleClaim, InterruptLine, OutputLine, SpiHandle};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::config::RadioConfig;
use crate::error::{LinkError, Result};
use crate::hardware::{interrupt_line, output_line, spi_device};
use crate::worker::{lock, spawn, ShutdownDeadline};

use self::command::{CTS_READY, MAX_PACKET_SIZE};
use self::props::RadioProperty;

const NAME: &str = "radio";

/// Allocator resource name held by a live [`Radio`].
pub const RESOURCE: &str = "si446x-radio";

const RESET_HOLD: Duration = Duration::from_millis(20);
const RESET_SETTLE: Duration = Duration::from_millis(20);
const CTS_POLL_INTERVAL: Duration = Duration::from_micros(50);
const IRQ_POLL: Duration = Duration::from_millis(20);
const BUS_RETRY: Duration = Duration::from_millis(1);

/// The devices a [`Radio`] drives. Dropping them releases the hardware.
pub struct RadioHardware {
    pub spi: SpiHandle,
    /// Shutdown (SDN) pin, high holds the chip in reset.
    pub reset: OutputLine,
    /// NIRQ, pulled low by the chip on a packet-received interrupt.
    pub irq: Box<dyn InterruptLine>,
}

impl RadioHardware {
    /// Open the spidev node and GPIO lines named in `config`.
    pub fn open(config: &RadioConfig) -> Result<Self> {
        let spi = spi_device(&config.spi_device, config.spi_speed_hz)?;
        let reset = output_line(config.reset_pin)?;
        let irq = interrupt_line(config.irq_pin)?;
        Ok(Self { spi, reset, irq })
    }
}

impl fmt::Debug for RadioHardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadioHardware").finish_non_exhaustive()
    }
}

/// Counters for a [`Radio`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RadioStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Received packets abandoned for a bad length, SPI error or missing CTS,
    /// plus outgoing packets where any step went without CTS.
    pub packets_dropped: u64,
    /// Packets whose transmission failed on the SPI bus.
    pub tx_failures: u64,
    /// Commands after which the chip never reported CTS.
    pub cts_timeouts: u64,
}

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_dropped: AtomicU64,
    tx_failures: AtomicU64,
    cts_timeouts: AtomicU64,
}

/// Command/response access to the chip.
struct Bus {
    spi: SpiHandle,
    reset: OutputLine,
    cts_timeout: Duration,
    /// Set at shutdown; CTS polling gives up at once.
    stopping: Arc<AtomicBool>,
}

impl Bus {
    fn send(&mut self, cmd: &[u8]) -> Result<()> {
        trace!(
            command = cmd.first().map_or("empty", |&op| command::name(op)),
            len = cmd.len(),
            "spi command"
        );
        let mut buf = cmd.to_vec();
        self.spi.transfer_in_place(&mut buf)?;
        Ok(())
    }

    /// Poll `READ_CMD_BUFF` until CTS, returning the raw transaction buffer.
    fn response(&mut self, len: usize) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + self.cts_timeout;
        loop {
            let mut buf = command::read_cmd_buff(len);
            self.spi.transfer_in_place(&mut buf)?;
            if buf[1] == CTS_READY {
                return Ok(Some(buf));
            }
            if Instant::now() >= deadline || self.stopping.load(Ordering::Acquire) {
                return Ok(None);
            }
            thread::sleep(CTS_POLL_INTERVAL);
        }
    }

    /// Send `cmd` and wait for CTS. `Ok(false)` if it never came.
    fn command(&mut self, cmd: &[u8]) -> Result<bool> {
        self.send(cmd)?;
        Ok(self.response(0)?.is_some())
    }

    /// Like [`Bus::command`], but a missing CTS is an error.
    fn require(&mut self, cmd: &[u8]) -> Result<()> {
        if self.command(cmd)? {
            Ok(())
        } else {
            Err(LinkError::HandshakeTimeout {
                stage: cmd.first().map_or("empty", |&op| command::name(op)),
                timeout: self.cts_timeout,
            })
        }
    }

    fn pulse_reset(&mut self) -> Result<()> {
        self.reset.set_low()?;
        self.reset.set_high()?;
        thread::sleep(RESET_HOLD);
        self.reset.set_low()?;
        thread::sleep(RESET_SETTLE);
        Ok(())
    }

    fn initialise(&mut self, properties: &[RadioProperty]) -> Result<()> {
        self.pulse_reset()?;
        self.require(&command::power_up())?;
        self.require(&command::gpio_pin_cfg())?;
        for property in properties {
            self.require(&property.command())?;
        }
        self.require(&command::int_ctl_enable())?;
        self.require(&command::int_ctl_ph_enable())?;
        debug!(properties = properties.len(), "radio configured");
        Ok(())
    }
}

#[derive(Default)]
struct TxState {
    queue: VecDeque<Bytes>,
    /// Packets taken by the transmitter and not yet finished.
    in_flight: usize,
    stop: bool,
}

struct Shared {
    /// Taken at shutdown, which releases the SPI device and reset line.
    bus: Mutex<Option<Bus>>,
    stopping: Arc<AtomicBool>,
    tx: Mutex<TxState>,
    tx_ready: Condvar,
    drained: Condvar,
    rx: Mutex<Vec<Bytes>>,
    counters: Counters,
}

/// An Si446x transceiver on a fixed channel.
///
/// Only one radio may exist per [`HandleAllocator`]; [`Radio::open`] uses the
/// process-wide allocator.
pub struct Radio {
    config: RadioConfig,
    property_names: Vec<String>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    claim: Mutex<Option<HandleClaim>>,
    shut_down: AtomicBool,
}

impl Radio {
    /// Open the hardware in `config` and bring the radio up.
    pub fn open(config: RadioConfig) -> Result<Self> {
        Self::start(config, &HandleAllocator::global(), RadioHardware::open)
    }

    /// Build from a JSON config object (see [`RadioConfig::from_value`]).
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::open(RadioConfig::from_value(value)?)
    }

    /// Bring the radio up on already-opened hardware, claiming it from `allocator`.
    pub fn with_hardware(
        config: RadioConfig,
        hardware: RadioHardware,
        allocator: &Arc<HandleAllocator>,
    ) -> Result<Self> {
        Self::start(config, allocator, move |_| Ok(hardware))
    }

    fn start(
        config: RadioConfig,
        allocator: &Arc<HandleAllocator>,
        open: impl FnOnce(&RadioConfig) -> Result<RadioHardware>,
    ) -> Result<Self> {
        let claim = allocator.claim(RESOURCE)?;
        let properties = props::load(&config.radio_config_path)?;

        let RadioHardware { spi, reset, irq } = open(&config)?;
        let stopping = Arc::new(AtomicBool::new(false));
        let mut bus = Bus {
            spi,
            reset,
            cts_timeout: config.cts_timeout,
            stopping: Arc::clone(&stopping),
        };
        bus.initialise(&properties)?;

        let shared = Arc::new(Shared {
            bus: Mutex::new(Some(bus)),
            stopping,
            tx: Mutex::new(TxState::default()),
            tx_ready: Condvar::new(),
            drained: Condvar::new(),
            rx: Mutex::new(Vec::new()),
            counters: Counters::default(),
        });

        let irq_shared = Arc::clone(&shared);
        let interrupts = spawn("radio-irq", move || interrupt_loop(irq, &irq_shared))?;
        let mut workers = vec![interrupts];

        let channel = config.channel;
        let armed = match lock(&shared.bus).as_mut() {
            Some(bus) => bus.require(&command::start_rx(channel)),
            None => Err(LinkError::Shutdown(NAME)),
        };
        if let Err(err) = armed {
            stop_workers(&shared, workers, &ShutdownDeadline::start(config.shutdown_timeout));
            return Err(err);
        }

        let tx_shared = Arc::clone(&shared);
        match spawn("radio-tx", move || transmit_loop(&tx_shared, channel)) {
            Ok(handle) => workers.push(handle),
            Err(err) => {
                stop_workers(&shared, workers, &ShutdownDeadline::start(config.shutdown_timeout));
                return Err(err);
            }
        }

        info!(
            channel,
            config = %config.radio_config_path.display(),
            properties = properties.len(),
            "radio started"
        );
        Ok(Self {
            config,
            property_names: properties.into_iter().map(|p| p.name).collect(),
            shared,
            workers: Mutex::new(workers),
            claim: Mutex::new(Some(claim)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Queue `packets` for transmission.
    ///
    /// Every packet must be 1..=64 bytes. The batch is checked as a whole
    /// first, so an invalid packet leaves the queue untouched.
    pub fn transmit<P: AsRef<[u8]>>(&self, packets: &[P]) -> Result<()> {
        if self.is_shutdown() {
            return Err(LinkError::Shutdown(NAME));
        }
        for (index, packet) in packets.iter().enumerate() {
            let size = packet.as_ref().len();
            if size == 0 || size > MAX_PACKET_SIZE {
                return Err(LinkError::InvalidPacket {
                    index,
                    size,
                    max: MAX_PACKET_SIZE,
                });
            }
        }
        if packets.is_empty() {
            return Ok(());
        }

        let mut tx = lock(&self.shared.tx);
        if tx.stop {
            return Err(LinkError::Shutdown(NAME));
        }
        tx.queue
            .extend(packets.iter().map(|p| Bytes::copy_from_slice(p.as_ref())));
        self.shared.tx_ready.notify_one();
        Ok(())
    }

    /// Take every packet received since the previous call.
    pub fn receive(&self) -> Vec<Bytes> {
        std::mem::take(&mut *lock(&self.shared.rx))
    }

    /// Packets queued or being transmitted.
    pub fn pending(&self) -> usize {
        let tx = lock(&self.shared.tx);
        tx.queue.len() + tx.in_flight
    }

    /// Wait for queued packets to go out, then stop the workers and release
    /// the hardware and the allocator claim, all within the configured
    /// shutdown timeout.
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
            .drained
            .wait_timeout_while(tx, deadline.drain_left(), |tx| {
                !tx.queue.is_empty() || tx.in_flight > 0
            })
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() {
            warn!(
                abandoned = tx.queue.len() + tx.in_flight,
                timeout = ?self.config.shutdown_timeout,
                "radio queue not drained before shutdown"
            );
        }
        drop(tx);

        let workers = std::mem::take(&mut *lock(&self.workers));
        stop_workers(&self.shared, workers, &deadline);

        if let Some(claim) = lock(&self.claim).take() {
            claim.release();
        }
        info!(channel = self.config.channel, "radio shut down");
    }

    pub fn channel(&self) -> u8 {
        self.config.channel
    }

    pub fn radio_config_path(&self) -> &Path {
        &self.config.radio_config_path
    }

    /// Names of the loaded WDS property groups, in the order they were set.
    pub fn property_names(&self) -> &[String] {
        &self.property_names
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RadioStats {
        let c = &self.shared.counters;
        RadioStats {
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            packets_received: c.packets_received.load(Ordering::Relaxed),
            packets_dropped: c.packets_dropped.load(Ordering::Relaxed),
            tx_failures: c.tx_failures.load(Ordering::Relaxed),
            cts_timeouts: c.cts_timeouts.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Radio {
    fn drop(&mut self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.teardown();
        }
    }
}

impl fmt::Display for Radio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Radio(config = {}, channel = {}, properties = [{}])",
            self.config.radio_config_path.display(),
            self.config.channel,
            self.property_names.join(", ")
        )
    }
}

impl fmt::Debug for Radio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Radio")
            .field("channel", &self.config.channel)
            .field("radio_config_path", &self.config.radio_config_path)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Stop both workers and release the bus, giving up at `deadline`.
fn stop_workers(shared: &Shared, workers: Vec<JoinHandle<()>>, deadline: &ShutdownDeadline) {
    shared.stopping.store(true, Ordering::Release);
    lock(&shared.tx).stop = true;
    shared.tx_ready.notify_all();

    deadline.join_all(workers);
    if !release_bus(shared, deadline) {
        warn!("radio bus still held at shutdown deadline, release deferred");
    }
}

/// Drop the bus once its lock is free. `false` if the deadline passed first.
fn release_bus(shared: &Shared, deadline: &ShutdownDeadline) -> bool {
    loop {
        match shared.bus.try_lock() {
            Ok(mut bus) => {
                drop(bus.take());
                return true;
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                drop(poisoned.into_inner().take());
                return true;
            }
            Err(TryLockError::WouldBlock) if deadline.passed() => return false,
            Err(TryLockError::WouldBlock) => thread::sleep(BUS_RETRY),
        }
    }
}

fn interrupt_loop(mut irq: Box<dyn InterruptLine>, shared: &Shared) {
    while !shared.stopping.load(Ordering::Acquire) {
        match irq.wait_falling_edge(IRQ_POLL) {
            Ok(true) => {
                let mut guard = lock(&shared.bus);
                let Some(bus) = guard.as_mut() else {
                    break;
                };
                if shared.stopping.load(Ordering::Acquire) {
                    break;
                }
                service_interrupt(bus, shared);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "interrupt line failed, receive stopped");
                break;
            }
        }
    }
    drop(irq);
    debug!("radio interrupt worker exiting");
}

fn service_interrupt(bus: &mut Bus, shared: &Shared) {
    let counters = &shared.counters;
    match read_packet(bus, counters) {
        Ok(Some(packet)) => {
            debug!(len = packet.len(), "radio packet received");
            lock(&shared.rx).push(packet);
            counters.packets_received.fetch_add(1, Ordering::Relaxed);
        }
        Ok(None) => {
            counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(error = %err, "radio packet read failed");
        }
    }

    match bus.command(&command::get_int_status()) {
        Ok(true) => {}
        Ok(false) => {
            counters.cts_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => warn!(error = %err, "failed to clear radio interrupts"),
    }
}

fn read_packet(bus: &mut Bus, counters: &Counters) -> Result<Option<Bytes>> {
    bus.send(&[command::PACKET_INFO])?;
    let Some(info) = bus.response(2)? else {
        counters.cts_timeouts.fetch_add(1, Ordering::Relaxed);
        debug!("no CTS after PACKET_INFO, packet abandoned");
        return Ok(None);
    };

    let len = usize::from(u16::from_be_bytes([info[2], info[3]]));
    if len == 0 || len > MAX_PACKET_SIZE {
        debug!(len, "invalid received packet length, RX FIFO cleared");
        if !bus.command(&command::reset_rx_fifo())? {
            counters.cts_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        return Ok(None);
    }

    bus.send(&[command::READ_RX_FIFO])?;
    let Some(data) = bus.response(len)? else {
        counters.cts_timeouts.fetch_add(1, Ordering::Relaxed);
        debug!(len, "no CTS after READ_RX_FIFO, packet abandoned");
        return Ok(None);
    };
    Ok(Some(Bytes::copy_from_slice(&data[2..2 + len])))
}

fn transmit_loop(shared: &Shared, channel: u8) {
    loop {
        let batch: Vec<Bytes> = {
            let mut tx = lock(&shared.tx);
            while tx.queue.is_empty() && !tx.stop {
                tx = shared
                    .tx_ready
                    .wait(tx)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if tx.stop {
                break;
            }
            let batch: Vec<Bytes> = tx.queue.drain(..).collect();
            tx.in_flight = batch.len();
            batch
        };

        transmit_batch(shared, channel, &batch);

        lock(&shared.tx).in_flight = 0;
        shared.drained.notify_all();
    }
    debug!("radio transmit worker exiting");
}

fn transmit_batch(shared: &Shared, channel: u8, batch: &[Bytes]) {
    let counters = &shared.counters;
    for packet in batch {
        if shared.stopping.load(Ordering::Acquire) {
            return;
        }
        let outcome = match lock(&shared.bus).as_mut() {
            Some(bus) => transmit_packet(bus, counters, channel, packet),
            None => return,
        };
        match outcome {
            Ok(true) => {
                counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                debug!(len = packet.len(), channel, "radio packet sent");
            }
            Ok(false) => {
                counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(len = packet.len(), channel, "radio packet dropped, no CTS from chip");
            }
            Err(err) => {
                counters.tx_failures.fetch_add(1, Ordering::Relaxed);
                warn!(len = packet.len(), error = %err, "radio transmit failed");
            }
        }
        let mut tx = lock(&shared.tx);
        tx.in_flight = tx.in_flight.saturating_sub(1);
    }

    if shared.stopping.load(Ordering::Acquire) {
        return;
    }
    let rearmed = match lock(&shared.bus).as_mut() {
        Some(bus) => bus.command(&command::start_rx(channel)),
        None => return,
    };
    match rearmed {
        Ok(true) => {}
        Ok(false) => {
            counters.cts_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => warn!(error = %err, "failed to re-enter RX"),
    }
}

/// Load and start one packet. `Ok(false)` if any step went without CTS.
fn transmit_packet(bus: &mut Bus, counters: &Counters, channel: u8, packet: &[u8]) -> Result<bool> {
    let len = u16::try_from(packet.len()).unwrap_or(u16::MAX);
    let mut acknowledged = true;
    for cmd in [
        command::reset_tx_fifo(),
        command::write_tx_fifo(packet),
        command::start_tx(channel, len),
    ] {
        if !bus.command(&cmd)? {
            counters.cts_timeouts.fetch_add(1, Ordering::Relaxed);
            debug!(command = command::name(cmd[0]), "no CTS, continuing");
            acknowledged = false;
        }
    }
    Ok(acknowledged)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use groundlink_hal::HalError;
    use tempfile::TempPath;

    use super::props::tests::wds_header;
    use super::props::PROPERTY_COUNT;
    use super::sim::SimRadio;
    use super::*;
    use crate::error::ConfigError;

    /// A WDS header with `blocks` property groups, deleted when dropped.
    fn header(blocks: usize) -> TempPath {
        let mut file = tempfile::Builder::new()
            .prefix("groundlink-radio-")
            .suffix(".h")
            .tempfile()
            .unwrap();
        file.write_all(wds_header(blocks).as_bytes()).unwrap();
        file.into_temp_path()
    }

    fn config(header: &Path) -> RadioConfig {
        let mut config = RadioConfig::new(header, 7);
        config.cts_timeout = Duration::from_millis(20);
        config.shutdown_timeout = Duration::from_millis(500);
        config
    }

    fn start_with(config: RadioConfig) -> (Radio, SimRadio, Arc<HandleAllocator>) {
        let allocator = Arc::new(HandleAllocator::new());
        let (hardware, sim) = SimRadio::new();
        let radio = Radio::with_hardware(config, hardware, &allocator).unwrap();
        (radio, sim, allocator)
    }

    /// The property table is read during construction, so the header can go
    /// once the radio is up.
    fn start() -> (Radio, SimRadio, Arc<HandleAllocator>) {
        let header = header(PROPERTY_COUNT);
        start_with(config(&header))
    }

    fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn construction_configures_chip_in_order() {
        let (radio, sim, allocator) = start();
        assert!(allocator.is_claimed(RESOURCE));
        assert_eq!(sim.reset_history(), vec![false, true, false]);

        let opcodes = sim.opcodes();
        assert_eq!(opcodes.len(), 2 + PROPERTY_COUNT + 2 + 1);
        assert_eq!(opcodes[0], command::POWER_UP);
        assert_eq!(opcodes[1], command::GPIO_PIN_CFG);
        assert!(opcodes[2..2 + PROPERTY_COUNT + 2]
            .iter()
            .all(|&op| op == command::SET_PROPERTY));
        assert_eq!(*opcodes.last().unwrap(), command::START_RX);

        let commands = sim.commands();
        assert_eq!(commands[2], vec![0x11, 0x00, 0x03, 0x00, 0x00, 0x01, 0x02]);
        assert_eq!(commands[2 + PROPERTY_COUNT], command::int_ctl_enable());
        assert_eq!(sim.rx_channel(), Some(7));
        assert_eq!(radio.property_names().len(), PROPERTY_COUNT);
    }

    #[test]
    fn wrong_property_count_fails_before_power_up() {
        let allocator = Arc::new(HandleAllocator::new());
        let (hardware, sim) = SimRadio::new();
        let header = header(30);
        let err = Radio::with_hardware(config(&header), hardware, &allocator).unwrap_err();

        assert!(matches!(
            err,
            LinkError::Config(ConfigError::RadioProperties { .. })
        ));
        assert!(err.to_string().contains("found 30"));
        assert!(sim.commands().is_empty());
        assert!(sim.reset_history().is_empty());
        assert!(!allocator.is_claimed(RESOURCE));
    }

    #[test]
    fn silent_chip_fails_construction() {
        let allocator = Arc::new(HandleAllocator::new());
        let (hardware, sim) = SimRadio::new();
        sim.set_responsive(false);

        let header = header(PROPERTY_COUNT);
        let err = Radio::with_hardware(config(&header), hardware, &allocator).unwrap_err();
        assert!(matches!(
            err,
            LinkError::HandshakeTimeout {
                stage: "POWER_UP",
                ..
            }
        ));
        assert_eq!(sim.opcodes(), vec![command::POWER_UP]);
        assert!(sim.is_released());
        assert!(!allocator.is_claimed(RESOURCE));
    }

    #[test]
    fn second_radio_is_refused() {
        let header = header(PROPERTY_COUNT);
        let (radio, _sim, allocator) = start_with(config(&header));
        let (hardware, _other) = SimRadio::new();
        let err = Radio::with_hardware(config(&header), hardware, &allocator).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Hal(HalError::AlreadyAllocated { .. })
        ));

        radio.shutdown().unwrap();
        let (hardware, _again) = SimRadio::new();
        let again = Radio::with_hardware(config(&header), hardware, &allocator).unwrap();
        again.shutdown().unwrap();
    }

    #[test]
    fn transmit_sends_each_packet_then_reenters_rx() {
        let (radio, sim, _allocator) = start();
        radio.transmit(&[b"one".as_ref(), b"two".as_ref()]).unwrap();

        assert!(sim.wait_for_transmitted(2, Duration::from_secs(2)));
        assert_eq!(sim.transmitted(), vec![b"one".to_vec(), b"two".to_vec()]);
        eventually("RX re-armed", || sim.rx_channel() == Some(7));
        eventually("queue drained", || radio.pending() == 0);

        let start_tx: Vec<_> = sim
            .commands()
            .into_iter()
            .filter(|cmd| cmd[0] == command::START_TX)
            .collect();
        assert_eq!(start_tx[0], command::start_tx(7, 3));
        assert_eq!(radio.stats().packets_sent, 2);
    }

    #[test]
    fn transmit_without_cts_counts_drop() {
        let (radio, sim, _allocator) = start();
        sim.set_responsive(false);
        radio.transmit(&[b"void".as_ref()]).unwrap();

        assert!(sim.wait_for_transmitted(1, Duration::from_secs(2)));
        eventually("batch finished", || radio.pending() == 0);
        let stats = radio.stats();
        assert_eq!(stats.packets_dropped, 1);
        assert_eq!(stats.packets_sent, 0);
        assert_eq!(stats.tx_failures, 0);
        assert!(stats.cts_timeouts >= 3);
    }

    #[test]
    fn oversized_packet_rejects_whole_batch() {
        let (radio, sim, _allocator) = start();
        let err = radio
            .transmit(&[vec![0xAA; 64], vec![0xBB; 65]])
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::InvalidPacket {
                index: 1,
                size: 65,
                max: 64
            }
        ));
        assert!(matches!(
            radio.transmit(&[Vec::<u8>::new()]),
            Err(LinkError::InvalidPacket { index: 0, size: 0, .. })
        ));

        assert_eq!(radio.pending(), 0);
        thread::sleep(Duration::from_millis(20));
        assert!(sim.transmitted().is_empty());
    }

    #[test]
    fn interrupt_reads_packet_and_clears_status() {
        let (radio, sim, _allocator) = start();
        sim.inject_packet(b"hello");

        eventually("packet received", || radio.stats().packets_received == 1);
        assert_eq!(radio.receive(), vec![Bytes::from_static(b"hello")]);
        assert!(radio.receive().is_empty());

        eventually("interrupt cleared", || {
            sim.opcodes().last() == Some(&command::GET_INT_STATUS)
        });
        let opcodes = sim.opcodes();
        let tail = &opcodes[opcodes.len() - 3..];
        assert_eq!(
            tail,
            [
                command::PACKET_INFO,
                command::READ_RX_FIFO,
                command::GET_INT_STATUS
            ]
        );
    }

    #[test]
    fn invalid_length_is_dropped() {
        let (radio, sim, _allocator) = start();
        sim.inject_packet(&[0x55; 65]);
        sim.inject_packet(b"ok");

        eventually("valid packet received", || radio.stats().packets_received == 1);
        assert_eq!(radio.receive(), vec![Bytes::from_static(b"ok")]);
        assert_eq!(radio.stats().packets_dropped, 1);
        assert_eq!(sim.rx_pending(), 0);
    }

    #[test]
    fn missing_cts_abandons_packet() {
        let (radio, sim, _allocator) = start();
        sim.set_responsive(false);
        sim.inject_packet(b"lost");

        eventually("packet dropped", || radio.stats().packets_dropped == 1);
        assert!(radio.receive().is_empty());
        assert!(radio.stats().cts_timeouts >= 1);
    }

    #[test]
    fn shutdown_drains_queue_and_releases_hardware() {
        let (radio, sim, allocator) = start();
        radio.transmit(&[b"bye".as_ref()]).unwrap();
        radio.shutdown().unwrap();

        assert_eq!(sim.transmitted(), vec![b"bye".to_vec()]);
        assert!(sim.is_released());
        assert!(!allocator.is_claimed(RESOURCE));
        assert!(radio.is_shutdown());
    }

    #[test]
    fn shutdown_is_bounded_when_chip_stalls() {
        let timeout = Duration::from_millis(50);
        let header = header(PROPERTY_COUNT);
        let mut config = config(&header);
        config.shutdown_timeout = timeout;
        config.cts_timeout = Duration::from_millis(30);
        let (radio, sim, allocator) = start_with(config);

        sim.set_responsive(false);
        let packets: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 8]).collect();
        radio.transmit(&packets).unwrap();

        let started = Instant::now();
        radio.shutdown().unwrap();
        let elapsed = started.elapsed();
        assert!(
            elapsed <= timeout + Duration::from_millis(100),
            "shutdown took {elapsed:?}"
        );
        assert!(sim.transmitted().len() < 10);
        assert!(!allocator.is_claimed(RESOURCE));
    }

    #[test]
    fn shutdown_stops_cts_polling_at_once() {
        let header = header(PROPERTY_COUNT);
        let mut config = config(&header);
        config.cts_timeout = Duration::from_secs(5);
        config.shutdown_timeout = Duration::from_millis(100);
        let (radio, sim, _allocator) = start_with(config);

        sim.set_responsive(false);
        radio.transmit(&[b"stuck".as_ref()]).unwrap();
        eventually("transmitter polling", || sim.cts_polls() > 0 && radio.pending() == 1);

        let started = Instant::now();
        radio.shutdown().unwrap();
        assert!(started.elapsed() <= Duration::from_millis(200));
        assert!(sim.is_released());
    }

    #[test]
    fn misuse_after_shutdown() {
        let (radio, sim, _allocator) = start();
        sim.inject_packet(b"kept");
        eventually("packet received", || radio.stats().packets_received == 1);

        radio.shutdown().unwrap();
        assert!(matches!(
            radio.transmit(&[b"x".as_ref()]),
            Err(LinkError::Shutdown(_))
        ));
        assert!(matches!(
            radio.shutdown(),
            Err(LinkError::AlreadyShutdown(_))
        ));
        assert_eq!(radio.receive(), vec![Bytes::from_static(b"kept")]);
    }

    #[test]
    fn drop_releases_claim() {
        let (radio, sim, allocator) = start();
        drop(radio);
        assert!(sim.is_released());
        assert!(!allocator.is_claimed(RESOURCE));
    }

    #[test]
    fn display_lists_properties() {
        let header = header(PROPERTY_COUNT);
        let (radio, _sim, _allocator) = start_with(config(&header));
        let text = radio.to_string();
        assert!(text.starts_with("Radio(config = "));
        assert!(text.contains("channel = 7"));
        assert!(text.contains("RF_TEST_0_3, RF_TEST_1_3"));
        assert_eq!(radio.channel(), 7);
        assert!(radio.radio_config_path().exists());
    }
}
