//! A simulated Si446x behind an `embedded-hal` [`SpiDevice`].
//!
//! The simulation follows the command/response cycle closely enough to drive
//! [`Radio`](super::Radio) end to end: commands are logged, `READ_CMD_BUFF`
//! reports CTS and the pending response, the TX FIFO collects packets until
//! `START_TX`, and injected packets are served through `PACKET_INFO` and
//! `READ_RX_FIFO` after firing the interrupt line.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use embedded_hal::spi::{ErrorType, Operation, SpiDevice};
use groundlink_hal::sim::{SimInterrupt, SimInterruptTrigger, SimLine, SimLineMonitor};
use groundlink_hal::HalError;

use super::command::{self, CTS_READY};
use super::RadioHardware;
use crate::worker::lock;

#[derive(Default)]
struct ChipState {
    responsive: bool,
    released: bool,
    commands: Vec<Vec<u8>>,
    cts_polls: u64,
    response: Vec<u8>,
    tx_fifo: Vec<u8>,
    transmitted: Vec<Vec<u8>>,
    rx_pending: VecDeque<Vec<u8>>,
    rx_channel: Option<u8>,
}

impl ChipState {
    fn execute(&mut self, buf: &mut [u8]) {
        let Some(&opcode) = buf.first() else {
            return;
        };
        if opcode == command::READ_CMD_BUFF {
            self.cts_polls += 1;
            self.read_cmd_buff(buf);
            return;
        }

        self.commands.push(buf.to_vec());
        self.response.clear();
        match opcode {
            command::FIFO_INFO => {
                let arg = buf.get(1).copied().unwrap_or(0);
                if arg & command::FIFO_RESET_TX != 0 {
                    self.tx_fifo.clear();
                }
                if arg & command::FIFO_RESET_RX != 0 {
                    self.rx_pending.pop_front();
                }
            }
            command::WRITE_TX_FIFO => self.tx_fifo.extend_from_slice(&buf[1..]),
            command::START_TX if buf.len() >= 5 => {
                let len = usize::from(u16::from_be_bytes([buf[3], buf[4]])).min(self.tx_fifo.len());
                let packet: Vec<u8> = self.tx_fifo.drain(..len).collect();
                self.transmitted.push(packet);
                self.rx_channel = None;
            }
            command::START_RX if buf.len() >= 2 => self.rx_channel = Some(buf[1]),
            command::PACKET_INFO => {
                let len = self.rx_pending.front().map_or(0, Vec::len);
                let len = u16::try_from(len).unwrap_or(u16::MAX);
                self.response = len.to_be_bytes().to_vec();
            }
            command::READ_RX_FIFO => {
                self.response = self.rx_pending.pop_front().unwrap_or_default();
            }
            _ => {}
        }
    }

    fn read_cmd_buff(&mut self, buf: &mut [u8]) {
        if !self.responsive {
            buf[1..].fill(0x00);
            return;
        }
        if let Some(cts) = buf.get_mut(1) {
            *cts = CTS_READY;
        }
        let start = 2.min(buf.len());
        let body = &mut buf[start..];
        let n = body.len().min(self.response.len());
        body[..n].copy_from_slice(&self.response[..n]);
        body[n..].fill(0x00);
    }
}

#[derive(Default)]
struct Chip {
    state: Mutex<ChipState>,
    transmitted: Condvar,
}

/// The SPI side of the simulated chip. Each operation is one command.
struct SimSpi {
    chip: Arc<Chip>,
}

impl ErrorType for SimSpi {
    type Error = HalError;
}

impl SpiDevice<u8> for SimSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> groundlink_hal::Result<()> {
        let mut state = lock(&self.chip.state);
        let before = state.transmitted.len();
        for operation in operations.iter_mut() {
            match operation {
                Operation::TransferInPlace(buf) => state.execute(buf),
                Operation::Write(bytes) => state.execute(&mut bytes.to_vec()),
                Operation::Transfer(read, write) => {
                    let mut buf = write.to_vec();
                    buf.resize(read.len().max(write.len()), 0x00);
                    state.execute(&mut buf);
                    let n = read.len();
                    read.copy_from_slice(&buf[..n]);
                }
                Operation::Read(buf) => buf.fill(0x00),
                Operation::DelayNs(_) => {}
            }
        }
        if state.transmitted.len() != before {
            self.chip.transmitted.notify_all();
        }
        Ok(())
    }
}

impl Drop for SimSpi {
    fn drop(&mut self) {
        lock(&self.chip.state).released = true;
    }
}

/// Test-side handle on a simulated radio.
#[derive(Clone)]
pub struct SimRadio {
    chip: Arc<Chip>,
    reset: SimLineMonitor,
    irq: SimInterruptTrigger,
}

impl SimRadio {
    /// Create simulated radio hardware and the handle that observes it.
    pub fn new() -> (RadioHardware, SimRadio) {
        let chip = Arc::new(Chip::default());
        lock(&chip.state).responsive = true;
        let (reset, reset_monitor) = SimLine::pair();
        let (irq, trigger) = SimInterrupt::pair();
        (
            RadioHardware {
                spi: Box::new(SimSpi {
                    chip: Arc::clone(&chip),
                }),
                reset: Box::new(reset),
                irq: Box::new(irq),
            },
            SimRadio {
                chip,
                reset: reset_monitor,
                irq: trigger,
            },
        )
    }

    /// Queue a received packet and pull the interrupt line.
    pub fn inject_packet(&self, packet: &[u8]) {
        lock(&self.chip.state).rx_pending.push_back(packet.to_vec());
        self.irq.fire();
    }

    /// Whether `READ_CMD_BUFF` reports clear-to-send.
    pub fn set_responsive(&self, responsive: bool) {
        lock(&self.chip.state).responsive = responsive;
    }

    /// Every command sent, excluding `READ_CMD_BUFF` polls.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        lock(&self.chip.state).commands.clone()
    }

    /// Opcodes of [`SimRadio::commands`], in order.
    pub fn opcodes(&self) -> Vec<u8> {
        lock(&self.chip.state)
            .commands
            .iter()
            .filter_map(|cmd| cmd.first().copied())
            .collect()
    }

    pub fn cts_polls(&self) -> u64 {
        lock(&self.chip.state).cts_polls
    }

    /// Packets sent over the air, in order.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        lock(&self.chip.state).transmitted.clone()
    }

    /// Wait until at least `count` packets have been transmitted.
    pub fn wait_for_transmitted(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.chip.state);
        while state.transmitted.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .chip
                .transmitted
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Channel of the last `START_RX`, or `None` while transmitting.
    pub fn rx_channel(&self) -> Option<u8> {
        lock(&self.chip.state).rx_channel
    }

    /// Packets injected but not yet read out.
    pub fn rx_pending(&self) -> usize {
        lock(&self.chip.state).rx_pending.len()
    }

    pub fn reset_history(&self) -> Vec<bool> {
        self.reset.history()
    }

    /// Whether the SPI device, reset line and interrupt line have all been dropped.
    pub fn is_released(&self) -> bool {
        lock(&self.chip.state).released && self.reset.is_released() && self.irq.is_released()
    }
}

#[cfg(test)]
mod tests {
    use groundlink_hal::InterruptLine;

    use super::*;

    #[test]
    fn cts_reflects_responsiveness() {
        let (mut hw, sim) = SimRadio::new();
        let mut poll = command::read_cmd_buff(0);
        hw.spi.transfer_in_place(&mut poll).unwrap();
        assert_eq!(poll[1], CTS_READY);

        sim.set_responsive(false);
        let mut poll = command::read_cmd_buff(0);
        hw.spi.transfer_in_place(&mut poll).unwrap();
        assert_eq!(poll[1], 0x00);
        assert_eq!(sim.cts_polls(), 2);
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn short_poll_without_response_bytes() {
        let (mut hw, _sim) = SimRadio::new();
        let mut poll = vec![command::READ_CMD_BUFF, 0x00];
        hw.spi.transfer_in_place(&mut poll).unwrap();
        assert_eq!(poll, vec![command::READ_CMD_BUFF, CTS_READY]);
    }

    #[test]
    fn tx_fifo_feeds_start_tx() {
        let (mut hw, sim) = SimRadio::new();
        hw.spi.write(&command::reset_tx_fifo()).unwrap();
        hw.spi.write(&command::write_tx_fifo(b"abc")).unwrap();
        hw.spi.transfer_in_place(&mut command::start_tx(3, 3)).unwrap();
        assert_eq!(sim.transmitted(), vec![b"abc".to_vec()]);
        assert_eq!(
            sim.opcodes(),
            vec![command::FIFO_INFO, command::WRITE_TX_FIFO, command::START_TX]
        );
    }

    #[test]
    fn injected_packet_is_served_by_packet_info_and_fifo_read() {
        let (mut hw, sim) = SimRadio::new();
        sim.inject_packet(b"hi");
        assert!(hw.irq.wait_falling_edge(Duration::from_millis(10)).unwrap());

        hw.spi.transfer_in_place(&mut [command::PACKET_INFO]).unwrap();
        let mut info = command::read_cmd_buff(2);
        hw.spi.transfer_in_place(&mut info).unwrap();
        assert_eq!(info, vec![0x44, CTS_READY, 0x00, 0x02]);

        hw.spi.transfer_in_place(&mut [command::READ_RX_FIFO]).unwrap();
        let mut data = command::read_cmd_buff(2);
        hw.spi.transfer_in_place(&mut data).unwrap();
        assert_eq!(&data[2..], b"hi");
        assert_eq!(sim.rx_pending(), 0);
    }

    #[test]
    fn dropping_hardware_releases_everything() {
        let (hw, sim) = SimRadio::new();
        assert!(!sim.is_released());
        let RadioHardware { spi, reset, irq } = hw;
        drop(spi);
        drop(reset);
        assert!(!sim.is_released());
        drop(irq);
        assert!(sim.is_released());
    }
}
