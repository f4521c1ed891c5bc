//! Simulated hardware.
//!
//! Each simulated device comes as a pair: the half handed to a transport
//! (implementing the `embedded-hal` trait) and a monitor/peer half the caller
//! keeps to inject input and observe output. Dropping the transport half marks
//! the device released.

use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::error::{HalError, Result};
use crate::traits::{InterruptLine, SerialStream};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct SimPortState {
    inbound: VecDeque<u8>,
    read_errors: VecDeque<ErrorKind>,
    writes: Vec<Vec<u8>>,
}

#[derive(Default)]
struct SimPort {
    state: Mutex<SimPortState>,
    readable: Condvar,
    written: Condvar,
}

/// The transport-facing half of a simulated UART.
#[derive(Clone)]
pub struct SimSerial {
    port: Arc<SimPort>,
    read_timeout: Duration,
}

impl SimSerial {
    /// Open a simulated UART. Returns the stream and the peer used to drive it.
    pub fn open() -> (SerialStream, SimSerialPeer) {
        let port = Arc::new(SimPort::default());
        let sim = SimSerial {
            port: Arc::clone(&port),
            read_timeout: Duration::from_millis(50),
        };
        (SerialStream::from_sim(sim), SimSerialPeer { port })
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub(crate) fn bytes_to_read(&self) -> u32 {
        u32::try_from(lock(&self.port.state).inbound.len()).unwrap_or(u32::MAX)
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.read_timeout;
        let mut state = lock(&self.port.state);
        loop {
            if let Some(kind) = state.read_errors.pop_front() {
                return Err(io::Error::new(kind, "simulated read failure"));
            }
            if !state.inbound.is_empty() {
                let n = buf.len().min(state.inbound.len());
                for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::from(ErrorKind::TimedOut));
            }
            state = self
                .port
                .readable
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.port.state).writes.push(buf.to_vec());
        self.port.written.notify_all();
        Ok(buf.len())
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The far end of a simulated UART.
#[derive(Clone)]
pub struct SimSerialPeer {
    port: Arc<SimPort>,
}

impl SimSerialPeer {
    /// Make `bytes` available to the stream's reads.
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.port.state).inbound.extend(bytes.iter().copied());
        self.port.readable.notify_all();
    }

    /// Make the next read fail with `kind`.
    pub fn inject_read_error(&self, kind: ErrorKind) {
        lock(&self.port.state).read_errors.push_back(kind);
        self.port.readable.notify_all();
    }

    /// Every `write` call made on the stream, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.port.state).writes.clone()
    }

    /// All written bytes concatenated.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.port.state).writes.concat()
    }

    /// Wait until at least `len` bytes have been written in total.
    pub fn wait_for_written(&self, len: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.port.state);
        loop {
            let total: usize = state.writes.iter().map(Vec::len).sum();
            if total >= len {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .port
                .written
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[derive(Default)]
struct SimLineState {
    level: bool,
    history: Vec<bool>,
    released: bool,
}

/// A simulated output line. Dropping it marks the line released.
pub struct SimLine {
    state: Arc<Mutex<SimLineState>>,
}

impl SimLine {
    /// Create a line (initially low) and its monitor.
    pub fn pair() -> (SimLine, SimLineMonitor) {
        let state = Arc::new(Mutex::new(SimLineState::default()));
        (
            SimLine {
                state: Arc::clone(&state),
            },
            SimLineMonitor { state },
        )
    }

    fn drive(&mut self, high: bool) -> Result<()> {
        let mut state = lock(&self.state);
        state.level = high;
        state.history.push(high);
        Ok(())
    }
}

impl ErrorType for SimLine {
    type Error = HalError;
}

impl OutputPin for SimLine {
    fn set_low(&mut self) -> Result<()> {
        self.drive(false)
    }

    fn set_high(&mut self) -> Result<()> {
        self.drive(true)
    }
}

impl Drop for SimLine {
    fn drop(&mut self) {
        lock(&self.state).released = true;
    }
}

/// Observes a [`SimLine`].
#[derive(Clone)]
pub struct SimLineMonitor {
    state: Arc<Mutex<SimLineState>>,
}

impl SimLineMonitor {
    pub fn level(&self) -> bool {
        lock(&self.state).level
    }

    /// Every level written, in order.
    pub fn history(&self) -> Vec<bool> {
        lock(&self.state).history.clone()
    }

    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }
}

#[derive(Default)]
struct SimEdgeState {
    pending: usize,
    released: bool,
}

#[derive(Default)]
struct SimEdges {
    state: Mutex<SimEdgeState>,
    fired: Condvar,
}

/// A simulated interrupt input.
///
/// The line reads low while fired edges are waiting to be taken.
pub struct SimInterrupt {
    edges: Arc<SimEdges>,
}

impl SimInterrupt {
    /// Create an interrupt line and the trigger that fires it.
    pub fn pair() -> (SimInterrupt, SimInterruptTrigger) {
        let edges = Arc::new(SimEdges::default());
        (
            SimInterrupt {
                edges: Arc::clone(&edges),
            },
            SimInterruptTrigger { edges },
        )
    }
}

impl ErrorType for SimInterrupt {
    type Error = HalError;
}

impl InputPin for SimInterrupt {
    fn is_high(&mut self) -> Result<bool> {
        Ok(lock(&self.edges.state).pending == 0)
    }

    fn is_low(&mut self) -> Result<bool> {
        Ok(lock(&self.edges.state).pending > 0)
    }
}

impl InterruptLine for SimInterrupt {
    fn wait_falling_edge(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.edges.state);
        loop {
            if state.pending > 0 {
                state.pending -= 1;
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self
                .edges
                .fired
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Drop for SimInterrupt {
    fn drop(&mut self) {
        lock(&self.edges.state).released = true;
    }
}

/// Fires edges on a [`SimInterrupt`].
#[derive(Clone)]
pub struct SimInterruptTrigger {
    edges: Arc<SimEdges>,
}

impl SimInterruptTrigger {
    /// Signal one falling edge.
    pub fn fire(&self) {
        lock(&self.edges.state).pending += 1;
        self.edges.fired.notify_all();
    }

    pub fn is_released(&self) -> bool {
        lock(&self.edges.state).released
    }
}
