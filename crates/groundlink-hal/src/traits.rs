use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

use crate::error::{HalError, Result};
use crate::sim::SimSerial;

/// A GPIO output handed to a transport (direction control, reset).
///
/// Dropping the handle gives the line back to the system.
pub type OutputLine = Box<dyn OutputPin<Error = HalError> + Send>;

/// A chip-select framed SPI device. Dropping it closes the device.
pub type SpiHandle = Box<dyn SpiDevice<u8, Error = HalError> + Send>;

/// A GPIO input watched for falling edges (e.g. a radio's NIRQ output).
///
/// Dropping the line stops edge detection and releases it.
pub trait InterruptLine: InputPin<Error = HalError> + Send {
    /// Block until a falling edge is observed or `timeout` elapses.
    ///
    /// Returns `Ok(true)` for an edge and `Ok(false)` on timeout.
    fn wait_falling_edge(&mut self, timeout: Duration) -> Result<bool>;
}

/// An open UART implementing Read + Write.
///
/// Reads block for at most the configured read timeout and then fail with
/// [`ErrorKind::TimedOut`]; [`SerialStream::read_available`] folds that into
/// `Ok(0)` so worker loops can treat the timeout as a readiness poll.
pub struct SerialStream {
    inner: SerialStreamInner,
}

enum SerialStreamInner {
    Port(Box<dyn serialport::SerialPort>),
    Sim(SimSerial),
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialStreamInner::Port(port) => port.read(buf),
            SerialStreamInner::Sim(sim) => sim.read(buf),
        }
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialStreamInner::Port(port) => port.write(buf),
            SerialStreamInner::Sim(sim) => sim.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            SerialStreamInner::Port(port) => port.flush(),
            SerialStreamInner::Sim(sim) => sim.flush(),
        }
    }
}

impl SerialStream {
    pub(crate) fn from_port(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            inner: SerialStreamInner::Port(port),
        }
    }

    pub(crate) fn from_sim(sim: SimSerial) -> Self {
        Self {
            inner: SerialStreamInner::Sim(sim),
        }
    }

    /// Read whatever is available, waiting at most one read timeout.
    ///
    /// Returns `Ok(0)` when nothing arrived before the timeout.
    pub fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::TimedOut || err.kind() == ErrorKind::WouldBlock =>
                {
                    return Ok(0)
                }
                Err(err) => return Err(HalError::Io(err)),
            }
        }
    }

    /// Set how long a read may block before timing out.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        match &mut self.inner {
            SerialStreamInner::Port(port) => {
                let name = port.name().unwrap_or_default();
                port.set_timeout(timeout)
                    .map_err(|source| HalError::Serial { port: name, source })
            }
            SerialStreamInner::Sim(sim) => {
                sim.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Number of received bytes waiting in the driver buffer.
    pub fn bytes_to_read(&self) -> Result<u32> {
        match &self.inner {
            SerialStreamInner::Port(port) => {
                port.bytes_to_read().map_err(|source| HalError::Serial {
                    port: port.name().unwrap_or_default(),
                    source,
                })
            }
            SerialStreamInner::Sim(sim) => Ok(sim.bytes_to_read()),
        }
    }

    /// Try to clone this stream (a second handle onto the same port).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            SerialStreamInner::Port(port) => {
                let cloned = port.try_clone().map_err(|source| HalError::Serial {
                    port: port.name().unwrap_or_default(),
                    source,
                })?;
                Ok(Self::from_port(cloned))
            }
            SerialStreamInner::Sim(sim) => Ok(Self::from_sim(sim.clone())),
        }
    }

    /// Port name for diagnostics.
    pub fn name(&self) -> String {
        match &self.inner {
            SerialStreamInner::Port(port) => port.name().unwrap_or_else(|| "serial".to_string()),
            SerialStreamInner::Sim(_) => "sim".to_string(),
        }
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            SerialStreamInner::Port(port) => f
                .debug_struct("SerialStream")
                .field("type", &"port")
                .field("name", &port.name())
                .finish(),
            SerialStreamInner::Sim(_) => f.debug_struct("SerialStream").field("type", &"sim").finish(),
        }
    }
}
