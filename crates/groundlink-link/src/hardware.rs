//! Opening the physical devices a transport needs.
//!
//! Every handle returned here releases its device when dropped, so a partial
//! open that fails part way gives back what it already took.

use groundlink_hal::sim::{SimLine, SimLineMonitor, SimSerial, SimSerialPeer};
use groundlink_hal::{InterruptLine, OutputLine, SerialSettings, SerialStream, SpiHandle};

use crate::error::Result;

/// A UART plus the direction-control lines of its RS-485 transceiver.
pub struct SerialLine {
    pub serial: SerialStream,
    pub de: OutputLine,
    /// `None` when RE is tied to DE.
    pub re: Option<OutputLine>,
}

impl SerialLine {
    /// Open the UART and export both direction lines.
    pub fn open(settings: &SerialSettings, de_pin: u32, re_pin: u32) -> Result<Self> {
        Self::open_with(de_pin, re_pin, output_line, || Ok(settings.open()?))
    }

    /// Assemble a line from the given openers, DE first, then RE, then the UART.
    pub(crate) fn open_with(
        de_pin: u32,
        re_pin: u32,
        mut line: impl FnMut(u32) -> Result<OutputLine>,
        serial: impl FnOnce() -> Result<SerialStream>,
    ) -> Result<Self> {
        let de = line(de_pin)?;
        let re = if re_pin == de_pin {
            None
        } else {
            Some(line(re_pin)?)
        };
        let serial = serial()?;
        Ok(Self { serial, de, re })
    }

    /// A simulated line with monitors on DE and RE.
    pub fn simulated() -> (Self, SimSerialLine) {
        let (serial, peer) = SimSerial::open();
        let (de, de_monitor) = SimLine::pair();
        let (re, re_monitor) = SimLine::pair();
        (
            Self {
                serial,
                de: Box::new(de),
                re: Some(Box::new(re)),
            },
            SimSerialLine {
                peer,
                de: de_monitor,
                re: re_monitor,
            },
        )
    }
}

impl std::fmt::Debug for SerialLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLine")
            .field("serial", &self.serial)
            .field("separate_re", &self.re.is_some())
            .finish()
    }
}

/// Test-side handles for [`SerialLine::simulated`].
#[derive(Clone)]
pub struct SimSerialLine {
    pub peer: SimSerialPeer,
    pub de: SimLineMonitor,
    pub re: SimLineMonitor,
}

/// Export `pin` as an output driven low.
pub fn output_line(pin: u32) -> Result<OutputLine> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(groundlink_hal::linux::SysfsOutput::export(pin)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(unsupported("gpio", pin).into())
    }
}

/// Export `pin` as a falling-edge interrupt input.
pub fn interrupt_line(pin: u32) -> Result<Box<dyn InterruptLine>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(groundlink_hal::linux::SysfsInterrupt::export(pin)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(unsupported("gpio", pin).into())
    }
}

/// Open an spidev node.
pub fn spi_device(path: &std::path::Path, speed_hz: u32) -> Result<SpiHandle> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(groundlink_hal::linux::SpiPort::open(path, speed_hz)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = speed_hz;
        Err(groundlink_hal::HalError::Unsupported {
            setting: "spi",
            detail: format!("{} requires Linux spidev", path.display()),
        }
        .into())
    }
}

#[cfg(not(target_os = "linux"))]
fn unsupported(setting: &'static str, pin: u32) -> groundlink_hal::HalError {
    groundlink_hal::HalError::Unsupported {
        setting,
        detail: format!("pin {pin} requires Linux sysfs GPIO"),
    }
}
