//! Linux backends on `linux-embedded-hal`: sysfs GPIO lines and spidev devices.
//!
//! The wrappers translate backend errors into [`HalError`] and hand the device
//! back to the kernel when dropped.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

use embedded_hal::digital::{self, InputPin, OutputPin};
use embedded_hal::spi::{self, Operation, SpiDevice};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::sysfs_gpio::{Direction, Edge, PinPoller};
use linux_embedded_hal::{SpidevDevice, SysfsPin};
use tracing::{debug, info, warn};

use crate::error::{HalError, Result};
use crate::traits::InterruptLine;

fn gpio_error<E: Debug>(pin: u64) -> impl FnOnce(E) -> HalError {
    move |err| HalError::Gpio {
        pin,
        detail: format!("{err:?}"),
    }
}

/// A pin exported through `/sys/class/gpio`, unexported on drop if we exported it.
struct ExportedPin {
    pin: SysfsPin,
    number: u64,
    exported_here: bool,
}

impl ExportedPin {
    fn export(number: u64, direction: Direction) -> Result<Self> {
        let pin = SysfsPin::new(number);
        let exported_here = !pin.is_exported();
        pin.export().map_err(gpio_error(number))?;
        let exported = Self {
            pin,
            number,
            exported_here,
        };
        exported
            .pin
            .set_direction(direction)
            .map_err(gpio_error(number))?;
        Ok(exported)
    }
}

impl Drop for ExportedPin {
    fn drop(&mut self) {
        if !self.exported_here {
            return;
        }
        match self.pin.unexport() {
            Ok(()) => debug!(pin = self.number, "gpio unexported"),
            Err(err) => warn!(pin = self.number, error = ?err, "failed to unexport gpio"),
        }
    }
}

/// A sysfs GPIO output, exported driven low.
pub struct SysfsOutput {
    line: ExportedPin,
}

impl SysfsOutput {
    pub fn export(pin: u32) -> Result<Self> {
        let line = ExportedPin::export(u64::from(pin), Direction::Low)?;
        info!(pin, "gpio configured as output");
        Ok(Self { line })
    }
}

impl digital::ErrorType for SysfsOutput {
    type Error = HalError;
}

impl OutputPin for SysfsOutput {
    fn set_low(&mut self) -> Result<()> {
        let number = self.line.number;
        self.line.pin.set_low().map_err(gpio_error(number))
    }

    fn set_high(&mut self) -> Result<()> {
        let number = self.line.number;
        self.line.pin.set_high().map_err(gpio_error(number))
    }
}

/// A sysfs GPIO input with falling-edge notification.
pub struct SysfsInterrupt {
    poller: PinPoller,
    line: ExportedPin,
}

impl SysfsInterrupt {
    pub fn export(pin: u32) -> Result<Self> {
        let number = u64::from(pin);
        let line = ExportedPin::export(number, Direction::In)?;
        line.pin
            .set_edge(Edge::FallingEdge)
            .map_err(gpio_error(number))?;
        let poller = line.pin.get_poller().map_err(gpio_error(number))?;
        info!(pin, "gpio configured for falling-edge interrupts");
        Ok(Self { poller, line })
    }
}

impl Drop for SysfsInterrupt {
    fn drop(&mut self) {
        if let Err(err) = self.line.pin.set_edge(Edge::NoInterrupt) {
            warn!(pin = self.line.number, error = ?err, "failed to disable gpio edge");
        }
    }
}

impl digital::ErrorType for SysfsInterrupt {
    type Error = HalError;
}

impl InputPin for SysfsInterrupt {
    fn is_high(&mut self) -> Result<bool> {
        let number = self.line.number;
        self.line.pin.is_high().map_err(gpio_error(number))
    }

    fn is_low(&mut self) -> Result<bool> {
        let number = self.line.number;
        self.line.pin.is_low().map_err(gpio_error(number))
    }
}

impl InterruptLine for SysfsInterrupt {
    fn wait_falling_edge(&mut self, timeout: Duration) -> Result<bool> {
        let timeout_ms = isize::try_from(timeout.as_millis()).unwrap_or(isize::MAX);
        match self.poller.poll(timeout_ms) {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(err) => Err(gpio_error(self.line.number)(err)),
        }
    }
}

/// An spidev node in mode 0, 8-bit words.
pub struct SpiPort {
    path: PathBuf,
    device: SpidevDevice,
}

impl SpiPort {
    pub fn open(path: &Path, speed_hz: u32) -> Result<Self> {
        let spi_error = |err: &dyn Debug| HalError::Spi {
            path: path.to_path_buf(),
            detail: format!("{err:?}"),
        };
        let mut device = SpidevDevice::open(path).map_err(|err| spi_error(&err))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        device.configure(&options).map_err(|err| spi_error(&err))?;
        info!(path = %path.display(), speed_hz, "spi device opened");
        Ok(Self {
            path: path.to_path_buf(),
            device,
        })
    }
}

impl Drop for SpiPort {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "spi device closed");
    }
}

impl spi::ErrorType for SpiPort {
    type Error = HalError;
}

impl SpiDevice<u8> for SpiPort {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<()> {
        self.device
            .transaction(operations)
            .map_err(|err| HalError::Spi {
                path: self.path.clone(),
                detail: format!("{err:?}"),
            })
    }
}
