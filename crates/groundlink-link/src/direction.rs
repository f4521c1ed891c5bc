use std::thread;
use std::time::Duration;

use embedded_hal::digital::OutputPin;
use groundlink_hal::OutputLine;
use tracing::warn;

use crate::error::Result;

/// Settling time after switching the transceiver direction.
pub const DIRECTION_SETTLE: Duration = Duration::from_millis(1);

/// DE/RE control of a half-duplex RS-485 transceiver.
///
/// DE enables the driver when high; RE enables the receiver when low. Dropping
/// the control returns the transceiver to receive and releases both lines.
pub(crate) struct DirectionControl {
    de: OutputLine,
    re: Option<OutputLine>,
    settle: Duration,
    /// Disable the receiver while transmitting.
    mute_receiver: bool,
    transmitting: bool,
}

impl DirectionControl {
    /// Both lines switch together; the receiver is off while transmitting.
    pub(crate) fn half_duplex(de: OutputLine, re: Option<OutputLine>) -> Result<Self> {
        Self::new(de, re, DIRECTION_SETTLE, true)
    }

    /// Only DE toggles; the receiver stays enabled.
    pub(crate) fn driver_only(de: OutputLine, re: Option<OutputLine>) -> Result<Self> {
        Self::new(de, re, Duration::ZERO, false)
    }

    fn new(de: OutputLine, re: Option<OutputLine>, settle: Duration, mute_receiver: bool) -> Result<Self> {
        let mut control = Self {
            de,
            re,
            settle,
            mute_receiver,
            transmitting: false,
        };
        control.receive()?;
        Ok(control)
    }

    pub(crate) fn transmit(&mut self) -> Result<()> {
        self.transmitting = true;
        self.de.set_high()?;
        if self.mute_receiver {
            if let Some(re) = self.re.as_mut() {
                re.set_high()?;
            }
        }
        self.wait_settle();
        Ok(())
    }

    pub(crate) fn receive(&mut self) -> Result<()> {
        self.de.set_low()?;
        if let Some(re) = self.re.as_mut() {
            re.set_low()?;
        }
        self.transmitting = false;
        self.wait_settle();
        Ok(())
    }

    fn wait_settle(&self) {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }
}

impl Drop for DirectionControl {
    fn drop(&mut self) {
        if self.transmitting {
            if let Err(err) = self.receive() {
                warn!(error = %err, "failed to disable RS485 driver on release");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use groundlink_hal::sim::SimLine;

    use super::*;

    #[test]
    fn half_duplex_switches_both_lines() {
        let (de, de_monitor) = SimLine::pair();
        let (re, re_monitor) = SimLine::pair();
        let mut control = DirectionControl::half_duplex(Box::new(de), Some(Box::new(re))).unwrap();

        control.transmit().unwrap();
        assert!(de_monitor.level());
        assert!(re_monitor.level());

        control.receive().unwrap();
        assert_eq!(de_monitor.history(), vec![false, true, false]);
        assert_eq!(re_monitor.history(), vec![false, true, false]);

        drop(control);
        assert!(de_monitor.is_released());
        assert!(re_monitor.is_released());
        assert_eq!(de_monitor.history().len(), 3);
    }

    #[test]
    fn drop_while_transmitting_disables_driver() {
        let (de, de_monitor) = SimLine::pair();
        let (re, re_monitor) = SimLine::pair();
        let mut control = DirectionControl::half_duplex(Box::new(de), Some(Box::new(re))).unwrap();
        control.transmit().unwrap();

        drop(control);
        assert!(!de_monitor.level());
        assert!(!re_monitor.level());
        assert_eq!(de_monitor.history(), vec![false, true, false]);
        assert!(de_monitor.is_released());
    }

    #[test]
    fn driver_only_keeps_receiver_enabled() {
        let (de, de_monitor) = SimLine::pair();
        let (re, re_monitor) = SimLine::pair();
        let mut control = DirectionControl::driver_only(Box::new(de), Some(Box::new(re))).unwrap();

        control.transmit().unwrap();
        assert!(de_monitor.level());
        assert!(!re_monitor.level());
        assert_eq!(re_monitor.history(), vec![false]);
    }

    #[test]
    fn tied_lines_use_de_only() {
        let (de, de_monitor) = SimLine::pair();
        let mut control = DirectionControl::half_duplex(Box::new(de), None).unwrap();
        control.transmit().unwrap();
        control.receive().unwrap();
        assert_eq!(de_monitor.history(), vec![false, true, false]);
    }
}
