//! Hardware capability layer for groundlink transports.
//!
//! Transports never touch device nodes directly. They are handed:
//! - a [`SerialStream`] for UART traffic,
//! - [`OutputLine`]s (boxed `embedded_hal` output pins) for direction-control
//!   and reset GPIOs,
//! - an [`InterruptLine`] for edge-triggered events,
//! - an [`SpiHandle`] (a boxed `embedded_hal` SPI device) for command
//!   transactions.
//!
//! Every capability has a simulated implementation in [`sim`] so transports can
//! run without hardware, and a Linux implementation in `linux` built on
//! `linux-embedded-hal`. Dropping a handle releases the device. Exclusive
//! resources are claimed through a [`HandleAllocator`].

pub mod alloc;
pub mod error;
pub mod serial;
pub mod sim;
pub mod traits;

#[cfg(target_os = "linux")]
pub mod linux;

pub use alloc::{HandleAllocator, HandleClaim};
pub use error::{HalError, Result};
pub use serial::{DataBits, Parity, SerialSettings, StopBits};
pub use traits::{InterruptLine, OutputLine, SerialStream, SpiHandle};
