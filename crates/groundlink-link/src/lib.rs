//! Link-layer transports for the groundlink telemetry link.
//!
//! Three transports move opaque byte payloads between the controller and the
//! remote compute unit:
//!
//! - [`FramedSerial`]: CRC-framed packets over half-duplex RS-485;
//! - [`RawBus`]: an unframed byte stream over the same bus;
//! - [`Radio`]: 1..=64 byte packets over an Si446x transceiver.
//!
//! Each one owns its hardware from construction until `shutdown` (or drop),
//! runs its own worker threads, and never blocks callers on the wire except
//! where documented.

mod direction;
mod worker;

pub mod bus;
pub mod config;
pub mod error;
pub mod framed;
pub mod hardware;
pub mod radio;

pub use bus::{BusStats, RawBus};
pub use config::{FramedSerialConfig, LinkConfig, RadioConfig, RawBusConfig, BAUD_RANGE};
pub use direction::DIRECTION_SETTLE;
pub use error::{ConfigError, LinkError, Result};
pub use framed::{FramedSerial, FramedStats};
pub use hardware::{SerialLine, SimSerialLine};
pub use radio::props::{RadioProperty, PROPERTY_COUNT};
pub use radio::sim::SimRadio;
pub use radio::{Radio, RadioHardware, RadioStats};
