//! RS-485 and packet radio link layer for ground vehicle telemetry.
//!
//! groundlink moves opaque byte payloads between a vehicle controller and a
//! remote compute unit over a half-duplex RS-485 bus or an Si446x packet radio.
//!
//! # Crate Structure
//!
//! - [`hal`]: hardware capabilities (serial, GPIO, SPI) with simulated and Linux backends
//! - [`frame`]: CRC16 start-marker framing
//! - [`link`]: the framed serial, raw bus and radio transports

/// Re-export hardware types.
pub mod hal {
    pub use groundlink_hal::*;
}

/// Re-export frame types.
pub mod frame {
    pub use groundlink_frame::*;
}

/// Re-export transport types.
pub mod link {
    pub use groundlink_link::*;
}
