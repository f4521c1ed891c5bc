//! CRC16/MODBUS: reflected polynomial 0xA001, initial value 0xFFFF, no final XOR.

use crc::{Crc, CRC_16_MODBUS};

/// Shared CRC engine (table generated at compile time).
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Checksum of `data`.
pub fn checksum(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Checksum of a frame body (`length || payload`) without copying it together.
pub fn body_checksum(length: u8, payload: &[u8]) -> u16 {
    let mut digest = CRC16.digest();
    digest.update(&[length]);
    digest.update(payload);
    digest.finalize()
}
