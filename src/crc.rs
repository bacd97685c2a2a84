//! CRC-16/Modbus.
//!
//! Reflected polynomial 0xA001 (reversed 0x8005), initial value 0xFFFF,
//! no final XOR. Emitted on the wire low byte first.

use crc::{Crc, Digest, CRC_16_MODBUS};

/// CRC calculator shared by the RTU codec and tests.
pub static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Checksum over a complete buffer.
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Start an incremental CRC computation; feed it with `Digest::update`
/// and close with `Digest::finalize`.
#[inline]
pub fn digest() -> Digest<'static, u16> {
    CRC16.digest()
}

/// CRC in wire order: low byte first.
#[inline]
pub fn to_wire(crc: u16) -> [u8; 2] {
    crc.to_le_bytes()
}

/// Read a wire-order (little-endian) CRC.
#[inline]
pub fn from_wire(bytes: [u8; 2]) -> u16 {
    u16::from_le_bytes(bytes)
}
