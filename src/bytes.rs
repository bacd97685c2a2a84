//! Byte-level codec helpers.
//!
//! Modbus puts multi-byte fields on the wire big-endian and packs bit data
//! LSB-first within each byte: bit `i` of a bitmap lives at byte `i / 8`,
//! bit position `i % 8` counted from the least significant bit.

/// Write a u16 big-endian at the start of `buf`, returning the bytes
/// produced.
#[inline]
pub fn put_u16(buf: &mut [u8], value: u16) -> usize {
    buf[0] = (value >> 8) as u8;
    buf[1] = (value & 0xFF) as u8;
    2
}

/// Read a big-endian u16 from the start of `buf`.
#[inline]
pub fn get_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// Set bit `index` of a bitmap.
#[inline]
pub fn bitmap_set(buf: &mut [u8], index: usize, value: bool) {
    let mask = 1u8 << (index % 8);
    if value {
        buf[index / 8] |= mask;
    } else {
        buf[index / 8] &= !mask;
    }
}

/// Get bit `index` of a bitmap.
#[inline]
pub fn bitmap_get(buf: &[u8], index: usize) -> bool {
    (buf[index / 8] >> (index % 8)) & 0x01 != 0
}

/// Pack a bit slice into the Modbus bitmap layout, `(len + 7) / 8` bytes.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `count` bits from a Modbus bitmap.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count).map(|i| bitmap_get(bytes, i)).collect()
}

/// Encode registers into a big-endian byte stream, `2 * len` bytes.
pub fn regs_to_be_bytes(regs: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(regs.len() * 2);
    for &reg in regs {
        bytes.extend_from_slice(&reg.to_be_bytes());
    }
    bytes
}

/// Decode a big-endian byte stream into registers. Trailing odd bytes are
/// ignored; callers validate length beforehand.
pub fn be_bytes_to_regs(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}
