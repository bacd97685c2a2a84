//! Modbus protocol constants based on the official specification.
//!
//! Frame geometry constants are derived from the RS485 ADU limit of 256
//! bytes; register and coil limits fall out of the 253-byte PDU constraint.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size per Modbus specification.
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Minimum PDU size: function code + one payload byte
/// (smallest case is an exception response: fc | 0x80, exception code).
pub const MIN_PDU_SIZE: usize = 2;

/// Modbus TCP MBAP header length.
/// Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_SIZE: usize = 7;

/// Protocol identifier carried in every MBAP header (always 0 for Modbus).
pub const MBAP_PROTOCOL_ID: u16 = 0x0000;

/// Maximum Modbus RTU frame: address + PDU + CRC.
pub const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + 2;

/// Minimum Modbus RTU frame: address + minimal PDU + CRC.
pub const MIN_RTU_FRAME_SIZE: usize = 1 + MIN_PDU_SIZE + 2;

/// Maximum Modbus TCP frame: MBAP header + PDU.
pub const MAX_TCP_FRAME_SIZE: usize = MBAP_HEADER_SIZE + MAX_PDU_SIZE;

/// Minimum Modbus TCP frame: MBAP header + minimal PDU.
pub const MIN_TCP_FRAME_SIZE: usize = MBAP_HEADER_SIZE + MIN_PDU_SIZE;

/// Scratch buffer size covering the larger of the two frame maxima.
pub const MAX_FRAME_SIZE: usize = MAX_TCP_FRAME_SIZE;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum registers for FC03/FC04 (Read Holding/Input Registers).
/// 1 (fc) + 1 (byte count) + N * 2 <= 253  ->  N <= 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers for FC16 (Write Multiple Registers).
/// 1 (fc) + 2 (addr) + 2 (qty) + 1 (byte count) + N * 2 <= 253  ->  N <= 123
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum coils for FC01/FC02 (Read Coils/Discrete Inputs).
/// Spec limit, rounded down from the 253-byte PDU constraint.
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum coils for FC15 (Write Multiple Coils): 0x7B0.
pub const MAX_WRITE_COILS: u16 = 1968;

// ============================================================================
// Timing Defaults
// ============================================================================

/// Default response (ack) timeout: maximum wait for the first byte of a
/// response.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 300;

/// Default inter-byte timeout used to delimit frames, derived from the
/// classic 3.5-character silence gap at 9600 baud.
pub const DEFAULT_BYTE_TIMEOUT_MS: u64 = 32;

/// Polling quantum of the frame reader between non-blocking reads.
pub const READ_POLL_INTERVAL_MS: u64 = 2;

/// Delay before a slave retries a failed backend open.
pub const SLAVE_RECONNECT_DELAY_MS: u64 = 1000;

// ============================================================================
// Addressing
// ============================================================================

/// Modbus TCP default server port.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// RTU broadcast address: requests are processed, never answered.
pub const BROADCAST_ADDRESS: u8 = 0;

/// TCP unit identifier that makes a slave accept any addressed frame.
pub const ACCEPT_ANY_UNIT_ID: u8 = 0xFF;
