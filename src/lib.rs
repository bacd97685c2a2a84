//! # Relay Modbus - Dual-Transport Modbus Stack
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **Version:** 0.3.1
//! **License:** MIT
//!
//! A portable Modbus implementation in pure Rust covering both transports
//! (RTU serial framing and TCP MBAP framing) and both roles (master and
//! slave) over one transport-agnostic protocol engine.
//!
//! ## Features
//!
//! - **Both Transports**: RTU with CRC-16 framing and silence-gap frame
//!   delimitation; TCP with MBAP headers and transaction-id matching
//! - **Both Roles**: one-request-at-a-time master, callback-driven slave
//! - **Pluggable Byte Ports**: serial, outbound TCP, adopted sockets, or
//!   any custom [`ModbusPort`] implementation
//! - **Memory Safe**: pure Rust, no unsafe code, bounded frame buffers
//! - **Built-in Monitoring**: per-backend transport statistics
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//! | 0x16 | Mask Write Register | ✅ | ✅ |
//! | 0x17 | Read/Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay_modbus::{ModbusMaster, ModbusResult};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     // Lazy TCP master; the socket opens on connect().
//!     let mut master = ModbusMaster::new_tcp("127.0.0.1", 502);
//!     master.set_slave_addr(1);
//!     master.connect().await?;
//!
//!     // Read holding registers
//!     let values = master.read_regs(0, 10).await?;
//!     println!("Read registers: {:?}", values);
//!
//!     // Write single register
//!     master.write_reg(100, 0x1234).await?;
//!
//!     master.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// Byte-level codec: big-endian fields and LSB-first bitmaps
pub mod bytes;

/// CRC-16/Modbus checksum
pub mod crc;

/// Transport-independent PDU codec
pub mod pdu;

/// RTU and TCP frame codecs
pub mod frame;

/// Byte ports and the dual-timeout frame reader
pub mod transport;

/// Master (client) transaction core
pub mod client;

/// Slave (server) dispatch core
pub mod server;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use relay_modbus::tokio) ===
pub use tokio;

// === Core API ===
pub use client::ModbusMaster;
pub use server::{ModbusDevice, ModbusSlave};

// === Error handling ===
pub use error::{ExceptionCode, ModbusError, ModbusResult};

// === Core types ===
pub use frame::{MbapHeader, ModbusProto, RtuFrame, TcpFrame};
pub use pdu::{FrameBuffer, ModbusFunction, ModbusPdu, PduDirection, SlaveId};

// === Transport layer ===
pub use transport::{Backend, ModbusPort, TcpPort, TransportStats};

#[cfg(feature = "rtu")]
pub use transport::{SerialConfig, SerialPort};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    DEFAULT_TCP_PORT, MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS,
    MAX_WRITE_REGISTERS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Relay Modbus v{} - dual-transport Modbus master/slave stack by Evan Liu",
        VERSION
    )
}
