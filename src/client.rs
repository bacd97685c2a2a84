//! Modbus master (client) transaction core.
//!
//! # Architecture
//!
//! RTU and TCP share the application layer: every operation builds a PDU,
//! wraps it in the framing selected by the instance's [`ModbusProto`],
//! transmits it, receives exactly one frame with the dual-timeout reader,
//! validates the envelope, and extracts typed data. One instance carries
//! one outstanding transaction at a time; wrap it externally if multiple
//! producers need the same link.
//!
//! # API Naming Convention
//!
//! Operations use the short classic names with Modbus semantic aliases:
//!
//! | Function Code | Primary Name | Semantic Alias |
//! |---------------|----------------------|--------------------------------|
//! | 0x01 | `read_bits()` | `read_coils()` |
//! | 0x02 | `read_input_bits()` | `read_discrete_inputs()` |
//! | 0x03 | `read_regs()` | `read_holding_registers()` |
//! | 0x04 | `read_input_regs()` | `read_input_registers()` |
//! | 0x05 | `write_bit()` | `write_single_coil()` |
//! | 0x06 | `write_reg()` | `write_single_register()` |
//! | 0x0F | `write_bits()` | `write_multiple_coils()` |
//! | 0x10 | `write_regs()` | `write_multiple_registers()` |
//! | 0x16 | `mask_write_reg()` | `mask_write_register()` |
//! | 0x17 | `write_and_read_regs()` | `read_write_multiple_registers()` |
//!
//! # Failure surface
//!
//! Every outcome is a [`ModbusResult`]: [`ModbusError::Timeout`] when
//! nothing answered, [`ModbusError::Frame`] for CRC/envelope problems,
//! [`ModbusError::Exception`] when the slave returned an exception PDU
//! (the exception code is preserved), [`ModbusError::Connection`]/
//! [`ModbusError::Io`] for transport trouble. There is no automatic retry;
//! the caller decides.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use relay_modbus::{ModbusMaster, ModbusResult};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut master = ModbusMaster::new_tcp("127.0.0.1", 502);
//!     master.set_slave_addr(17);
//!     master.connect().await?;
//!
//!     let regs = master.read_regs(0x006B, 3).await?;
//!     println!("registers: {:?}", regs);
//!
//!     master.write_reg(0x0001, 0x0003).await?;
//!     master.close().await?;
//!     Ok(())
//! }
//! ```

use tracing::{debug, warn};

use crate::bytes::{be_bytes_to_regs, pack_bits, regs_to_be_bytes, unpack_bits};
use crate::constants::{
    BROADCAST_ADDRESS, MAX_FRAME_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS,
    MAX_WRITE_REGISTERS, MBAP_PROTOCOL_ID,
};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{ModbusProto, RtuFrame, TcpFrame};
use crate::pdu::{FrameBuffer, ModbusFunction, ModbusPdu, PduDirection, SlaveId};
use crate::transport::{Backend, ModbusPort, TcpPort, TransportStats};

#[cfg(feature = "rtu")]
use crate::transport::{SerialConfig, SerialPort};

/// Modbus master over a single transport backend.
pub struct ModbusMaster {
    proto: ModbusProto,
    slave: SlaveId,
    transaction_id: u16,
    check_address: bool,
    backend: Backend,
    scratch: FrameBuffer,
    rx: [u8; MAX_FRAME_SIZE],
}

impl ModbusMaster {
    /// Master over an arbitrary byte port with the given framing.
    pub fn with_port(proto: ModbusProto, port: Box<dyn ModbusPort>) -> Self {
        Self {
            proto,
            slave: 1,
            transaction_id: 0,
            check_address: true,
            backend: Backend::new(port),
            scratch: FrameBuffer::new(),
            rx: [0; MAX_FRAME_SIZE],
        }
    }

    /// TCP master connecting to `host:port`. The connection is made lazily
    /// on [`connect`](Self::connect) or the first transaction.
    pub fn new_tcp<S: Into<String>>(host: S, port: u16) -> Self {
        Self::with_port(ModbusProto::Tcp, Box::new(TcpPort::new(host, port)))
    }

    /// TCP master over an externally connected socket (socket adoption).
    pub fn from_stream(stream: tokio::net::TcpStream) -> Self {
        Self::with_port(ModbusProto::Tcp, Box::new(TcpPort::from_stream(stream)))
    }

    /// RTU master over a serial line.
    #[cfg(feature = "rtu")]
    pub fn new_rtu(config: SerialConfig) -> Self {
        Self::with_port(ModbusProto::Rtu, Box::new(SerialPort::new(config)))
    }

    /// Target slave address / unit id (default 1; 0 is the RTU broadcast).
    pub fn set_slave_addr(&mut self, slave: SlaveId) {
        self.slave = slave;
    }

    /// Currently targeted slave address.
    pub fn slave_addr(&self) -> SlaveId {
        self.slave
    }

    /// Switch framing on the same backend (e.g. RTU framing tunneled over
    /// an adopted TCP socket).
    pub fn set_protocol(&mut self, proto: ModbusProto) {
        self.proto = proto;
    }

    /// Framing currently in use.
    pub fn protocol(&self) -> ModbusProto {
        self.proto
    }

    /// Replace the response and inter-byte timeouts (milliseconds).
    pub fn set_timeouts(&mut self, ack_ms: u64, byte_ms: u64) {
        self.backend.set_timeouts(ack_ms, byte_ms);
    }

    /// Enable or disable response source-address checking (default on).
    pub fn set_address_check(&mut self, enabled: bool) {
        self.check_address = enabled;
    }

    /// Ensure the backend is open. Idempotent.
    pub async fn connect(&mut self) -> ModbusResult<()> {
        self.backend.open().await
    }

    /// Close the backend.
    pub async fn close(&mut self) -> ModbusResult<()> {
        self.backend.close().await
    }

    /// Whether the backend is currently open.
    pub fn is_connected(&self) -> bool {
        self.backend.is_open()
    }

    /// Transport statistics snapshot.
    pub fn stats(&self) -> TransportStats {
        self.backend.stats()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Read coils (0x01). Returns one `bool` per requested coil.
    pub async fn read_bits(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bit_values(ModbusFunction::ReadCoils, address, quantity)
            .await
    }

    /// Read discrete inputs (0x02).
    pub async fn read_input_bits(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.read_bit_values(ModbusFunction::ReadDiscreteInputs, address, quantity)
            .await
    }

    /// Read holding registers (0x03) into host byte order.
    pub async fn read_regs(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_reg_values(ModbusFunction::ReadHoldingRegisters, address, quantity)
            .await
    }

    /// Read input registers (0x04) into host byte order.
    pub async fn read_input_regs(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_reg_values(ModbusFunction::ReadInputRegisters, address, quantity)
            .await
    }

    /// Write a single coil (0x05): `true` -> 0xFF00, `false` -> 0x0000.
    pub async fn write_bit(&mut self, address: u16, on: bool) -> ModbusResult<()> {
        let value = if on { 0xFF00 } else { 0x0000 };
        self.transact(ModbusPdu::WriteSingle {
            function: ModbusFunction::WriteSingleCoil,
            address,
            value,
        })
        .await?;
        Ok(())
    }

    /// Write a single holding register (0x06).
    pub async fn write_reg(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        self.transact(ModbusPdu::WriteSingle {
            function: ModbusFunction::WriteSingleRegister,
            address,
            value,
        })
        .await?;
        Ok(())
    }

    /// Write multiple coils (0x0F). Returns the count the slave echoed.
    pub async fn write_bits(&mut self, address: u16, bits: &[bool]) -> ModbusResult<u16> {
        if bits.is_empty() || bits.len() > MAX_WRITE_COILS as usize {
            return Err(ModbusError::invalid_data(format!(
                "coil count {} out of range 1..={}",
                bits.len(),
                MAX_WRITE_COILS
            )));
        }
        let response = self
            .transact(ModbusPdu::WriteMultipleRequest {
                function: ModbusFunction::WriteMultipleCoils,
                address,
                quantity: bits.len() as u16,
                data: pack_bits(bits),
            })
            .await?;
        Self::expect_write_multiple(response)
    }

    /// Write multiple holding registers (0x10). Returns the echoed count.
    pub async fn write_regs(&mut self, address: u16, regs: &[u16]) -> ModbusResult<u16> {
        if regs.is_empty() || regs.len() > MAX_WRITE_REGISTERS as usize {
            return Err(ModbusError::invalid_data(format!(
                "register count {} out of range 1..={}",
                regs.len(),
                MAX_WRITE_REGISTERS
            )));
        }
        let response = self
            .transact(ModbusPdu::WriteMultipleRequest {
                function: ModbusFunction::WriteMultipleRegisters,
                address,
                quantity: regs.len() as u16,
                data: regs_to_be_bytes(regs),
            })
            .await?;
        Self::expect_write_multiple(response)
    }

    /// Mask-write a holding register (0x16):
    /// `new = (current & and_mask) | (or_mask & !and_mask)`.
    pub async fn mask_write_reg(
        &mut self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<()> {
        self.transact(ModbusPdu::MaskWrite {
            address,
            and_mask,
            or_mask,
        })
        .await?;
        Ok(())
    }

    /// Write then read holding registers in one transaction (0x17).
    /// The slave performs the write first; returns the registers read.
    pub async fn write_and_read_regs(
        &mut self,
        write_address: u16,
        write_values: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        if write_values.is_empty() || write_values.len() > MAX_WRITE_REGISTERS as usize {
            return Err(ModbusError::invalid_data("write register count out of range"));
        }
        if read_quantity == 0 || read_quantity > MAX_READ_REGISTERS {
            return Err(ModbusError::invalid_data("read register count out of range"));
        }

        let response = self
            .transact(ModbusPdu::ReadWriteRequest {
                read_address,
                read_quantity,
                write_address,
                write_quantity: write_values.len() as u16,
                data: regs_to_be_bytes(write_values),
            })
            .await?;
        match response {
            ModbusPdu::ReadResponse { data, .. } => {
                if data.len() != read_quantity as usize * 2 {
                    return Err(ModbusError::protocol(format!(
                        "read/write response carries {} bytes, expected {}",
                        data.len(),
                        read_quantity as usize * 2
                    )));
                }
                Ok(be_bytes_to_regs(&data))
            }
            other => Err(unexpected_response(&other)),
        }
    }

    // ===== Semantic name aliases (for readability) =====

    /// Alias for [`read_bits`](Self::read_bits).
    #[inline]
    pub async fn read_coils(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(address, quantity).await
    }

    /// Alias for [`read_input_bits`](Self::read_input_bits).
    #[inline]
    pub async fn read_discrete_inputs(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.read_input_bits(address, quantity).await
    }

    /// Alias for [`read_regs`](Self::read_regs).
    #[inline]
    pub async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_regs(address, quantity).await
    }

    /// Alias for [`read_input_regs`](Self::read_input_regs).
    #[inline]
    pub async fn read_input_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_input_regs(address, quantity).await
    }

    /// Alias for [`write_bit`](Self::write_bit).
    #[inline]
    pub async fn write_single_coil(&mut self, address: u16, on: bool) -> ModbusResult<()> {
        self.write_bit(address, on).await
    }

    /// Alias for [`write_reg`](Self::write_reg).
    #[inline]
    pub async fn write_single_register(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        self.write_reg(address, value).await
    }

    /// Alias for [`write_bits`](Self::write_bits).
    #[inline]
    pub async fn write_multiple_coils(
        &mut self,
        address: u16,
        bits: &[bool],
    ) -> ModbusResult<u16> {
        self.write_bits(address, bits).await
    }

    /// Alias for [`write_regs`](Self::write_regs).
    #[inline]
    pub async fn write_multiple_registers(
        &mut self,
        address: u16,
        regs: &[u16],
    ) -> ModbusResult<u16> {
        self.write_regs(address, regs).await
    }

    /// Alias for [`mask_write_reg`](Self::mask_write_reg).
    #[inline]
    pub async fn mask_write_register(
        &mut self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<()> {
        self.mask_write_reg(address, and_mask, or_mask).await
    }

    /// Alias for [`write_and_read_regs`](Self::write_and_read_regs).
    #[inline]
    pub async fn read_write_multiple_registers(
        &mut self,
        write_address: u16,
        write_values: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.write_and_read_regs(write_address, write_values, read_address, read_quantity)
            .await
    }

    // ========================================================================
    // Transaction core
    // ========================================================================

    async fn read_bit_values(
        &mut self,
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        if quantity == 0 || quantity > MAX_READ_COILS {
            return Err(ModbusError::invalid_data(format!(
                "bit quantity {} out of range 1..={}",
                quantity, MAX_READ_COILS
            )));
        }
        let response = self
            .transact(ModbusPdu::ReadRequest {
                function,
                address,
                quantity,
            })
            .await?;
        match response {
            ModbusPdu::ReadResponse { data, .. } => {
                if data.len() != (quantity as usize).div_ceil(8) {
                    return Err(ModbusError::protocol(format!(
                        "bit response carries {} bytes for {} bits",
                        data.len(),
                        quantity
                    )));
                }
                Ok(unpack_bits(&data, quantity as usize))
            }
            other => Err(unexpected_response(&other)),
        }
    }

    async fn read_reg_values(
        &mut self,
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        if quantity == 0 || quantity > MAX_READ_REGISTERS {
            return Err(ModbusError::invalid_data(format!(
                "register quantity {} out of range 1..={}",
                quantity, MAX_READ_REGISTERS
            )));
        }
        let response = self
            .transact(ModbusPdu::ReadRequest {
                function,
                address,
                quantity,
            })
            .await?;
        match response {
            ModbusPdu::ReadResponse { data, .. } => {
                if data.len() != quantity as usize * 2 {
                    return Err(ModbusError::protocol(format!(
                        "register response carries {} bytes for {} registers",
                        data.len(),
                        quantity
                    )));
                }
                Ok(be_bytes_to_regs(&data))
            }
            other => Err(unexpected_response(&other)),
        }
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    /// Run one request/response exchange and return the validated
    /// response PDU. RTU broadcasts transmit without waiting and
    /// synthesize the echo the slave would have sent.
    async fn transact(&mut self, request: ModbusPdu) -> ModbusResult<ModbusPdu> {
        self.backend.open().await?;

        let broadcast = self.proto == ModbusProto::Rtu && self.slave == BROADCAST_ADDRESS;
        if broadcast && !is_write_request(&request) {
            return Err(ModbusError::invalid_data(
                "read operations cannot target the broadcast address",
            ));
        }

        let expected_fc = request.function_code();
        debug!(
            "request: FC=0x{:02X} to slave {} over {:?}",
            expected_fc, self.slave, self.proto
        );

        let mut sent_tid = 0;
        let request = match self.proto {
            ModbusProto::Rtu => {
                let frame = RtuFrame::new(self.slave, request);
                frame.encode_into(&mut self.scratch)?;
                frame.pdu
            }
            ModbusProto::Tcp => {
                sent_tid = self.next_transaction_id();
                let frame = TcpFrame::new(sent_tid, self.slave, request);
                frame.encode_into(&mut self.scratch)?;
                frame.pdu
            }
        };

        self.backend.flush_input()?;
        self.backend.write_frame(self.scratch.as_slice()).await?;
        self.backend.stats_mut().requests_sent += 1;

        if broadcast {
            return broadcast_echo(request);
        }

        let received = self.backend.read_frame(&mut self.rx).await?;
        if received == 0 {
            warn!("no response from slave {}", self.slave);
            return Err(ModbusError::timeout(
                "response",
                self.backend.ack_timeout_ms(),
            ));
        }

        let response = match self.proto {
            ModbusProto::Rtu => {
                let frame = RtuFrame::decode(&self.rx[..received], PduDirection::Response)?;
                if self.check_address && frame.slave != self.slave {
                    return Err(ModbusError::frame(format!(
                        "slave address mismatch: expected {}, got {}",
                        self.slave, frame.slave
                    )));
                }
                frame.pdu
            }
            ModbusProto::Tcp => {
                let (frame, pdu_len) =
                    TcpFrame::decode(&self.rx[..received], PduDirection::Response)?;
                if self.check_address && frame.header.unit_id != self.slave {
                    return Err(ModbusError::frame(format!(
                        "unit id mismatch: expected {}, got {}",
                        self.slave, frame.header.unit_id
                    )));
                }
                // MBAP check against what this transaction actually sent.
                if frame.header.transaction_id != sent_tid {
                    return Err(ModbusError::frame(format!(
                        "transaction id mismatch: sent {}, got {}",
                        sent_tid, frame.header.transaction_id
                    )));
                }
                if frame.header.protocol_id != MBAP_PROTOCOL_ID {
                    return Err(ModbusError::frame(format!(
                        "protocol id 0x{:04X} is not Modbus",
                        frame.header.protocol_id
                    )));
                }
                if frame.header.length as usize != pdu_len + 1 {
                    return Err(ModbusError::frame(format!(
                        "MBAP length {} does not match PDU length {}",
                        frame.header.length, pdu_len
                    )));
                }
                frame.pdu
            }
        };

        self.backend.stats_mut().responses_received += 1;

        if let ModbusPdu::Exception { function, code } = response {
            debug!("exception from slave {}: {}", self.slave, code);
            return Err(ModbusError::exception(function, code));
        }
        if response.function_code() != expected_fc {
            return Err(ModbusError::frame(format!(
                "function echo mismatch: sent 0x{:02X}, got 0x{:02X}",
                expected_fc,
                response.function_code()
            )));
        }
        Ok(response)
    }

    fn expect_write_multiple(response: ModbusPdu) -> ModbusResult<u16> {
        match response {
            ModbusPdu::WriteMultipleResponse { quantity, .. } => Ok(quantity),
            other => Err(unexpected_response(&other)),
        }
    }
}

fn is_write_request(pdu: &ModbusPdu) -> bool {
    matches!(
        pdu,
        ModbusPdu::WriteSingle { .. }
            | ModbusPdu::WriteMultipleRequest { .. }
            | ModbusPdu::MaskWrite { .. }
    )
}

/// Response a broadcast write would have echoed; nothing was received.
fn broadcast_echo(request: ModbusPdu) -> ModbusResult<ModbusPdu> {
    match request {
        pdu @ (ModbusPdu::WriteSingle { .. } | ModbusPdu::MaskWrite { .. }) => Ok(pdu),
        ModbusPdu::WriteMultipleRequest {
            function,
            address,
            quantity,
            ..
        } => Ok(ModbusPdu::WriteMultipleResponse {
            function,
            address,
            quantity,
        }),
        _ => Err(ModbusError::invalid_data(
            "read operations cannot target the broadcast address",
        )),
    }
}

fn unexpected_response(pdu: &ModbusPdu) -> ModbusError {
    ModbusError::protocol(format!(
        "unexpected response shape for FC 0x{:02X}",
        pdu.function_code()
    ))
}
