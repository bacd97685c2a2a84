//! Modbus slave (server) dispatch core.
//!
//! A slave owns a transport backend and a [`ModbusDevice`] — the callback
//! table through which all data-model access goes. Each [`ModbusSlave::step`]
//! receives at most one frame, dispatches it by function code, and answers
//! with either the normal response or an exception PDU. Per Modbus
//! convention a slave never replies to garbage: malformed frames and
//! frames addressed elsewhere are dropped silently, and RTU broadcasts
//! are processed without a reply.
//!
//! The TCP path has no accept loop by design; adopt an accepted socket
//! with [`ModbusSlave::from_stream`] and run one slave per connection.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use relay_modbus::{ExceptionCode, ModbusDevice, ModbusSlave};
//!
//! struct Bench { holding: [u16; 16] }
//!
//! impl ModbusDevice for Bench {
//!     fn read_holding(&mut self, addr: u16) -> Result<u16, ExceptionCode> {
//!         self.holding
//!             .get(addr as usize)
//!             .copied()
//!             .ok_or(ExceptionCode::IllegalDataAddress)
//!     }
//!     fn write_holding(&mut self, addr: u16, value: u16) -> Result<(), ExceptionCode> {
//!         match self.holding.get_mut(addr as usize) {
//!             Some(slot) => { *slot = value; Ok(()) }
//!             None => Err(ExceptionCode::IllegalDataAddress),
//!         }
//!     }
//! }
//!
//! # async fn serve(stream: tokio::net::TcpStream) -> relay_modbus::ModbusResult<()> {
//! let device = Box::new(Bench { holding: [0; 16] });
//! let mut slave = ModbusSlave::from_stream(stream, 17, device);
//! slave.run().await
//! # }
//! ```

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::bytes::{be_bytes_to_regs, get_u16, pack_bits, regs_to_be_bytes, unpack_bits};
use crate::constants::{
    ACCEPT_ANY_UNIT_ID, BROADCAST_ADDRESS, MAX_FRAME_SIZE, MBAP_PROTOCOL_ID,
    SLAVE_RECONNECT_DELAY_MS,
};
use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::frame::{ModbusProto, RtuFrame, TcpFrame};
use crate::pdu::{FrameBuffer, ModbusFunction, ModbusPdu, PduDirection, SlaveId};
use crate::transport::{Backend, ModbusPort, TcpPort, TransportStats};

#[cfg(feature = "rtu")]
use crate::transport::{SerialConfig, SerialPort};

/// Callback table through which the slave reaches the application's data.
///
/// Implement the accessors for the address spaces the device exposes;
/// every method defaults to [`ExceptionCode::ServerDeviceFailure`], so an
/// unimplemented function code answers with exception 0x04. Range checks
/// belong in the implementation: return
/// [`ExceptionCode::IllegalDataAddress`] for addresses outside the map and
/// [`ExceptionCode::IllegalDataValue`] for unacceptable values.
#[allow(unused_variables)]
pub trait ModbusDevice: Send {
    /// Read one discrete input (0x02).
    fn read_discrete(&mut self, addr: u16) -> Result<bool, ExceptionCode> {
        Err(ExceptionCode::ServerDeviceFailure)
    }

    /// Read one coil (0x01).
    fn read_coil(&mut self, addr: u16) -> Result<bool, ExceptionCode> {
        Err(ExceptionCode::ServerDeviceFailure)
    }

    /// Write one coil (0x05, 0x0F).
    fn write_coil(&mut self, addr: u16, on: bool) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::ServerDeviceFailure)
    }

    /// Read one input register (0x04).
    fn read_input(&mut self, addr: u16) -> Result<u16, ExceptionCode> {
        Err(ExceptionCode::ServerDeviceFailure)
    }

    /// Read one holding register (0x03, 0x16, 0x17).
    fn read_holding(&mut self, addr: u16) -> Result<u16, ExceptionCode> {
        Err(ExceptionCode::ServerDeviceFailure)
    }

    /// Write one holding register (0x06, 0x10, 0x16, 0x17).
    fn write_holding(&mut self, addr: u16, value: u16) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::ServerDeviceFailure)
    }
}

/// Single-connection Modbus slave.
pub struct ModbusSlave {
    proto: ModbusProto,
    address: SlaveId,
    check_address: bool,
    backend: Backend,
    device: Box<dyn ModbusDevice>,
    scratch: FrameBuffer,
    rx: [u8; MAX_FRAME_SIZE],
}

impl ModbusSlave {
    /// Slave over an arbitrary byte port with the given framing.
    pub fn with_port(
        proto: ModbusProto,
        port: Box<dyn ModbusPort>,
        address: SlaveId,
        device: Box<dyn ModbusDevice>,
    ) -> Self {
        Self {
            proto,
            address,
            check_address: true,
            backend: Backend::new(port),
            device,
            scratch: FrameBuffer::new(),
            rx: [0; MAX_FRAME_SIZE],
        }
    }

    /// TCP slave over an externally accepted socket. `unit_id` 0xFF makes
    /// the slave answer any addressed frame.
    pub fn from_stream(
        stream: tokio::net::TcpStream,
        unit_id: SlaveId,
        device: Box<dyn ModbusDevice>,
    ) -> Self {
        Self::with_port(
            ModbusProto::Tcp,
            Box::new(TcpPort::from_stream(stream)),
            unit_id,
            device,
        )
    }

    /// RTU slave on a serial line.
    #[cfg(feature = "rtu")]
    pub fn new_rtu(config: SerialConfig, address: SlaveId, device: Box<dyn ModbusDevice>) -> Self {
        Self::with_port(
            ModbusProto::Rtu,
            Box::new(SerialPort::new(config)),
            address,
            device,
        )
    }

    /// Change the slave's own address / unit id.
    pub fn set_slave_addr(&mut self, address: SlaveId) {
        self.address = address;
    }

    /// This slave's address.
    pub fn slave_addr(&self) -> SlaveId {
        self.address
    }

    /// Switch framing on the same backend.
    pub fn set_protocol(&mut self, proto: ModbusProto) {
        self.proto = proto;
    }

    /// Replace the callback table.
    pub fn set_device(&mut self, device: Box<dyn ModbusDevice>) {
        self.device = device;
    }

    /// Replace the receive timeouts (milliseconds).
    pub fn set_timeouts(&mut self, ack_ms: u64, byte_ms: u64) {
        self.backend.set_timeouts(ack_ms, byte_ms);
    }

    /// Enable or disable inbound address filtering (default on).
    pub fn set_address_check(&mut self, enabled: bool) {
        self.check_address = enabled;
    }

    /// Whether the backend is currently open.
    pub fn is_connected(&self) -> bool {
        self.backend.is_open()
    }

    /// Close the backend.
    pub async fn close(&mut self) -> ModbusResult<()> {
        self.backend.close().await
    }

    /// Transport statistics snapshot.
    pub fn stats(&self) -> TransportStats {
        self.backend.stats()
    }

    /// Run one receive/dispatch/respond iteration.
    ///
    /// A closed backend is opened first; when opening fails the call
    /// sleeps one reconnect delay and returns `Ok` so a driving loop can
    /// retry. A quiet cycle (nothing received before the ack timeout) is
    /// also `Ok`. Transport failures close the backend and surface as the
    /// error.
    pub async fn step(&mut self) -> ModbusResult<()> {
        if !self.backend.is_open() {
            if let Err(err) = self.backend.open().await {
                warn!("slave backend open failed: {}", err);
                sleep(Duration::from_millis(SLAVE_RECONNECT_DELAY_MS)).await;
                return Ok(());
            }
        }

        let received = match self.backend.read_frame(&mut self.rx).await {
            Ok(n) => n,
            Err(err) => {
                let _ = self.backend.close().await;
                return Err(err);
            }
        };
        if received == 0 {
            return Ok(());
        }

        let raw = self.rx[..received].to_vec();
        match self.proto {
            ModbusProto::Rtu => self.handle_rtu(&raw).await,
            ModbusProto::Tcp => self.handle_tcp(&raw).await,
        }
    }

    /// Drive [`step`](Self::step) until a transport error stops the loop
    /// (e.g. the peer or the application closed the backend).
    pub async fn run(&mut self) -> ModbusResult<()> {
        loop {
            self.step().await?;
        }
    }

    async fn handle_rtu(&mut self, raw: &[u8]) -> ModbusResult<()> {
        let (slave, response) = match RtuFrame::decode(raw, PduDirection::Request) {
            Ok(frame) => {
                if !self.accepts_rtu(frame.slave) {
                    debug!("ignoring frame for slave {}", frame.slave);
                    return Ok(());
                }
                let response = self.dispatch(&frame.pdu);
                (frame.slave, response)
            }
            Err(ModbusError::InvalidFunction { code }) => {
                // CRC already validated; answer unknown functions with
                // exception 0x01 unless the frame is not ours.
                let slave = raw[0];
                if !self.accepts_rtu(slave) {
                    return Ok(());
                }
                debug!("unsupported function 0x{:02X}", code);
                let response = ModbusPdu::Exception {
                    function: code & 0x7F,
                    code: ExceptionCode::IllegalFunction,
                };
                (slave, response)
            }
            Err(err) => {
                debug!("dropping malformed RTU frame: {}", err);
                return Ok(());
            }
        };

        // Broadcasts are executed but never answered.
        if slave == BROADCAST_ADDRESS {
            return Ok(());
        }

        RtuFrame::new(slave, response).encode_into(&mut self.scratch)?;
        self.send_response().await
    }

    async fn handle_tcp(&mut self, raw: &[u8]) -> ModbusResult<()> {
        let (header, response) = match TcpFrame::decode(raw, PduDirection::Request) {
            Ok((frame, _)) => {
                if frame.header.protocol_id != MBAP_PROTOCOL_ID {
                    debug!(
                        "ignoring frame with protocol id 0x{:04X}",
                        frame.header.protocol_id
                    );
                    return Ok(());
                }
                if !self.accepts_unit(frame.header.unit_id) {
                    debug!("ignoring frame for unit {}", frame.header.unit_id);
                    return Ok(());
                }
                let response = self.dispatch(&frame.pdu);
                (frame.header, response)
            }
            Err(ModbusError::InvalidFunction { code }) => {
                // Re-read the MBAP fields the PDU decode already walked
                // past; the buffer is at least a full header plus one byte.
                if get_u16(&raw[2..]) != MBAP_PROTOCOL_ID {
                    return Ok(());
                }
                let unit_id = raw[6];
                if !self.accepts_unit(unit_id) {
                    return Ok(());
                }
                debug!("unsupported function 0x{:02X}", code);
                let response = ModbusPdu::Exception {
                    function: code & 0x7F,
                    code: ExceptionCode::IllegalFunction,
                };
                let header = crate::frame::MbapHeader {
                    transaction_id: get_u16(raw),
                    protocol_id: MBAP_PROTOCOL_ID,
                    length: 0,
                    unit_id,
                };
                (header, response)
            }
            Err(err) => {
                debug!("dropping malformed TCP frame: {}", err);
                return Ok(());
            }
        };

        TcpFrame::new(header.transaction_id, header.unit_id, response)
            .encode_into(&mut self.scratch)?;
        self.send_response().await
    }

    async fn send_response(&mut self) -> ModbusResult<()> {
        match self.backend.write_frame(self.scratch.as_slice()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.backend.close().await;
                Err(err)
            }
        }
    }

    fn accepts_rtu(&self, slave: SlaveId) -> bool {
        !self.check_address || slave == BROADCAST_ADDRESS || slave == self.address
    }

    fn accepts_unit(&self, unit_id: SlaveId) -> bool {
        !self.check_address
            || self.address == ACCEPT_ANY_UNIT_ID
            || unit_id == ACCEPT_ANY_UNIT_ID
            || unit_id == self.address
    }

    // ========================================================================
    // Function-code handlers
    // ========================================================================

    /// Map a request PDU to its response PDU, consulting the device
    /// callbacks. Callback failures become exception responses carrying
    /// the callback's exception code.
    fn dispatch(&mut self, request: &ModbusPdu) -> ModbusPdu {
        match request {
            ModbusPdu::ReadRequest {
                function: function @ (ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs),
                address,
                quantity,
            } => self.read_bits(*function, *address, *quantity),
            ModbusPdu::ReadRequest {
                function:
                    function @ (ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters),
                address,
                quantity,
            } => self.read_registers(*function, *address, *quantity),
            ModbusPdu::WriteSingle {
                function: ModbusFunction::WriteSingleCoil,
                address,
                value,
            } => self.write_single_coil(*address, *value, request),
            ModbusPdu::WriteSingle {
                function: ModbusFunction::WriteSingleRegister,
                address,
                value,
            } => match self.device.write_holding(*address, *value) {
                Ok(()) => request.clone(),
                Err(code) => request.to_exception(code),
            },
            ModbusPdu::WriteMultipleRequest {
                function,
                address,
                quantity,
                data,
            } => self.write_multiple(*function, *address, *quantity, data, request),
            ModbusPdu::MaskWrite {
                address,
                and_mask,
                or_mask,
            } => self.mask_write(*address, *and_mask, *or_mask, request),
            ModbusPdu::ReadWriteRequest {
                read_address,
                read_quantity,
                write_address,
                write_quantity: _,
                data,
            } => self.write_then_read(*read_address, *read_quantity, *write_address, data, request),
            // Anything else cannot legally arrive as a request.
            other => other.to_exception(ExceptionCode::IllegalFunction),
        }
    }

    fn read_bits(&mut self, function: ModbusFunction, address: u16, quantity: u16) -> ModbusPdu {
        let mut bits = Vec::with_capacity(quantity as usize);
        for i in 0..quantity {
            let addr = address.wrapping_add(i);
            let read = if function == ModbusFunction::ReadCoils {
                self.device.read_coil(addr)
            } else {
                self.device.read_discrete(addr)
            };
            match read {
                Ok(bit) => bits.push(bit),
                Err(code) => {
                    return ModbusPdu::Exception {
                        function: function.to_u8(),
                        code,
                    }
                }
            }
        }
        ModbusPdu::ReadResponse {
            function,
            data: pack_bits(&bits),
        }
    }

    fn read_registers(
        &mut self,
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    ) -> ModbusPdu {
        let mut regs = Vec::with_capacity(quantity as usize);
        for i in 0..quantity {
            let addr = address.wrapping_add(i);
            let read = if function == ModbusFunction::ReadHoldingRegisters {
                self.device.read_holding(addr)
            } else {
                self.device.read_input(addr)
            };
            match read {
                Ok(value) => regs.push(value),
                Err(code) => {
                    return ModbusPdu::Exception {
                        function: function.to_u8(),
                        code,
                    }
                }
            }
        }
        ModbusPdu::ReadResponse {
            function,
            data: regs_to_be_bytes(&regs),
        }
    }

    fn write_single_coil(&mut self, address: u16, value: u16, request: &ModbusPdu) -> ModbusPdu {
        // Only the two canonical coil values are legal on the wire.
        if value != 0x0000 && value != 0xFF00 {
            return request.to_exception(ExceptionCode::IllegalDataValue);
        }
        match self.device.write_coil(address, value == 0xFF00) {
            Ok(()) => request.clone(),
            Err(code) => request.to_exception(code),
        }
    }

    fn write_multiple(
        &mut self,
        function: ModbusFunction,
        address: u16,
        quantity: u16,
        data: &[u8],
        request: &ModbusPdu,
    ) -> ModbusPdu {
        if function == ModbusFunction::WriteMultipleCoils {
            for (i, bit) in unpack_bits(data, quantity as usize).into_iter().enumerate() {
                if let Err(code) = self.device.write_coil(address.wrapping_add(i as u16), bit) {
                    return request.to_exception(code);
                }
            }
        } else {
            for (i, value) in be_bytes_to_regs(data).into_iter().enumerate() {
                if let Err(code) = self
                    .device
                    .write_holding(address.wrapping_add(i as u16), value)
                {
                    return request.to_exception(code);
                }
            }
        }
        ModbusPdu::WriteMultipleResponse {
            function,
            address,
            quantity,
        }
    }

    fn mask_write(
        &mut self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
        request: &ModbusPdu,
    ) -> ModbusPdu {
        let current = match self.device.read_holding(address) {
            Ok(value) => value,
            Err(code) => return request.to_exception(code),
        };
        let value = (current & and_mask) | (or_mask & !and_mask);
        match self.device.write_holding(address, value) {
            Ok(()) => request.clone(),
            Err(code) => request.to_exception(code),
        }
    }

    fn write_then_read(
        &mut self,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        data: &[u8],
        request: &ModbusPdu,
    ) -> ModbusPdu {
        // The write executes fully before the read; a write failure
        // aborts without touching the read.
        for (i, value) in be_bytes_to_regs(data).into_iter().enumerate() {
            if let Err(code) = self
                .device
                .write_holding(write_address.wrapping_add(i as u16), value)
            {
                return request.to_exception(code);
            }
        }

        let mut regs = Vec::with_capacity(read_quantity as usize);
        for i in 0..read_quantity {
            match self.device.read_holding(read_address.wrapping_add(i)) {
                Ok(value) => regs.push(value),
                Err(code) => return request.to_exception(code),
            }
        }
        ModbusPdu::ReadResponse {
            function: ModbusFunction::ReadWriteMultipleRegisters,
            data: regs_to_be_bytes(&regs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc;
    use crate::transport::testing::{MockPort, MockState};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// In-memory device: 16 coils, 16 discretes at fixed values, and two
    /// 256-entry register banks.
    struct BankDevice {
        coils: Vec<bool>,
        holdings: Vec<u16>,
        inputs: Vec<u16>,
    }

    impl BankDevice {
        fn new() -> Self {
            Self {
                coils: vec![false; 16],
                holdings: vec![0; 256],
                inputs: (0..256).map(|i| i as u16).collect(),
            }
        }
    }

    impl ModbusDevice for BankDevice {
        fn read_discrete(&mut self, addr: u16) -> Result<bool, ExceptionCode> {
            if addr < 16 {
                Ok(addr % 2 == 0)
            } else {
                Err(ExceptionCode::IllegalDataAddress)
            }
        }

        fn read_coil(&mut self, addr: u16) -> Result<bool, ExceptionCode> {
            self.coils
                .get(addr as usize)
                .copied()
                .ok_or(ExceptionCode::IllegalDataAddress)
        }

        fn write_coil(&mut self, addr: u16, on: bool) -> Result<(), ExceptionCode> {
            match self.coils.get_mut(addr as usize) {
                Some(slot) => {
                    *slot = on;
                    Ok(())
                }
                None => Err(ExceptionCode::IllegalDataAddress),
            }
        }

        fn read_input(&mut self, addr: u16) -> Result<u16, ExceptionCode> {
            self.inputs
                .get(addr as usize)
                .copied()
                .ok_or(ExceptionCode::IllegalDataAddress)
        }

        fn read_holding(&mut self, addr: u16) -> Result<u16, ExceptionCode> {
            self.holdings
                .get(addr as usize)
                .copied()
                .ok_or(ExceptionCode::IllegalDataAddress)
        }

        fn write_holding(&mut self, addr: u16, value: u16) -> Result<(), ExceptionCode> {
            match self.holdings.get_mut(addr as usize) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(ExceptionCode::IllegalDataAddress),
            }
        }
    }

    /// Device with nothing implemented; every access reports 0x04.
    struct EmptyDevice;
    impl ModbusDevice for EmptyDevice {}

    fn rtu_wire(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc::to_wire(crc::checksum(body)));
        frame
    }

    fn rtu_slave(
        script: Vec<(Duration, Vec<u8>)>,
        device: Box<dyn ModbusDevice>,
    ) -> (ModbusSlave, Arc<Mutex<MockState>>) {
        let (port, state) = MockPort::new(script);
        let slave = ModbusSlave::with_port(ModbusProto::Rtu, Box::new(port), 1, device);
        (slave, state)
    }

    fn tcp_slave(
        script: Vec<(Duration, Vec<u8>)>,
        unit_id: SlaveId,
        device: Box<dyn ModbusDevice>,
    ) -> (ModbusSlave, Arc<Mutex<MockState>>) {
        let (port, state) = MockPort::new(script);
        let slave = ModbusSlave::with_port(ModbusProto::Tcp, Box::new(port), unit_id, device);
        (slave, state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_holding_registers_response() {
        let mut device = BankDevice::new();
        device.holdings[0x6B] = 0xAE41;
        device.holdings[0x6C] = 0x5652;
        device.holdings[0x6D] = 0x4340;

        let request = rtu_wire(&[0x01, 0x03, 0x00, 0x6B, 0x00, 0x03]);
        let (mut slave, state) = rtu_slave(
            vec![(Duration::from_millis(0), request)],
            Box::new(device),
        );

        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        assert_eq!(
            written,
            vec![rtu_wire(&[0x01, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_function_answers_illegal_function() {
        let request = rtu_wire(&[0x01, 0x65, 0x12, 0x34]);
        let (mut slave, state) = rtu_slave(
            vec![(Duration::from_millis(0), request)],
            Box::new(BankDevice::new()),
        );

        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        assert_eq!(written, vec![rtu_wire(&[0x01, 0xE5, 0x01])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_coil_rejects_illegal_value() {
        let request = rtu_wire(&[0x01, 0x05, 0x00, 0x0A, 0x01, 0x00]);
        let (mut slave, state) = rtu_slave(
            vec![(Duration::from_millis(0), request)],
            Box::new(BankDevice::new()),
        );

        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        assert_eq!(written, vec![rtu_wire(&[0x01, 0x85, 0x03])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_coil_echoes_request() {
        let request = rtu_wire(&[0x01, 0x05, 0x00, 0x0A, 0xFF, 0x00]);
        let (mut slave, state) = rtu_slave(
            vec![(Duration::from_millis(0), request.clone())],
            Box::new(BankDevice::new()),
        );

        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        assert_eq!(written, vec![request]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_address_mismatch_gets_no_response() {
        let request = rtu_wire(&[0x02, 0x03, 0x00, 0x00, 0x00, 0x01]);
        let (mut slave, state) = rtu_slave(
            vec![(Duration::from_millis(0), request)],
            Box::new(BankDevice::new()),
        );

        slave.step().await.unwrap();
        assert!(state.lock().unwrap().written.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_is_processed_without_response() {
        let request = rtu_wire(&[0x00, 0x05, 0x00, 0x03, 0xFF, 0x00]);
        let (port, state) = MockPort::new(vec![(Duration::from_millis(0), request)]);
        let mut device = BankDevice::new();
        device.coils[3] = false;
        let mut slave = ModbusSlave::with_port(
            ModbusProto::Rtu,
            Box::new(port),
            1,
            Box::new(device),
        );

        slave.step().await.unwrap();
        assert!(state.lock().unwrap().written.is_empty());

        // The write went through: reading coil 3 back now returns ON.
        let readback = rtu_wire(&[0x01, 0x01, 0x00, 0x03, 0x00, 0x01]);
        let (port, state) = MockPort::new(vec![(Duration::from_millis(0), readback)]);
        // Carry the device over through a fresh port.
        let device = std::mem::replace(&mut slave.device, Box::new(EmptyDevice));
        let mut slave = ModbusSlave::with_port(ModbusProto::Rtu, Box::new(port), 1, device);
        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        assert_eq!(written, vec![rtu_wire(&[0x01, 0x01, 0x01, 0x01])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_dropped_silently() {
        let mut request = rtu_wire(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]);
        request[3] ^= 0x40; // break the CRC
        let (mut slave, state) = rtu_slave(
            vec![(Duration::from_millis(0), request)],
            Box::new(BankDevice::new()),
        );

        slave.step().await.unwrap();
        assert!(state.lock().unwrap().written.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unimplemented_callback_reports_device_failure() {
        let request = rtu_wire(&[0x01, 0x01, 0x00, 0x00, 0x00, 0x08]);
        let (mut slave, state) = rtu_slave(
            vec![(Duration::from_millis(0), request)],
            Box::new(EmptyDevice),
        );

        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        assert_eq!(written, vec![rtu_wire(&[0x01, 0x81, 0x04])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_read_reports_illegal_address() {
        let request = rtu_wire(&[0x01, 0x03, 0x01, 0x00, 0x00, 0x02]);
        let mut device = BankDevice::new();
        device.holdings.truncate(16);
        let (mut slave, state) = rtu_slave(
            vec![(Duration::from_millis(0), request)],
            Box::new(device),
        );

        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        assert_eq!(written, vec![rtu_wire(&[0x01, 0x83, 0x02])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mask_write_semantics() {
        // AND 0xFFFF / OR 0x0000 leaves the register unchanged.
        let keep = rtu_wire(&[0x01, 0x16, 0x00, 0x04, 0xFF, 0xFF, 0x00, 0x00]);
        // AND 0x0000 / OR 0x1234 sets it to 0x1234.
        let set = rtu_wire(&[0x01, 0x16, 0x00, 0x04, 0x00, 0x00, 0x12, 0x34]);
        let read = rtu_wire(&[0x01, 0x03, 0x00, 0x04, 0x00, 0x01]);

        let mut device = BankDevice::new();
        device.holdings[4] = 0xBEEF;
        let (mut slave, state) = rtu_slave(
            vec![
                (Duration::from_millis(0), keep.clone()),
                (Duration::from_millis(100), read.clone()),
                (Duration::from_millis(200), set.clone()),
                (Duration::from_millis(300), read.clone()),
            ],
            Box::new(device),
        );

        slave.step().await.unwrap();
        slave.step().await.unwrap();
        slave.step().await.unwrap();
        slave.step().await.unwrap();

        let written = state.lock().unwrap().written.clone();
        assert_eq!(written[0], keep);
        assert_eq!(written[1], rtu_wire(&[0x01, 0x03, 0x02, 0xBE, 0xEF]));
        assert_eq!(written[2], set);
        assert_eq!(written[3], rtu_wire(&[0x01, 0x03, 0x02, 0x12, 0x34]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_write_executes_write_first() {
        // Write 0x1234 to register 0 and read registers 0..2 in the same
        // transaction: the response must show the fresh value.
        let request = rtu_wire(&[
            0x01, 0x17, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x02, 0x12, 0x34,
        ]);
        let mut device = BankDevice::new();
        device.holdings[0] = 0xDEAD;
        device.holdings[1] = 0x0002;
        let (mut slave, state) = rtu_slave(
            vec![(Duration::from_millis(0), request)],
            Box::new(device),
        );

        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        assert_eq!(
            written,
            vec![rtu_wire(&[0x01, 0x17, 0x04, 0x12, 0x34, 0x00, 0x02])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_multiple_registers_applies_all() {
        let request = rtu_wire(&[
            0x01, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02,
        ]);
        let read = rtu_wire(&[0x01, 0x03, 0x00, 0x01, 0x00, 0x02]);
        let (mut slave, state) = rtu_slave(
            vec![
                (Duration::from_millis(0), request),
                (Duration::from_millis(100), read),
            ],
            Box::new(BankDevice::new()),
        );

        slave.step().await.unwrap();
        slave.step().await.unwrap();

        let written = state.lock().unwrap().written.clone();
        assert_eq!(written[0], rtu_wire(&[0x01, 0x10, 0x00, 0x01, 0x00, 0x02]));
        assert_eq!(
            written[1],
            rtu_wire(&[0x01, 0x03, 0x04, 0x00, 0x0A, 0x01, 0x02])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tcp_request_response() {
        let mut device = BankDevice::new();
        device.holdings[0] = 0x1234;
        device.holdings[1] = 0x5678;

        let request = vec![
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x00, 0x00, 0x02,
        ];
        let (mut slave, state) = tcp_slave(
            vec![(Duration::from_millis(0), request)],
            0x11,
            Box::new(device),
        );

        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        assert_eq!(
            written,
            vec![vec![
                0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x11, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78
            ]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tcp_protocol_id_mismatch_dropped() {
        let request = vec![
            0x00, 0x01, 0x00, 0x07, 0x00, 0x06, 0x11, 0x03, 0x00, 0x00, 0x00, 0x02,
        ];
        let (mut slave, state) = tcp_slave(
            vec![(Duration::from_millis(0), request)],
            0x11,
            Box::new(BankDevice::new()),
        );

        slave.step().await.unwrap();
        assert!(state.lock().unwrap().written.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tcp_accept_any_unit_id() {
        let request = vec![
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x2A, 0x04, 0x00, 0x05, 0x00, 0x01,
        ];
        let (mut slave, state) = tcp_slave(
            vec![(Duration::from_millis(0), request)],
            ACCEPT_ANY_UNIT_ID,
            Box::new(BankDevice::new()),
        );

        slave.step().await.unwrap();
        let written = state.lock().unwrap().written.clone();
        // Input register 5 of the bank reads back as 5; unit id echoed.
        assert_eq!(
            written,
            vec![vec![
                0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x2A, 0x04, 0x02, 0x00, 0x05
            ]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_backs_off() {
        let (port, state) = MockPort::new(vec![]);
        state.lock().unwrap().fail_open = true;
        let mut slave =
            ModbusSlave::with_port(ModbusProto::Rtu, Box::new(port), 1, Box::new(EmptyDevice));

        let start = Instant::now();
        slave.step().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(SLAVE_RECONNECT_DELAY_MS));
        assert!(!slave.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_cycle_is_ok() {
        let (mut slave, state) = rtu_slave(vec![], Box::new(BankDevice::new()));
        slave.step().await.unwrap();
        assert!(state.lock().unwrap().written.is_empty());
    }
}
