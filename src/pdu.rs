//! Modbus PDU codec.
//!
//! The PDU (function code plus payload) is transport independent; RTU and
//! TCP only differ in how they wrap it. Several function codes have
//! asymmetric request/response layouts (0x03/0x04, 0x10, 0x17), so decoding
//! takes a [`PduDirection`] selecting which shape to expect. Encoding needs
//! no direction: each [`ModbusPdu`] variant is a single concrete layout.
//!
//! Decode failures are split in two so callers can react per the spec:
//! a malformed buffer yields [`ModbusError::Frame`] (silently dropped by a
//! slave), an unknown function code yields [`ModbusError::InvalidFunction`]
//! (answered with an illegal-function exception).

use tracing::trace;

use crate::bytes::get_u16;
use crate::constants::{
    MAX_FRAME_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::error::{ExceptionCode, ModbusError, ModbusResult};

/// Modbus slave/unit identifier.
pub type SlaveId = u8;

/// Supported function codes.
///
/// `ReadExceptionStatus` (0x07) and `ReportServerId` (0x11) are recognized
/// so they decode distinctly from garbage, but they are not dispatched:
/// the PDU codec rejects them as unsupported and a slave answers them with
/// exception 0x01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    /// 0x01 - Read Coils
    ReadCoils,
    /// 0x02 - Read Discrete Inputs
    ReadDiscreteInputs,
    /// 0x03 - Read Holding Registers
    ReadHoldingRegisters,
    /// 0x04 - Read Input Registers
    ReadInputRegisters,
    /// 0x05 - Write Single Coil
    WriteSingleCoil,
    /// 0x06 - Write Single Register
    WriteSingleRegister,
    /// 0x07 - Read Exception Status (recognized, not dispatched)
    ReadExceptionStatus,
    /// 0x0F - Write Multiple Coils
    WriteMultipleCoils,
    /// 0x10 - Write Multiple Registers
    WriteMultipleRegisters,
    /// 0x11 - Report Server ID (recognized, not dispatched)
    ReportServerId,
    /// 0x16 - Mask Write Register
    MaskWriteRegister,
    /// 0x17 - Read/Write Multiple Registers
    ReadWriteMultipleRegisters,
}

impl ModbusFunction {
    /// Decode a raw function-code byte.
    pub fn from_u8(code: u8) -> ModbusResult<Self> {
        match code {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            0x05 => Ok(Self::WriteSingleCoil),
            0x06 => Ok(Self::WriteSingleRegister),
            0x07 => Ok(Self::ReadExceptionStatus),
            0x0F => Ok(Self::WriteMultipleCoils),
            0x10 => Ok(Self::WriteMultipleRegisters),
            0x11 => Ok(Self::ReportServerId),
            0x16 => Ok(Self::MaskWriteRegister),
            0x17 => Ok(Self::ReadWriteMultipleRegisters),
            other => Err(ModbusError::invalid_function(other)),
        }
    }

    /// Raw byte as it appears on the wire.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::ReadExceptionStatus => 0x07,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportServerId => 0x11,
            Self::MaskWriteRegister => 0x16,
            Self::ReadWriteMultipleRegisters => 0x17,
        }
    }

    /// Human-readable function name.
    pub fn description(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::ReadExceptionStatus => "Read Exception Status",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
            Self::ReportServerId => "Report Server ID",
            Self::MaskWriteRegister => "Mask Write Register",
            Self::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
        }
    }
}

/// Which layout family to expect when decoding a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduDirection {
    /// Master-to-slave request shapes.
    Request,
    /// Slave-to-master response shapes.
    Response,
}

/// Decoded Modbus PDU, one variant per wire layout.
///
/// A `ReadResponse` always satisfies byte-count == `data.len()` by
/// construction; the on-wire byte-count field is derived on encode and
/// validated on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusPdu {
    /// Request of 0x01/0x02/0x03/0x04: `[fc][addr][qty]`.
    ReadRequest {
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    },
    /// Response of 0x01/0x02/0x03/0x04 and 0x17: `[fc][bc][payload]`.
    ReadResponse {
        function: ModbusFunction,
        data: Vec<u8>,
    },
    /// Request and response of 0x05/0x06: `[fc][addr][val]`.
    WriteSingle {
        function: ModbusFunction,
        address: u16,
        value: u16,
    },
    /// Request of 0x0F/0x10: `[fc][addr][qty][bc][payload]`.
    WriteMultipleRequest {
        function: ModbusFunction,
        address: u16,
        quantity: u16,
        data: Vec<u8>,
    },
    /// Response of 0x0F/0x10: `[fc][addr][qty]`.
    WriteMultipleResponse {
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    },
    /// Request and response of 0x16: `[fc][addr][and][or]`.
    MaskWrite {
        address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    /// Request of 0x17:
    /// `[fc][rd_addr][rd_qty][wr_addr][wr_qty][bc][payload]`.
    ReadWriteRequest {
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        write_quantity: u16,
        data: Vec<u8>,
    },
    /// Exception response: `[fc | 0x80][ec]`. `function` holds the
    /// original code without the high bit.
    Exception { function: u8, code: ExceptionCode },
}

impl ModbusPdu {
    /// Function-code byte as emitted on the wire (high bit set for
    /// exception responses).
    pub fn function_code(&self) -> u8 {
        match self {
            Self::ReadRequest { function, .. }
            | Self::ReadResponse { function, .. }
            | Self::WriteSingle { function, .. }
            | Self::WriteMultipleRequest { function, .. }
            | Self::WriteMultipleResponse { function, .. } => function.to_u8(),
            Self::MaskWrite { .. } => ModbusFunction::MaskWriteRegister.to_u8(),
            Self::ReadWriteRequest { .. } => ModbusFunction::ReadWriteMultipleRegisters.to_u8(),
            Self::Exception { function, .. } => function | 0x80,
        }
    }

    /// True for exception responses.
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    /// Build the exception response answering this PDU's function code.
    pub fn to_exception(&self, code: ExceptionCode) -> ModbusPdu {
        ModbusPdu::Exception {
            function: self.function_code() & 0x7F,
            code,
        }
    }

    /// Structural size of the encoded PDU in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::ReadRequest { .. } => 5,
            Self::ReadResponse { data, .. } => 2 + data.len(),
            Self::WriteSingle { .. } => 5,
            Self::WriteMultipleRequest { data, .. } => 6 + data.len(),
            Self::WriteMultipleResponse { .. } => 5,
            Self::MaskWrite { .. } => 7,
            Self::ReadWriteRequest { data, .. } => 10 + data.len(),
            Self::Exception { .. } => 2,
        }
    }

    /// Serialize into a frame buffer, returning the bytes produced.
    pub fn encode_into(&self, buf: &mut FrameBuffer) -> ModbusResult<usize> {
        let start = buf.len();
        match self {
            Self::ReadRequest {
                function,
                address,
                quantity,
            } => {
                buf.push(function.to_u8())?;
                buf.push_u16(*address)?;
                buf.push_u16(*quantity)?;
            }
            Self::ReadResponse { function, data } => {
                byte_count_of(data)?;
                buf.push(function.to_u8())?;
                buf.push(data.len() as u8)?;
                buf.extend(data)?;
            }
            Self::WriteSingle {
                function,
                address,
                value,
            } => {
                buf.push(function.to_u8())?;
                buf.push_u16(*address)?;
                buf.push_u16(*value)?;
            }
            Self::WriteMultipleRequest {
                function,
                address,
                quantity,
                data,
            } => {
                byte_count_of(data)?;
                buf.push(function.to_u8())?;
                buf.push_u16(*address)?;
                buf.push_u16(*quantity)?;
                buf.push(data.len() as u8)?;
                buf.extend(data)?;
            }
            Self::WriteMultipleResponse {
                function,
                address,
                quantity,
            } => {
                buf.push(function.to_u8())?;
                buf.push_u16(*address)?;
                buf.push_u16(*quantity)?;
            }
            Self::MaskWrite {
                address,
                and_mask,
                or_mask,
            } => {
                buf.push(ModbusFunction::MaskWriteRegister.to_u8())?;
                buf.push_u16(*address)?;
                buf.push_u16(*and_mask)?;
                buf.push_u16(*or_mask)?;
            }
            Self::ReadWriteRequest {
                read_address,
                read_quantity,
                write_address,
                write_quantity,
                data,
            } => {
                byte_count_of(data)?;
                buf.push(ModbusFunction::ReadWriteMultipleRegisters.to_u8())?;
                buf.push_u16(*read_address)?;
                buf.push_u16(*read_quantity)?;
                buf.push_u16(*write_address)?;
                buf.push_u16(*write_quantity)?;
                buf.push(data.len() as u8)?;
                buf.extend(data)?;
            }
            Self::Exception { function, code } => {
                buf.push(function | 0x80)?;
                buf.push(code.to_u8())?;
            }
        }

        trace!(
            "PDU encoded: FC=0x{:02X}, {} bytes",
            self.function_code(),
            buf.len() - start
        );
        Ok(buf.len() - start)
    }

    /// Parse one PDU from the start of `buf`, returning the variant and
    /// the number of bytes consumed.
    ///
    /// Trailing bytes beyond the structural size are left for the caller;
    /// frame codecs decide whether slack is acceptable.
    pub fn decode(buf: &[u8], direction: PduDirection) -> ModbusResult<(ModbusPdu, usize)> {
        if buf.is_empty() {
            return Err(ModbusError::frame("empty PDU"));
        }

        let fc = buf[0];
        if fc & 0x80 != 0 {
            if buf.len() < 2 {
                return Err(ModbusError::frame("truncated exception response"));
            }
            return Ok((
                ModbusPdu::Exception {
                    function: fc & 0x7F,
                    code: ExceptionCode::from_u8(buf[1]),
                },
                2,
            ));
        }

        let function = ModbusFunction::from_u8(fc)?;
        match function {
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
                Self::decode_read(buf, function, direction, 1, MAX_READ_COILS, false)
            }
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                Self::decode_read(buf, function, direction, 1, MAX_READ_REGISTERS, true)
            }
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                if buf.len() < 5 {
                    return Err(ModbusError::frame("short write-single PDU"));
                }
                Ok((
                    ModbusPdu::WriteSingle {
                        function,
                        address: get_u16(&buf[1..]),
                        value: get_u16(&buf[3..]),
                    },
                    5,
                ))
            }
            ModbusFunction::WriteMultipleCoils => {
                Self::decode_write_multiple(buf, function, direction, MAX_WRITE_COILS, false)
            }
            ModbusFunction::WriteMultipleRegisters => {
                Self::decode_write_multiple(buf, function, direction, MAX_WRITE_REGISTERS, true)
            }
            ModbusFunction::MaskWriteRegister => {
                if buf.len() < 7 {
                    return Err(ModbusError::frame("short mask-write PDU"));
                }
                Ok((
                    ModbusPdu::MaskWrite {
                        address: get_u16(&buf[1..]),
                        and_mask: get_u16(&buf[3..]),
                        or_mask: get_u16(&buf[5..]),
                    },
                    7,
                ))
            }
            ModbusFunction::ReadWriteMultipleRegisters => match direction {
                PduDirection::Request => Self::decode_read_write_request(buf),
                PduDirection::Response => {
                    Self::decode_read_response(buf, function, true)
                }
            },
            // Recognized codes without a dispatchable shape.
            ModbusFunction::ReadExceptionStatus | ModbusFunction::ReportServerId => {
                Err(ModbusError::invalid_function(fc))
            }
        }
    }

    fn decode_read(
        buf: &[u8],
        function: ModbusFunction,
        direction: PduDirection,
        min_qty: u16,
        max_qty: u16,
        registers: bool,
    ) -> ModbusResult<(ModbusPdu, usize)> {
        match direction {
            PduDirection::Request => {
                if buf.len() < 5 {
                    return Err(ModbusError::frame("short read request PDU"));
                }
                let quantity = get_u16(&buf[3..]);
                if quantity < min_qty || quantity > max_qty {
                    return Err(ModbusError::frame(format!(
                        "read quantity {} out of range {}..={}",
                        quantity, min_qty, max_qty
                    )));
                }
                Ok((
                    ModbusPdu::ReadRequest {
                        function,
                        address: get_u16(&buf[1..]),
                        quantity,
                    },
                    5,
                ))
            }
            PduDirection::Response => Self::decode_read_response(buf, function, registers),
        }
    }

    fn decode_read_response(
        buf: &[u8],
        function: ModbusFunction,
        registers: bool,
    ) -> ModbusResult<(ModbusPdu, usize)> {
        if buf.len() < 2 {
            return Err(ModbusError::frame("short read response PDU"));
        }
        let byte_count = buf[1] as usize;
        if registers && byte_count % 2 != 0 {
            return Err(ModbusError::frame("odd byte count in register response"));
        }
        if buf.len() < 2 + byte_count {
            return Err(ModbusError::frame("read response shorter than byte count"));
        }
        Ok((
            ModbusPdu::ReadResponse {
                function,
                data: buf[2..2 + byte_count].to_vec(),
            },
            2 + byte_count,
        ))
    }

    fn decode_write_multiple(
        buf: &[u8],
        function: ModbusFunction,
        direction: PduDirection,
        max_qty: u16,
        registers: bool,
    ) -> ModbusResult<(ModbusPdu, usize)> {
        match direction {
            PduDirection::Request => {
                if buf.len() < 6 {
                    return Err(ModbusError::frame("short write-multiple request PDU"));
                }
                let quantity = get_u16(&buf[3..]);
                if quantity == 0 || quantity > max_qty {
                    return Err(ModbusError::frame(format!(
                        "write quantity {} out of range 1..={}",
                        quantity, max_qty
                    )));
                }
                let byte_count = buf[5] as usize;
                let expected = if registers {
                    quantity as usize * 2
                } else {
                    (quantity as usize).div_ceil(8)
                };
                if byte_count != expected {
                    return Err(ModbusError::frame(format!(
                        "byte count {} does not match quantity {}",
                        byte_count, quantity
                    )));
                }
                if buf.len() < 6 + byte_count {
                    return Err(ModbusError::frame("write-multiple request shorter than byte count"));
                }
                Ok((
                    ModbusPdu::WriteMultipleRequest {
                        function,
                        address: get_u16(&buf[1..]),
                        quantity,
                        data: buf[6..6 + byte_count].to_vec(),
                    },
                    6 + byte_count,
                ))
            }
            PduDirection::Response => {
                if buf.len() < 5 {
                    return Err(ModbusError::frame("short write-multiple response PDU"));
                }
                Ok((
                    ModbusPdu::WriteMultipleResponse {
                        function,
                        address: get_u16(&buf[1..]),
                        quantity: get_u16(&buf[3..]),
                    },
                    5,
                ))
            }
        }
    }

    fn decode_read_write_request(buf: &[u8]) -> ModbusResult<(ModbusPdu, usize)> {
        if buf.len() < 10 {
            return Err(ModbusError::frame("short read/write request PDU"));
        }
        let read_quantity = get_u16(&buf[3..]);
        let write_quantity = get_u16(&buf[7..]);
        if read_quantity == 0 || read_quantity > MAX_READ_REGISTERS {
            return Err(ModbusError::frame("read/write read quantity out of range"));
        }
        if write_quantity == 0 || write_quantity > MAX_WRITE_REGISTERS {
            return Err(ModbusError::frame("read/write write quantity out of range"));
        }
        let byte_count = buf[9] as usize;
        if byte_count != write_quantity as usize * 2 {
            return Err(ModbusError::frame("read/write byte count mismatch"));
        }
        if buf.len() < 10 + byte_count {
            return Err(ModbusError::frame("read/write request shorter than byte count"));
        }
        Ok((
            ModbusPdu::ReadWriteRequest {
                read_address: get_u16(&buf[1..]),
                read_quantity,
                write_address: get_u16(&buf[5..]),
                write_quantity,
                data: buf[10..10 + byte_count].to_vec(),
            },
            10 + byte_count,
        ))
    }
}

/// Bounded scratch buffer sized for the larger of the two frame maxima.
///
/// Frames are assembled here before transmission; the fixed array keeps
/// the hot path free of allocation and bounds every frame at the protocol
/// maximum.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    data: [u8; MAX_FRAME_SIZE],
    len: usize,
}

impl FrameBuffer {
    /// Create an empty buffer.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_FRAME_SIZE],
            len: 0,
        }
    }

    /// Append a single byte.
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_FRAME_SIZE {
            return Err(ModbusError::frame("frame buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append a u16 big-endian.
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    /// Append a byte slice.
    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.len + data.len() > MAX_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "frame would exceed {} bytes",
                MAX_FRAME_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Filled portion of the buffer.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reset for reuse.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn byte_count_of(data: &[u8]) -> ModbusResult<u8> {
    u8::try_from(data.len())
        .map_err(|_| ModbusError::invalid_data("payload exceeds 255-byte count field"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(pdu: &ModbusPdu) -> Vec<u8> {
        let mut buf = FrameBuffer::new();
        let n = pdu.encode_into(&mut buf).unwrap();
        assert_eq!(n, buf.len());
        buf.as_slice().to_vec()
    }

    #[test]
    fn test_read_request_layout() {
        let pdu = ModbusPdu::ReadRequest {
            function: ModbusFunction::ReadHoldingRegisters,
            address: 0x006B,
            quantity: 3,
        };
        assert_eq!(encode(&pdu), [0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(pdu.encoded_len(), 5);
    }

    #[test]
    fn test_exception_layout() {
        let pdu = ModbusPdu::Exception {
            function: 0x03,
            code: ExceptionCode::IllegalDataAddress,
        };
        assert_eq!(encode(&pdu), [0x83, 0x02]);
        assert_eq!(pdu.function_code(), 0x83);
        assert!(pdu.is_exception());
    }

    #[test]
    fn test_encoded_len_matches_structure() {
        let cases = [
            ModbusPdu::ReadRequest {
                function: ModbusFunction::ReadCoils,
                address: 0,
                quantity: 16,
            },
            ModbusPdu::ReadResponse {
                function: ModbusFunction::ReadCoils,
                data: vec![0xAA, 0x55],
            },
            ModbusPdu::WriteSingle {
                function: ModbusFunction::WriteSingleCoil,
                address: 10,
                value: 0xFF00,
            },
            ModbusPdu::WriteMultipleRequest {
                function: ModbusFunction::WriteMultipleRegisters,
                address: 1,
                quantity: 2,
                data: vec![0x00, 0x0A, 0x01, 0x02],
            },
            ModbusPdu::WriteMultipleResponse {
                function: ModbusFunction::WriteMultipleCoils,
                address: 1,
                quantity: 9,
            },
            ModbusPdu::MaskWrite {
                address: 4,
                and_mask: 0x00F2,
                or_mask: 0x0025,
            },
            ModbusPdu::ReadWriteRequest {
                read_address: 3,
                read_quantity: 6,
                write_address: 14,
                write_quantity: 3,
                data: vec![0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF],
            },
            ModbusPdu::Exception {
                function: 0x01,
                code: ExceptionCode::IllegalFunction,
            },
        ];
        for pdu in cases {
            assert_eq!(encode(&pdu).len(), pdu.encoded_len(), "{:?}", pdu);
        }
    }

    #[test]
    fn test_roundtrip_every_function() {
        let requests = [
            ModbusPdu::ReadRequest {
                function: ModbusFunction::ReadCoils,
                address: 0x0013,
                quantity: 0x0025,
            },
            ModbusPdu::ReadRequest {
                function: ModbusFunction::ReadDiscreteInputs,
                address: 0x00C4,
                quantity: 0x0016,
            },
            ModbusPdu::ReadRequest {
                function: ModbusFunction::ReadHoldingRegisters,
                address: 0x006B,
                quantity: 0x0003,
            },
            ModbusPdu::ReadRequest {
                function: ModbusFunction::ReadInputRegisters,
                address: 0x0008,
                quantity: 0x0001,
            },
            ModbusPdu::WriteSingle {
                function: ModbusFunction::WriteSingleCoil,
                address: 0x00AC,
                value: 0xFF00,
            },
            ModbusPdu::WriteSingle {
                function: ModbusFunction::WriteSingleRegister,
                address: 0x0001,
                value: 0x0003,
            },
            ModbusPdu::WriteMultipleRequest {
                function: ModbusFunction::WriteMultipleCoils,
                address: 0x0013,
                quantity: 10,
                data: vec![0xCD, 0x01],
            },
            ModbusPdu::WriteMultipleRequest {
                function: ModbusFunction::WriteMultipleRegisters,
                address: 0x0001,
                quantity: 2,
                data: vec![0x00, 0x0A, 0x01, 0x02],
            },
            ModbusPdu::MaskWrite {
                address: 0x0004,
                and_mask: 0x00F2,
                or_mask: 0x0025,
            },
            ModbusPdu::ReadWriteRequest {
                read_address: 0x0003,
                read_quantity: 6,
                write_address: 0x000E,
                write_quantity: 3,
                data: vec![0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF],
            },
        ];
        for pdu in requests {
            let bytes = encode(&pdu);
            let (decoded, used) = ModbusPdu::decode(&bytes, PduDirection::Request).unwrap();
            assert_eq!(decoded, pdu);
            assert_eq!(used, bytes.len());
        }

        let responses = [
            ModbusPdu::ReadResponse {
                function: ModbusFunction::ReadCoils,
                data: vec![0xCD, 0x6B, 0x05],
            },
            ModbusPdu::ReadResponse {
                function: ModbusFunction::ReadHoldingRegisters,
                data: vec![0xAE, 0x41, 0x56, 0x52, 0x43, 0x40],
            },
            ModbusPdu::ReadResponse {
                function: ModbusFunction::ReadWriteMultipleRegisters,
                data: vec![0x00, 0xFE, 0x0A, 0xCD],
            },
            ModbusPdu::WriteSingle {
                function: ModbusFunction::WriteSingleCoil,
                address: 0x00AC,
                value: 0xFF00,
            },
            ModbusPdu::WriteMultipleResponse {
                function: ModbusFunction::WriteMultipleCoils,
                address: 0x0013,
                quantity: 10,
            },
            ModbusPdu::WriteMultipleResponse {
                function: ModbusFunction::WriteMultipleRegisters,
                address: 0x0001,
                quantity: 2,
            },
            ModbusPdu::MaskWrite {
                address: 0x0004,
                and_mask: 0x00F2,
                or_mask: 0x0025,
            },
            ModbusPdu::Exception {
                function: 0x03,
                code: ExceptionCode::ServerDeviceFailure,
            },
        ];
        for pdu in responses {
            let bytes = encode(&pdu);
            let (decoded, used) = ModbusPdu::decode(&bytes, PduDirection::Response).unwrap();
            assert_eq!(decoded, pdu);
            assert_eq!(used, bytes.len());
        }
    }

    #[test]
    fn test_unknown_function_is_distinct_from_malformed() {
        let err = ModbusPdu::decode(&[0x65, 0x00, 0x01], PduDirection::Request).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidFunction { code: 0x65 }));

        // Truncated but known function -> frame error.
        let err = ModbusPdu::decode(&[0x03, 0x00], PduDirection::Request).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    #[test]
    fn test_recognized_functions_not_dispatched() {
        for fc in [0x07u8, 0x11] {
            assert!(ModbusFunction::from_u8(fc).is_ok());
            let err = ModbusPdu::decode(&[fc], PduDirection::Request).unwrap_err();
            assert!(matches!(err, ModbusError::InvalidFunction { code } if code == fc));
        }
    }

    #[test]
    fn test_quantity_range_enforced() {
        // 2001 coils is out of range.
        let err =
            ModbusPdu::decode(&[0x01, 0x00, 0x00, 0x07, 0xD1], PduDirection::Request).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));

        // 126 registers is out of range.
        let err =
            ModbusPdu::decode(&[0x03, 0x00, 0x00, 0x00, 0x7E], PduDirection::Request).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));

        // Zero quantity is out of range.
        let err =
            ModbusPdu::decode(&[0x04, 0x00, 0x00, 0x00, 0x00], PduDirection::Request).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    #[test]
    fn test_byte_count_consistency_enforced() {
        // FC15 with qty=10 requires bc=2; claim 3.
        let err = ModbusPdu::decode(
            &[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x03, 0xCD, 0x01, 0x00],
            PduDirection::Request,
        )
        .unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));

        // FC16 with qty=2 requires bc=4; claim 2.
        let err = ModbusPdu::decode(
            &[0x10, 0x00, 0x01, 0x00, 0x02, 0x02, 0x00, 0x0A],
            PduDirection::Request,
        )
        .unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));

        // Register read response with odd byte count.
        let err = ModbusPdu::decode(&[0x03, 0x03, 0x00, 0x0A, 0x01], PduDirection::Response)
            .unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    #[test]
    fn test_frame_buffer_bounds() {
        let mut buf = FrameBuffer::new();
        assert!(buf.is_empty());
        buf.extend(&[0u8; MAX_FRAME_SIZE]).unwrap();
        assert_eq!(buf.len(), MAX_FRAME_SIZE);
        assert!(buf.push(0).is_err());
        assert!(buf.extend(&[0]).is_err());
        buf.clear();
        assert!(buf.is_empty());
    }
}
