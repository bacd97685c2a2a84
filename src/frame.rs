//! RTU and TCP frame codecs.
//!
//! Both transports carry the same PDU; the wrapping differs:
//!
//! - **RTU**: `[slave address][PDU][CRC lo][CRC hi]`, CRC-16/Modbus over
//!   everything before it.
//! - **TCP**: `[TID][PID][DLEN][UID][PDU]`, all header fields big-endian,
//!   `DLEN = PDU length + 1`, `PID = 0`.
//!
//! Decoding here validates structure only. Policy checks (address match,
//! MBAP transaction-id/protocol-id/length) belong to the master and slave
//! cores, which know what they sent and what they accept.

use crate::bytes::get_u16;
use crate::constants::{MBAP_HEADER_SIZE, MBAP_PROTOCOL_ID, MIN_TCP_FRAME_SIZE};
use crate::crc;
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::{FrameBuffer, ModbusPdu, PduDirection, SlaveId};

/// Wire framing used by an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusProto {
    /// Serial framing: slave address prefix and CRC-16 suffix.
    Rtu,
    /// MBAP framing: 7-byte header, no checksum (TCP provides integrity).
    Tcp,
}

/// A Modbus RTU frame: slave address plus PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    pub slave: SlaveId,
    pub pdu: ModbusPdu,
}

impl RtuFrame {
    /// Create a frame.
    pub fn new(slave: SlaveId, pdu: ModbusPdu) -> Self {
        Self { slave, pdu }
    }

    /// Serialize address, PDU, and trailing CRC (little-endian on the
    /// wire); returns the total frame length.
    pub fn encode_into(&self, buf: &mut FrameBuffer) -> ModbusResult<usize> {
        buf.clear();
        buf.push(self.slave)?;
        self.pdu.encode_into(buf)?;
        let crc = crc::checksum(buf.as_slice());
        buf.extend(&crc::to_wire(crc))?;
        Ok(buf.len())
    }

    /// Parse and CRC-check a received frame.
    ///
    /// The CRC is recomputed over everything but the last two bytes; a
    /// mismatch or short frame is a [`ModbusError::Frame`]. Slack bytes
    /// between the PDU and the CRC are tolerated (the CRC still covers
    /// them), matching lenient field practice.
    pub fn decode(buf: &[u8], direction: PduDirection) -> ModbusResult<RtuFrame> {
        if buf.len() < 4 {
            return Err(ModbusError::frame(format!(
                "RTU frame too short: {} bytes",
                buf.len()
            )));
        }

        let body = &buf[..buf.len() - 2];
        let received = crc::from_wire([buf[buf.len() - 2], buf[buf.len() - 1]]);
        let computed = crc::checksum(body);
        if received != computed {
            return Err(ModbusError::frame(format!(
                "CRC mismatch: computed 0x{:04X}, received 0x{:04X}",
                computed, received
            )));
        }

        let (pdu, _) = ModbusPdu::decode(&body[1..], direction)?;
        Ok(RtuFrame {
            slave: body[0],
            pdu,
        })
    }
}

/// MBAP header preceding every Modbus TCP PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Chosen by the master, echoed by the slave.
    pub transaction_id: u16,
    /// Always 0x0000 for Modbus.
    pub protocol_id: u16,
    /// Unit identifier plus PDU length; filled on decode, computed on
    /// encode.
    pub length: u16,
    /// Routing byte, the TCP analogue of the RTU slave address.
    pub unit_id: u8,
}

/// A Modbus TCP frame: MBAP header plus PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFrame {
    pub header: MbapHeader,
    pub pdu: ModbusPdu,
}

impl TcpFrame {
    /// Create a frame; the header length field is derived from the PDU.
    pub fn new(transaction_id: u16, unit_id: u8, pdu: ModbusPdu) -> Self {
        let length = pdu.encoded_len() as u16 + 1;
        Self {
            header: MbapHeader {
                transaction_id,
                protocol_id: MBAP_PROTOCOL_ID,
                length,
                unit_id,
            },
            pdu,
        }
    }

    /// Serialize header and PDU; returns the total frame length.
    /// `DLEN` is always recomputed from the PDU being written.
    pub fn encode_into(&self, buf: &mut FrameBuffer) -> ModbusResult<usize> {
        buf.clear();
        buf.push_u16(self.header.transaction_id)?;
        buf.push_u16(self.header.protocol_id)?;
        buf.push_u16(self.pdu.encoded_len() as u16 + 1)?;
        buf.push(self.header.unit_id)?;
        self.pdu.encode_into(buf)?;
        Ok(buf.len())
    }

    /// Parse a received frame, returning it together with the decoded PDU
    /// length so callers can verify `DLEN == pdu_len + 1`.
    pub fn decode(buf: &[u8], direction: PduDirection) -> ModbusResult<(TcpFrame, usize)> {
        if buf.len() < MIN_TCP_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "TCP frame too short: {} bytes",
                buf.len()
            )));
        }

        let header = MbapHeader {
            transaction_id: get_u16(buf),
            protocol_id: get_u16(&buf[2..]),
            length: get_u16(&buf[4..]),
            unit_id: buf[6],
        };
        let (pdu, pdu_len) = ModbusPdu::decode(&buf[MBAP_HEADER_SIZE..], direction)?;
        Ok((TcpFrame { header, pdu }, pdu_len))
    }
}
