//! Core error types and result handling.
//!
//! Every failure in the stack surfaces as a [`ModbusError`]; nothing panics
//! across the engine boundary. The variants mirror the failure classes of a
//! Modbus transaction in increasing severity: timeouts, framing errors,
//! protocol exceptions returned by the peer, and transport failures.

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus exception code carried in an exception response PDU.
///
/// The standard set handled by this stack is 0x01..0x04; anything else a
/// peer sends is preserved verbatim in [`ExceptionCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// 0x01 - function code not supported by the server
    IllegalFunction,
    /// 0x02 - data address out of the server's range
    IllegalDataAddress,
    /// 0x03 - value in the request is not acceptable
    IllegalDataValue,
    /// 0x04 - unrecoverable failure while servicing the request
    ServerDeviceFailure,
    /// Any other code observed on the wire
    Other(u8),
}

impl ExceptionCode {
    /// Decode a raw exception-code byte.
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            other => Self::Other(other),
        }
    }

    /// Raw byte as it appears on the wire.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Other(code) => code,
        }
    }

    /// Human-readable description per the Modbus specification.
    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "server device failure",
            Self::Other(_) => "vendor-specific exception",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exception 0x{:02X} ({})", self.to_u8(), self.description())
    }
}

/// Errors produced by the Modbus stack.
#[derive(Error, Debug)]
pub enum ModbusError {
    /// Transport could not be opened, or the peer went away.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// I/O failure from the underlying port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The ack or byte timeout elapsed without a usable frame.
    #[error("Timeout waiting for {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Frame-level validation failed: CRC mismatch, short frame, bad MBAP
    /// fields, address or transaction-id mismatch.
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Protocol-level inconsistency in an otherwise well-framed message.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Caller-supplied arguments out of spec range.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Function code not supported by this stack (distinct from a
    /// malformed frame, so callers can synthesize an illegal-function
    /// exception or report it as such).
    #[error("Unsupported function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// The peer answered with an exception response PDU.
    #[error("Modbus exception: function 0x{function:02X}, {code}")]
    Exception { function: u8, code: ExceptionCode },

    /// Invalid construction-time configuration.
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a connection error.
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a frame error.
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an invalid-data error.
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create an unsupported-function error.
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an exception error from the original function code and the
    /// raw exception-code byte.
    pub fn exception(function: u8, code: ExceptionCode) -> Self {
        Self::Exception { function, code }
    }

    /// Create a configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The exception code, when this error is a peer exception response.
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Self::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when this error is a response/byte timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
