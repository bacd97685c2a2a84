//! Byte-stream transport layer.
//!
//! The protocol engine talks to the outside world through [`ModbusPort`], a
//! byte-oriented contract with non-blocking reads. [`Backend`] layers the
//! Modbus frame-delimitation timing on top of any port: an *ack timeout*
//! bounds the wait for the first byte of a frame, a *byte timeout* (the
//! 3.5-character silence gap) delimits the end of a frame once bytes are
//! flowing.
//!
//! Two ports ship with the crate: [`TcpPort`] (outbound connect or an
//! adopted, already-accepted socket) and [`SerialPort`] behind the `rtu`
//! feature. Anything else — RS-485 direction control, TLS, tunnels — lives
//! in the integrator's own `ModbusPort` implementation.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BYTE_TIMEOUT_MS, READ_POLL_INTERVAL_MS,
};
use crate::error::{ModbusError, ModbusResult};

/// Byte-oriented transport contract implemented per medium.
///
/// Read semantics: `try_read` must never block. `Ok(0)` means "no data
/// available right now"; a closed peer is a [`ModbusError::Connection`].
/// Platforms where "no data" surfaces differently (EAGAIN, WouldBlock,
/// zero-length reads) translate here, not in the engine.
#[async_trait]
pub trait ModbusPort: Send {
    /// Open the underlying channel. Idempotent: opening an open port
    /// succeeds without side effects.
    async fn open(&mut self) -> ModbusResult<()>;

    /// Close the underlying channel. Idempotent.
    async fn close(&mut self) -> ModbusResult<()>;

    /// Non-blocking read into `buf`; `Ok(0)` when nothing is pending.
    fn try_read(&mut self, buf: &mut [u8]) -> ModbusResult<usize>;

    /// Write `buf`, returning the bytes written. Implementations should
    /// write the whole buffer or fail.
    async fn write(&mut self, buf: &[u8]) -> ModbusResult<usize>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;

    /// Discard any buffered inbound bytes. The default drains `try_read`
    /// until it reports no data.
    fn flush_input(&mut self) -> ModbusResult<()> {
        let mut scratch = [0u8; 64];
        while self.try_read(&mut scratch)? > 0 {}
        Ok(())
    }
}

/// Transport layer statistics.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

// ============================================================================
// TCP port
// ============================================================================

/// TCP byte port.
///
/// Created either with a peer to connect to ([`TcpPort::new`]) or around a
/// socket accepted elsewhere ([`TcpPort::from_stream`]). An adopted socket
/// counts as already open; once it goes away it cannot be reopened, since
/// this crate deliberately has no accept loop.
pub struct TcpPort {
    peer: Option<(String, u16)>,
    stream: Option<TcpStream>,
}

impl TcpPort {
    /// Port that connects to `host:port` on open.
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            peer: Some((host.into(), port)),
            stream: None,
        }
    }

    /// Adopt an externally accepted, already connected socket.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            peer: None,
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl ModbusPort for TcpPort {
    async fn open(&mut self) -> ModbusResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let (host, port) = self.peer.as_ref().ok_or_else(|| {
            ModbusError::connection("adopted socket is gone and cannot be reopened")
        })?;
        let stream = TcpStream::connect((host.as_str(), *port))
            .await
            .map_err(|e| {
                ModbusError::connection(format!("connect to {}:{} failed: {}", host, port, e))
            })?;
        debug!("TCP port connected to {}:{}", host, port);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn try_read(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP port not open"))?;
        match stream.try_read(buf) {
            Ok(0) => Err(ModbusError::connection("peer closed the connection")),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(ModbusError::Io(e)),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> ModbusResult<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP port not open"))?;
        stream.write_all(buf).await?;
        Ok(buf.len())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

// ============================================================================
// Serial port (feature "rtu")
// ============================================================================

/// Serial line parameters, 8N1 by default.
#[cfg(feature = "rtu")]
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
}

#[cfg(feature = "rtu")]
impl SerialConfig {
    /// 8N1 configuration for the given device and baud rate.
    pub fn new<S: Into<String>>(path: S, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
        }
    }

    /// Override the parity bit.
    pub fn with_parity(mut self, parity: tokio_serial::Parity) -> Self {
        self.parity = parity;
        self
    }
}

/// Serial byte port for RTU links.
///
/// RS-485 direction (DE pin) control is a driver concern and sits below
/// this port.
#[cfg(feature = "rtu")]
pub struct SerialPort {
    config: SerialConfig,
    stream: Option<tokio_serial::SerialStream>,
}

#[cfg(feature = "rtu")]
impl SerialPort {
    /// Port that opens the configured device on open.
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }
}

#[cfg(feature = "rtu")]
#[async_trait]
impl ModbusPort for SerialPort {
    async fn open(&mut self) -> ModbusResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let builder = tokio_serial::new(&self.config.path, self.config.baud_rate)
            .data_bits(self.config.data_bits)
            .stop_bits(self.config.stop_bits)
            .parity(self.config.parity);
        let stream = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            ModbusError::connection(format!("open {} failed: {}", self.config.path, e))
        })?;
        debug!(
            "serial port {} open at {} baud",
            self.config.path, self.config.baud_rate
        );
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.stream = None;
        Ok(())
    }

    fn try_read(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not open"))?;
        match stream.try_read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(ModbusError::Io(e)),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> ModbusResult<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not open"))?;
        stream.write_all(buf).await?;
        Ok(buf.len())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

// ============================================================================
// Backend: timing layer over a port
// ============================================================================

/// A [`ModbusPort`] with the frame-delimitation timers and statistics.
pub struct Backend {
    port: Box<dyn ModbusPort>,
    ack_timeout: Duration,
    byte_timeout: Duration,
    stats: TransportStats,
}

impl Backend {
    /// Wrap a port with the default timeouts (300 ms ack, 32 ms byte).
    pub fn new(port: Box<dyn ModbusPort>) -> Self {
        Self {
            port,
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            byte_timeout: Duration::from_millis(DEFAULT_BYTE_TIMEOUT_MS),
            stats: TransportStats::default(),
        }
    }

    /// Replace both timeouts; effective from the next read.
    pub fn set_timeouts(&mut self, ack_ms: u64, byte_ms: u64) {
        self.ack_timeout = Duration::from_millis(ack_ms);
        self.byte_timeout = Duration::from_millis(byte_ms);
    }

    /// The ack timeout in milliseconds.
    pub fn ack_timeout_ms(&self) -> u64 {
        self.ack_timeout.as_millis() as u64
    }

    /// Open the port (idempotent).
    pub async fn open(&mut self) -> ModbusResult<()> {
        self.port.open().await
    }

    /// Close the port (idempotent).
    pub async fn close(&mut self) -> ModbusResult<()> {
        self.port.close().await
    }

    /// Whether the port is open.
    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    /// Discard stale inbound bytes.
    pub fn flush_input(&mut self) -> ModbusResult<()> {
        self.port.flush_input()
    }

    /// Snapshot of the transport statistics.
    pub fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    pub(crate) fn stats_mut(&mut self) -> &mut TransportStats {
        &mut self.stats
    }

    /// Receive one frame using the two-timer contract.
    ///
    /// Polls the port's non-blocking read on a 2 ms quantum. Before the
    /// first byte arrives the ack timeout applies; `Ok(0)` reports that
    /// nothing answered. Once bytes flow, silence longer than the byte
    /// timeout ends the frame and `Ok(n)` returns it. Each received chunk
    /// resets the silence timer.
    pub async fn read_frame(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        if !self.port.is_open() {
            return Err(ModbusError::connection("backend not open"));
        }

        let mut pos = 0;
        let mut last_event = Instant::now();
        while pos < buf.len() {
            match self.port.try_read(&mut buf[pos..]) {
                Ok(0) => {
                    let elapsed = last_event.elapsed();
                    if pos == 0 {
                        if elapsed > self.ack_timeout {
                            self.stats.timeouts += 1;
                            return Ok(0);
                        }
                    } else if elapsed > self.byte_timeout {
                        break;
                    }
                    sleep(Duration::from_millis(READ_POLL_INTERVAL_MS)).await;
                }
                Ok(n) => {
                    pos += n;
                    last_event = Instant::now();
                }
                Err(err) => {
                    warn!("frame read failed: {}", err);
                    self.stats.errors += 1;
                    return Err(err);
                }
            }
        }

        self.stats.bytes_received += pos as u64;
        Ok(pos)
    }

    /// Transmit one frame; anything short of a full write is an error.
    pub async fn write_frame(&mut self, data: &[u8]) -> ModbusResult<()> {
        if !self.port.is_open() {
            return Err(ModbusError::connection("backend not open"));
        }
        let written = match self.port.write(data).await {
            Ok(n) => n,
            Err(err) => {
                self.stats.errors += 1;
                return Err(err);
            }
        };
        if written != data.len() {
            self.stats.errors += 1;
            return Err(ModbusError::connection(format!(
                "short write: {} of {} bytes",
                written,
                data.len()
            )));
        }
        self.stats.bytes_sent += written as u64;
        Ok(())
    }
}

// ============================================================================
// Test support
// ============================================================================
