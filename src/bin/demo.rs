//! Relay Modbus Demo
//!
//! Runs a loopback master/slave pair over TCP:
//! - a listener accepts one connection and adopts the socket into a
//!   `ModbusSlave` backed by an in-memory register bank
//! - a `ModbusMaster` connects and exercises reads, writes, mask-write,
//!   and the combined read/write transaction
//!
//! Usage: cargo run --bin demo

use relay_modbus::{ExceptionCode, ModbusDevice, ModbusMaster, ModbusSlave};
use tokio::net::TcpListener;

/// Simple register bank: 64 coils and 64 holding registers.
struct DemoBank {
    coils: [bool; 64],
    holdings: [u16; 64],
}

impl DemoBank {
    fn new() -> Self {
        let mut holdings = [0u16; 64];
        holdings[0] = 0x1234;
        holdings[1] = 0x5678;
        Self {
            coils: [false; 64],
            holdings,
        }
    }
}

impl ModbusDevice for DemoBank {
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", relay_modbus::info());
    println!("====================================");

    // Slave side: accept one connection and adopt the socket.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let slave_task = tokio::spawn(async move {
        let (socket, peer) = listener.accept().await.expect("accept failed");
        println!("  [slave] adopted connection from {}", peer);
        let mut slave = ModbusSlave::from_stream(socket, 17, Box::new(DemoBank::new()));
        // Runs until the master hangs up.
        let _ = slave.run().await;
        println!("  [slave] connection closed, shutting down");
    });

    // Master side.
    let mut master = ModbusMaster::new_tcp(addr.ip().to_string(), addr.port());
    master.set_slave_addr(17);
    master.connect().await?;
    println!("  [master] connected to {}", addr);

    println!("\nRead operations:");
    let regs = master.read_regs(0, 2).await?;
    println!("  holding registers 0-1: {:04X?}", regs);

    let coils = master.read_bits(0, 8).await?;
    println!("  coils 0-7: {:?}", coils);

    println!("\nWrite operations:");
    master.write_reg(10, 0xBEEF).await?;
    println!("  wrote register 10 = 0xBEEF");

    master.write_bits(0, &[true, false, true]).await?;
    println!("  wrote coils 0-2 = ON OFF ON");

    master.mask_write_reg(10, 0x00FF, 0x0000).await?;
    let masked = master.read_regs(10, 1).await?;
    println!("  mask-write kept the low byte: {:04X?}", masked);

    let exchanged = master.write_and_read_regs(20, &[0x0042], 20, 1).await?;
    println!("  read/write round trip on register 20: {:04X?}", exchanged);

    println!("\nExpected failure:");
    match master.read_regs(1000, 4).await {
        Err(e) => println!("  out-of-range read rejected: {}", e),
        Ok(v) => println!("  unexpected success: {:?}", v),
    }

    let stats = master.stats();
    println!("\nStatistics:");
    println!(
        "  requests: {}, responses: {}",
        stats.requests_sent, stats.responses_received
    );
    println!(
        "  bytes sent: {}, received: {}",
        stats.bytes_sent, stats.bytes_received
    );

    master.close().await?;
    let _ = slave_task.await;

    println!("\nDemo completed.");
    Ok(())
}
