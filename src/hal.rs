//! ==============================================================================
//! hal.rs - Transport Adapters
//! ==============================================================================
//!
//! purpose:
//!     the narrow write-only capabilities the output side needs from hardware:
//!     - FieldBusLink: coil and byte-block writes to the PLC (modbus.rs)
//!     - ByteStream:   raw frames to display boards on a serial line
//!     - RegisterBus:  single register writes to i2c light cards
//!
//! design philosophy:
//!     - "Compile Anywhere": without the `hardware` feature the serial and i2c
//!       adapters are logging mocks, so the monitor runs on a dev machine.
//!     - On the Pi the same calls go straight to `rppal`.
//!
//! relationships:
//!     - used by: fieldbus.rs (wraps FieldBusLink), panel.rs
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("field bus connect failed: {0}")]
    Connect(String),
    #[error("field bus write failed: {0}")]
    Write(String),
    #[error("field bus url {0:?} is not tcp://host:port")]
    BadUrl(String),
}

/// Modbus-style link to the PLC. Opening may be retried after a close.
#[async_trait]
pub trait FieldBusLink: Send {
    async fn open(&mut self) -> Result<(), BusError>;
    async fn close(&mut self);
    async fn write_coils(&mut self, address: u16, values: &[bool]) -> Result<(), BusError>;
    async fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), BusError>;
}

/// Serial line to display boards.
pub trait ByteStream: Send {
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
}

/// Two-wire bus with addressed slaves.
pub trait RegisterBus: Send {
    fn write_register(&mut self, slave: u8, register: u8, value: u8) -> Result<()>;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct MockSerial {
    port: String,
}

#[cfg(not(feature = "hardware"))]
pub struct MockI2c {
    bus: u8,
}

#[cfg(not(feature = "hardware"))]
pub fn open_serial(port: &str, baud_rate: u32) -> Result<Box<dyn ByteStream>> {
    tracing::info!("Using MOCK serial port {} @ {} baud (no hardware access)", port, baud_rate);
    Ok(Box::new(MockSerial { port: port.to_string() }))
}

#[cfg(not(feature = "hardware"))]
pub fn open_register_bus(bus: u8) -> Result<Box<dyn RegisterBus>> {
    tracing::info!("Using MOCK i2c bus {} (no hardware access)", bus);
    Ok(Box::new(MockI2c { bus }))
}

#[cfg(not(feature = "hardware"))]
impl ByteStream for MockSerial {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        tracing::debug!("[MOCK SERIAL] {} write {}", self.port, hex::encode(data));
        Ok(())
    }
}

#[cfg(not(feature = "hardware"))]
impl RegisterBus for MockI2c {
    fn write_register(&mut self, slave: u8, register: u8, value: u8) -> Result<()> {
        tracing::debug!(
            "[MOCK I2C] Bus {} Addr: 0x{:02X}, Reg: 0x{:02X}, Value: 0x{:02X}",
            self.bus, slave, register, value
        );
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct PiSerial {
    uart: rppal::uart::Uart,
}

#[cfg(feature = "hardware")]
pub struct PiI2c {
    i2c: rppal::i2c::I2c,
}

#[cfg(feature = "hardware")]
pub fn open_serial(port: &str, baud_rate: u32) -> Result<Box<dyn ByteStream>> {
    use rppal::uart::{Parity, Uart};
    tracing::info!("Opening serial port {} @ {} baud (rppal)", port, baud_rate);
    let mut uart = Uart::with_path(port, baud_rate, Parity::None, 8, 1)?;
    uart.set_write_mode(true)?;
    Ok(Box::new(PiSerial { uart }))
}

#[cfg(feature = "hardware")]
pub fn open_register_bus(bus: u8) -> Result<Box<dyn RegisterBus>> {
    tracing::info!("Opening i2c bus {} (rppal)", bus);
    let i2c = rppal::i2c::I2c::with_bus(bus)?;
    Ok(Box::new(PiI2c { i2c }))
}

#[cfg(feature = "hardware")]
impl ByteStream for PiSerial {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            let n = self.uart.write(&data[written..])?;
            if n == 0 {
                anyhow::bail!("serial port accepted no bytes");
            }
            written += n;
        }
        Ok(())
    }
}

#[cfg(feature = "hardware")]
impl RegisterBus for PiI2c {
    fn write_register(&mut self, slave: u8, register: u8, value: u8) -> Result<()> {
        self.i2c.set_slave_address(slave as u16)?;
        self.i2c.smbus_write_byte(register, value)?;
        Ok(())
    }
}
