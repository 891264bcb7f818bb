//! Modbus TCP link to the PLC that drives the lights and display boards.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_modbus::client::{tcp, Context, Writer};
use tokio_modbus::Slave;

use crate::hal::{BusError, FieldBusLink};

pub struct ModbusLink {
    url: String,
    unit: Slave,
    timeout: Duration,
    ctx: Option<Context>,
}

impl ModbusLink {
    pub fn new(url: &str, unit_id: u8, timeout: Duration) -> Result<Self, BusError> {
        parse_tcp_url(url)?;
        Ok(Self {
            url: url.to_string(),
            unit: Slave(unit_id),
            timeout,
            ctx: None,
        })
    }

    fn ctx(&mut self) -> Result<&mut Context, BusError> {
        self.ctx
            .as_mut()
            .ok_or_else(|| BusError::Write("not connected".to_string()))
    }
}

#[async_trait]
impl FieldBusLink for ModbusLink {
    async fn open(&mut self) -> Result<(), BusError> {
        let host_port = parse_tcp_url(&self.url)?;
        let addr: SocketAddr = tokio::net::lookup_host(host_port)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?
            .next()
            .ok_or_else(|| BusError::Connect(format!("{} did not resolve", host_port)))?;

        let ctx = tokio::time::timeout(self.timeout, tcp::connect_slave(addr, self.unit))
            .await
            .map_err(|_| BusError::Connect(format!("timed out dialing {}", addr)))?
            .map_err(|e| BusError::Connect(e.to_string()))?;

        self.ctx = Some(ctx);
        Ok(())
    }

    async fn close(&mut self) {
        // dropping the context closes the socket
        self.ctx = None;
    }

    async fn write_coils(&mut self, address: u16, values: &[bool]) -> Result<(), BusError> {
        let timeout = self.timeout;
        let ctx = self.ctx()?;
        match tokio::time::timeout(timeout, ctx.write_multiple_coils(address, values)).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exception))) => Err(BusError::Write(format!("exception {:?}", exception))),
            Ok(Err(e)) => Err(BusError::Write(e.to_string())),
            Err(_) => Err(BusError::Write("timed out".to_string())),
        }
    }

    async fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), BusError> {
        let timeout = self.timeout;
        let registers = pack_registers(data);
        let ctx = self.ctx()?;
        match tokio::time::timeout(timeout, ctx.write_multiple_registers(address, &registers)).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exception))) => Err(BusError::Write(format!("exception {:?}", exception))),
            Ok(Err(e)) => Err(BusError::Write(e.to_string())),
            Err(_) => Err(BusError::Write("timed out".to_string())),
        }
    }
}

/// "tcp://host:port" -> "host:port"
fn parse_tcp_url(url: &str) -> Result<&str, BusError> {
    let rest = url
        .strip_prefix("tcp://")
        .ok_or_else(|| BusError::BadUrl(url.to_string()))?;
    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(rest),
        _ => Err(BusError::BadUrl(url.to_string())),
    }
}

/// Delta PLC word order: each register holds two bytes little-endian, odd
/// tails are zero padded.
pub fn pack_registers(data: &[u8]) -> Vec<u16> {
    data.chunks(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect()
}
