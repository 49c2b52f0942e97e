//! Transport backed by tokio-modbus (TCP, RTU, RTU over TCP).

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio::time::error::Elapsed;
use tokio_modbus::client::{Context, rtu, tcp};
use tokio_modbus::prelude::*;
use tracing::debug;
use url::Url;

use super::{Transport, TransportError};

/// Default Modbus TCP port.
const DEFAULT_PORT: u16 = 502;

/// Where the device lives and which framing to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Modbus TCP (MBAP framing), `tcp://host:port`.
    Tcp(String),
    /// RTU framing through a TCP socket (serial bridges), `rtuovertcp://host:port`.
    RtuOverTcp(String),
    /// RTU over a local serial line, `rtu:///dev/ttyUSB0`.
    Rtu(String),
}

impl Endpoint {
    /// Parse a device URL.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(url)
            .map_err(|e| TransportError::InvalidEndpoint(format!("'{}': {}", url, e)))?;

        match parsed.scheme() {
            scheme @ ("tcp" | "rtuovertcp") => {
                let host = parsed
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| {
                        TransportError::InvalidEndpoint(format!("'{}': missing host", url))
                    })?;
                let addr = format!("{}:{}", host, parsed.port().unwrap_or(DEFAULT_PORT));

                if scheme == "tcp" {
                    Ok(Endpoint::Tcp(addr))
                } else {
                    Ok(Endpoint::RtuOverTcp(addr))
                }
            }
            "rtu" => {
                // rtu:///dev/ttyUSB0 carries the device in the path, rtu://COM3 in the host.
                let path = match parsed.host_str() {
                    Some(host) if !host.is_empty() => format!("{}{}", host, parsed.path()),
                    _ => parsed.path().to_string(),
                };
                if path.is_empty() || path == "/" {
                    return Err(TransportError::InvalidEndpoint(format!(
                        "'{}': missing serial device",
                        url
                    )));
                }
                Ok(Endpoint::Rtu(path))
            }
            other => Err(TransportError::InvalidEndpoint(format!(
                "'{}': unsupported scheme '{}' (use tcp, rtuovertcp or rtu)",
                url, other
            ))),
        }
    }
}

/// Serial line parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line settings, used by `rtu://` endpoints only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 19200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 2,
        }
    }
}

/// Everything needed to reach one device.
#[derive(Debug, Clone)]
pub struct ModbusSettings {
    pub endpoint: Endpoint,
    /// Modbus unit/slave ID.
    pub unit_id: u8,
    /// Bound on connect and on every request.
    pub timeout: Duration,
    pub serial: SerialSettings,
}

/// Blocking Modbus client.
///
/// Drives an async tokio-modbus context on a private current-thread runtime,
/// so callers may sit on a plain OS thread or the tokio blocking pool.
pub struct ModbusTransport {
    settings: ModbusSettings,
    // Taken on drop so the runtime can shut down from any context.
    runtime: Option<Runtime>,
    // Context is Send but not Sync; it is only reached through &mut self.
    ctx: Mutex<Option<Context>>,
}

impl ModbusTransport {
    /// Create a transport. No connection is made until [`Transport::open`].
    pub fn new(settings: ModbusSettings) -> Result<Self, TransportError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;

        Ok(Self {
            settings,
            runtime: Some(runtime),
            ctx: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &ModbusSettings {
        &self.settings
    }
}

impl Transport for ModbusTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let timeout = self.settings.timeout;
        let slave = Slave(self.settings.unit_id);
        let endpoint = &self.settings.endpoint;
        let serial = &self.settings.serial;

        // Drop any previous connection before dialing again.
        self.ctx.get_mut().take();

        let ctx = block_on(&self.runtime, async {
            tokio::time::timeout(timeout, connect(endpoint, slave, serial)).await
        })?
        .map_err(|_| TransportError::Timeout(timeout))??;

        debug!(endpoint = ?endpoint, unit_id = slave.0, "Modbus connection opened");
        *self.ctx.get_mut() = Some(ctx);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut ctx) = self.ctx.get_mut().take() else {
            return Ok(());
        };

        block_on(&self.runtime, async move { ctx.disconnect().await })?
            .map_err(|e| TransportError::Connection(format!("disconnect failed: {}", e)))?;
        debug!("Modbus connection closed");
        Ok(())
    }

    fn read_u16(&mut self, address: u16) -> Result<u16, TransportError> {
        let timeout = self.settings.timeout;
        let ctx = self.ctx.get_mut().as_mut().ok_or(TransportError::NotConnected)?;

        let result = block_on(&self.runtime, async {
            tokio::time::timeout(timeout, ctx.read_holding_registers(address, 1)).await
        })?;
        let words = finish(result, timeout)?;

        words
            .first()
            .copied()
            .ok_or_else(|| TransportError::Protocol("empty register response".to_string()))
    }

    fn read_f32(&mut self, address: u16) -> Result<f32, TransportError> {
        let timeout = self.settings.timeout;
        let ctx = self.ctx.get_mut().as_mut().ok_or(TransportError::NotConnected)?;

        let result = block_on(&self.runtime, async {
            tokio::time::timeout(timeout, ctx.read_holding_registers(address, 2)).await
        })?;
        let words = finish(result, timeout)?;

        match words.as_slice() {
            [high, low, ..] => Ok(f32_from_words(*high, *low)),
            _ => Err(TransportError::Protocol(format!(
                "expected 2 registers, got {}",
                words.len()
            ))),
        }
    }

    fn write_u16(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        let timeout = self.settings.timeout;
        let ctx = self.ctx.get_mut().as_mut().ok_or(TransportError::NotConnected)?;

        let result = block_on(&self.runtime, async {
            tokio::time::timeout(timeout, ctx.write_single_register(address, value)).await
        })?;
        finish(result, timeout)
    }

    fn write_f32(&mut self, address: u16, value: f32) -> Result<(), TransportError> {
        let timeout = self.settings.timeout;
        let ctx = self.ctx.get_mut().as_mut().ok_or(TransportError::NotConnected)?;
        let words = f32_to_words(value);

        let result = block_on(&self.runtime, async {
            tokio::time::timeout(timeout, ctx.write_multiple_registers(address, &words)).await
        })?;
        finish(result, timeout)
    }
}

impl Drop for ModbusTransport {
    fn drop(&mut self) {
        self.ctx.get_mut().take();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn block_on<F: Future>(runtime: &Option<Runtime>, future: F) -> Result<F::Output, TransportError> {
    runtime
        .as_ref()
        .map(|runtime| runtime.block_on(future))
        .ok_or(TransportError::NotConnected)
}

/// Establish a client context for the endpoint.
async fn connect(
    endpoint: &Endpoint,
    slave: Slave,
    serial: &SerialSettings,
) -> Result<Context, TransportError> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let socket = resolve(addr).await?;
            tcp::connect_slave(socket, slave)
                .await
                .map_err(|e| TransportError::Connection(format!("{}: {}", addr, e)))
        }
        Endpoint::RtuOverTcp(addr) => {
            let socket = resolve(addr).await?;
            let stream = TcpStream::connect(socket)
                .await
                .map_err(|e| TransportError::Connection(format!("{}: {}", addr, e)))?;
            Ok(rtu::attach_slave(stream, slave))
        }
        Endpoint::Rtu(path) => {
            let parity = match serial.parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Even => tokio_serial::Parity::Even,
                Parity::Odd => tokio_serial::Parity::Odd,
            };

            let stop_bits = match serial.stop_bits {
                2 => tokio_serial::StopBits::Two,
                _ => tokio_serial::StopBits::One,
            };

            let data_bits = match serial.data_bits {
                5 => tokio_serial::DataBits::Five,
                6 => tokio_serial::DataBits::Six,
                7 => tokio_serial::DataBits::Seven,
                _ => tokio_serial::DataBits::Eight,
            };

            let builder = tokio_serial::new(path.as_str(), serial.baud_rate)
                .parity(parity)
                .stop_bits(stop_bits)
                .data_bits(data_bits);

            let port = tokio_serial::SerialStream::open(&builder)
                .map_err(|e| TransportError::Connection(format!("Serial open failed: {}", e)))?;

            Ok(rtu::attach_slave(port, slave))
        }
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, TransportError> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|e| TransportError::Connection(format!("{}: {}", addr, e)))?
        .next()
        .ok_or_else(|| TransportError::Connection(format!("{}: no address resolved", addr)))
}

/// Flatten timeout, transport and exception layers of a Modbus call.
fn finish<T>(
    result: Result<tokio_modbus::Result<T>, Elapsed>,
    timeout: Duration,
) -> Result<T, TransportError> {
    match result {
        Err(_) => Err(TransportError::Timeout(timeout)),
        Ok(Err(e)) => Err(TransportError::Protocol(e.to_string())),
        Ok(Ok(Err(code))) => Err(TransportError::Exception(format!("{:?}", code))),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

/// Combine two registers, high word first.
pub fn f32_from_words(high: u16, low: u16) -> f32 {
    f32::from_bits((u32::from(high) << 16) | u32::from(low))
}

/// Split a float into two registers, high word first.
pub fn f32_to_words(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}
