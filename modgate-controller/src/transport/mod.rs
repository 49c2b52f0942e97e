//! Transport capability consumed by the controller.
//!
//! The controller never speaks Modbus framing itself; it drives a
//! [`Transport`] that opens/closes the physical link and performs single
//! register reads and writes. [`ModbusTransport`] is the production
//! implementation, [`MockTransport`] a scriptable stand-in for tests.

pub mod mock;
pub mod modbus;

use std::time::Duration;

use thiserror::Error;

pub use mock::{MockTransport, TransportCall};
pub use modbus::{Endpoint, ModbusSettings, ModbusTransport, Parity, SerialSettings};

/// Errors reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Modbus exception: {0}")]
    Exception(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking access to a single remote device.
///
/// All methods are called with the controller's exclusive lock held; an
/// implementation never sees two calls at once.
pub trait Transport: Send + Sync {
    /// Open (or reopen) the connection.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Close the connection. Closing a closed transport is not an error.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Read one holding register.
    fn read_u16(&mut self, address: u16) -> Result<u16, TransportError>;

    /// Read two holding registers starting at `address` as a 32-bit float.
    fn read_f32(&mut self, address: u16) -> Result<f32, TransportError>;

    /// Write one holding register.
    fn write_u16(&mut self, address: u16, value: u16) -> Result<(), TransportError>;

    /// Write a 32-bit float into two holding registers starting at `address`.
    fn write_f32(&mut self, address: u16, value: f32) -> Result<(), TransportError>;
}
