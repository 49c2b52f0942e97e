//! modgate: a Modbus gateway.
//!
//! Polls one Modbus device for a fixed list of holding-register tags and
//! exposes the values over HTTP (JSON, Prometheus text) and, optionally, a
//! Telegram bot. Setpoints can be written back through both front-ends.
//!
//! # Configuration
//!
//! ```json5
//! {
//!   device: { url: "rtuovertcp://192.168.1.200:8899", unit_id: 16 },
//!   tags: [
//!     { name: "t_boiler", desc: "Boiler temperature", group: "state", address: 1, operation: "read_float" },
//!     { name: "t_day", desc: "Day setpoint", group: "ust", address: 10, operation: "read_float,write_float" },
//!   ],
//!   http: { listen: "0.0.0.0:9101", prefix: "boiler" },
//!   telegram: { token: "123:abc", owners: { "123456": "admin" } },
//! }
//! ```

pub mod config;
pub mod gateway;

pub use config::{ConfigError, DEFAULT_DEVICE_URL, DeviceConfig, GatewayConfig, TagConfig};
pub use gateway::Gateway;
