//! Modbus controller: tag registry, poll engine and write gateway.
//!
//! A [`Controller`] owns one [`Transport`] connection to a device and a fixed
//! set of [`Tag`]s registered at startup. [`Controller::poll`] runs the read
//! cycle on the calling thread until [`Controller::close`] is called or the
//! reconnect budget runs out. Presentation code reads snapshots with
//! [`Controller::tags`] and writes through [`Controller::write_tag`].
//!
//! # Reconnect budget
//!
//! A failed read closes the connection and aborts the cycle. The next cycle
//! reopens it; each *successful* reopen counts one attempt and each successful
//! read resets the count. A device whose `open()` keeps failing therefore
//! never consumes the budget and is retried until closed.

pub mod controller;
pub mod policy;
pub mod registry;
pub mod tag;
pub mod transport;

pub use controller::{
    Controller, ControllerConfig, ControllerError, CycleOutcome, PollEngine, PollExit, PollState,
    TagSnapshot,
};
pub use policy::{ChangeDetection, UpdatePolicy};
pub use registry::{RegistryError, TagRegistry};
pub use tag::{
    Operation, Tag, TagError, TagValue, ValueError, ValueKind, value_to_string, writable,
};
pub use transport::{
    Endpoint, MockTransport, ModbusSettings, ModbusTransport, Parity, SerialSettings, Transport,
    TransportCall, TransportError,
};
