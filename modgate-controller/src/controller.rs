//! Poll engine, write gateway and tag lookup over a single transport.
//!
//! The [`Controller`] owns exactly one [`Transport`] and the last known value
//! of every tag. Both sit behind one reader/writer lock:
//!
//! - the poll engine takes the write side for each tag's read transaction
//!   (read, counters, value update), releasing it between tags;
//! - the write gateway takes the write side for one register write;
//! - presentation code takes the read side to render values.
//!
//! A write can therefore be serviced between two tag reads, but never in the
//! middle of one.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::registry::{RegistryError, TagRegistry};
use crate::tag::{Tag, TagValue, ValueKind};
use crate::transport::{Transport, TransportError};

/// Controller errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Failed to open transport: {0}")]
    Transport(#[from] TransportError),
    #[error("A poll engine is already running on this controller")]
    EngineRunning,
}

/// Timing and retry budget of the poll engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Pause after each full cycle over the tags.
    pub polling: Duration,
    /// Pause before each tag read.
    pub read_period: Duration,
    /// Pause after a failed read, letting a broken exchange expire on the wire.
    pub error_settle: Duration,
    /// Consecutive reconnects without a successful read before giving up.
    pub max_attempts: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            polling: Duration::from_secs(1),
            read_period: Duration::from_millis(20),
            error_settle: Duration::from_millis(500),
            max_attempts: 20,
        }
    }
}

/// Poll engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Running,
    AwaitingReconnect,
    Stopped,
}

impl PollState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollState::Running => "running",
            PollState::AwaitingReconnect => "awaiting_reconnect",
            PollState::Stopped => "stopped",
        }
    }
}

/// Why the poll engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// [`Controller::close`] was called.
    Shutdown,
    /// The reconnect budget ran out.
    AttemptsExhausted { attempts: u32 },
    /// Another engine already drives this controller; nothing was polled.
    AlreadyRunning,
}

/// Result of one pass over the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every readable tag was read.
    Completed { reads: usize },
    /// A read failed; the connection was closed and the rest of the cycle skipped.
    Aborted { position: usize },
    /// Reopening the connection failed; no tag was touched.
    ReconnectFailed,
}

/// State guarded by the controller lock.
struct Link {
    transport: Box<dyn Transport>,
    values: Vec<Option<TagValue>>,
}

/// A tag paired with its last known value.
#[derive(Debug, Clone, Copy)]
pub struct TagSnapshot<'a> {
    pub tag: &'a Tag,
    pub value: Option<TagValue>,
}

impl TagSnapshot<'_> {
    /// Gauge reading; unread tags report zero.
    pub fn gauge(&self) -> f64 {
        self.value.map_or(0.0, TagValue::as_f64)
    }

    pub fn value_string(&self) -> String {
        crate::tag::value_to_string(self.value)
    }
}

/// Owner of the device connection and the tag registry.
pub struct Controller {
    config: ControllerConfig,
    registry: TagRegistry,
    link: RwLock<Link>,
    requests: AtomicU64,
    errors: AtomicU64,
    fail_attempts: AtomicU32,
    state: Mutex<PollState>,
    engine_claimed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Controller {
    /// Create a controller and open the transport.
    pub fn new<T>(config: ControllerConfig, mut transport: T) -> Result<Self, ControllerError>
    where
        T: Transport + 'static,
    {
        transport.open()?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            registry: TagRegistry::new(),
            link: RwLock::new(Link {
                transport: Box::new(transport),
                values: Vec::new(),
            }),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            fail_attempts: AtomicU32::new(0),
            state: Mutex::new(PollState::Running),
            engine_claimed: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Register a tag. Only possible before the controller is shared.
    pub fn add_tag(&mut self, tag: Tag) -> Result<(), ControllerError> {
        self.registry.push(tag)?;
        self.link.get_mut().values.push(None);
        Ok(())
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    /// Snapshot of every tag with its last known value, in registry order.
    pub fn tags(&self) -> Vec<TagSnapshot<'_>> {
        let link = self.link.read();
        self.registry
            .iter()
            .zip(link.values.iter())
            .map(|(tag, value)| TagSnapshot { tag, value: *value })
            .collect()
    }

    /// Find a tag by name.
    pub fn find_tag(&self, name: &str) -> Option<&Tag> {
        self.registry.find(name)
    }

    /// Last known value of a tag.
    pub fn value(&self, name: &str) -> Option<TagValue> {
        let position = self.registry.position(name)?;
        self.link.read().values.get(position).copied().flatten()
    }

    /// Write one value to a tag's register.
    ///
    /// Callers check [`Tag::is_writable`] and [`Tag::check_value`] first; the
    /// gateway does neither. The register kind is [`Tag::writes_unsigned`].
    /// Fractional values written to unsigned registers are truncated. The tag's last value is left alone; the next poll observes
    /// the new value. Errors are returned as-is and never retried.
    pub fn write_tag(&self, tag: &Tag, value: f64) -> Result<(), TransportError> {
        info!(tag = %tag.name(), value, "Request to write tag");

        let result = {
            let mut link = self.link.write();
            if tag.writes_unsigned() {
                link.transport.write_u16(tag.address(), value as u16)
            } else {
                link.transport.write_f32(tag.address(), value as f32)
            }
        };

        if let Err(e) = &result {
            warn!(tag = %tag.name(), error = %e, "Write tag error");
        }

        result
    }

    /// Total read requests issued by the poll engine.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Total failed read requests.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Current reconnect attempt count.
    pub fn fail_attempts(&self) -> u32 {
        self.fail_attempts.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> PollState {
        *self.state.lock()
    }

    /// Request the poll engine to stop at the next cycle boundary.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver flipped to `true` once the controller is closing.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Run the poll engine on the current thread until it stops.
    ///
    /// Closes the transport before returning. Returns
    /// [`PollExit::AlreadyRunning`] without touching the transport when
    /// another engine is alive.
    pub fn poll(&self) -> PollExit {
        match self.engine() {
            Ok(engine) => engine.run(),
            Err(e) => {
                error!(error = %e, "Cannot start polling");
                PollExit::AlreadyRunning
            }
        }
    }

    /// The poll engine, for driving cycles by hand.
    ///
    /// At most one engine exists per controller; the claim is released when
    /// the engine is dropped.
    pub fn engine(&self) -> Result<PollEngine<'_>, ControllerError> {
        self.engine_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ControllerError::EngineRunning)?;
        Ok(PollEngine::new(self))
    }

    fn set_state(&self, state: PollState) {
        *self.state.lock() = state;
    }
}

/// The polling state machine.
pub struct PollEngine<'a> {
    controller: &'a Controller,
    fail_attempts: u32,
    need_reconnect: bool,
}

impl<'a> PollEngine<'a> {
    fn new(controller: &'a Controller) -> Self {
        Self {
            controller,
            fail_attempts: 0,
            need_reconnect: false,
        }
    }

    pub fn fail_attempts(&self) -> u32 {
        self.fail_attempts
    }

    pub fn needs_reconnect(&self) -> bool {
        self.need_reconnect
    }

    /// The reason to stop, if any, checked at every cycle boundary.
    pub fn stop_reason(&self) -> Option<PollExit> {
        if self.controller.is_closed() {
            Some(PollExit::Shutdown)
        } else if self.fail_attempts >= self.controller.config.max_attempts {
            Some(PollExit::AttemptsExhausted {
                attempts: self.fail_attempts,
            })
        } else {
            None
        }
    }

    /// Reconnect if needed, then read every readable tag in order.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let controller = self.controller;

        if self.need_reconnect {
            info!("Restarting connection...");
            let opened = controller.link.write().transport.open();
            if let Err(e) = opened {
                warn!(error = %e, "Cannot open connection");
                return CycleOutcome::ReconnectFailed;
            }
            self.need_reconnect = false;
            self.set_fail_attempts(self.fail_attempts + 1);
            controller.set_state(PollState::Running);
        }

        let mut reads = 0;
        for (position, tag) in controller.registry.iter().enumerate() {
            if !tag.operation().is_readable() {
                continue;
            }

            thread::sleep(controller.config.read_period);

            let mut link = controller.link.write();
            let result = match tag.kind() {
                ValueKind::Unsigned => link
                    .transport
                    .read_u16(tag.address())
                    .map(TagValue::Unsigned),
                ValueKind::Float => link.transport.read_f32(tag.address()).map(TagValue::Float),
            };
            let request = controller.requests.fetch_add(1, Ordering::Relaxed) + 1;

            match result {
                Ok(value) => {
                    tag.policy()
                        .apply(tag, &mut link.values[position], value, request);
                    self.set_fail_attempts(0);
                    reads += 1;
                }
                Err(e) => {
                    controller.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(request, tag = %tag.name(), error = %e, "Error reading tag");

                    self.need_reconnect = true;
                    controller.set_state(PollState::AwaitingReconnect);
                    if let Err(e) = link.transport.close() {
                        warn!(error = %e, "Error closing connection");
                    }
                    drop(link);

                    thread::sleep(controller.config.error_settle);
                    return CycleOutcome::Aborted { position };
                }
            }
        }

        CycleOutcome::Completed { reads }
    }

    /// Cycle until closed or out of reconnect budget, then close the transport.
    pub fn run(mut self) -> PollExit {
        let controller = self.controller;
        info!(
            tags = controller.registry.len(),
            max_attempts = controller.config.max_attempts,
            "Start polling..."
        );

        let exit = loop {
            if let Some(exit) = self.stop_reason() {
                break exit;
            }

            self.run_cycle();
            thread::sleep(controller.config.polling);
        };

        match exit {
            PollExit::Shutdown | PollExit::AlreadyRunning => info!("End polling"),
            PollExit::AttemptsExhausted { attempts } => {
                error!(attempts, "End polling, reconnect attempts exhausted")
            }
        }

        controller.set_state(PollState::Stopped);
        if let Err(e) = controller.link.write().transport.close() {
            error!(error = %e, "Controller close error");
        }
        controller.shutdown.send_replace(true);

        exit
    }

    fn set_fail_attempts(&mut self, attempts: u32) {
        self.fail_attempts = attempts;
        self.controller
            .fail_attempts
            .store(attempts, Ordering::Relaxed);
    }
}

impl Drop for PollEngine<'_> {
    fn drop(&mut self) {
        self.controller
            .engine_claimed
            .store(false, Ordering::Release);
    }
}
