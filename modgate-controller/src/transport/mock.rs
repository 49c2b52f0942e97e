//! Scriptable in-memory transport for tests and demos.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Transport, TransportError};

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCall {
    Open,
    Close,
    ReadU16(u16),
    ReadF32(u16),
    WriteU16(u16, u16),
    WriteF32(u16, f32),
}

#[derive(Debug, Default)]
struct MockState {
    registers: HashMap<u16, u16>,
    floats: HashMap<u16, f32>,
    connected: bool,
    fail_open: bool,
    fail_reads: bool,
    fail_next_reads: usize,
    fail_writes: bool,
    calls: Vec<TransportCall>,
    in_flight: usize,
    overlapped: bool,
}

/// In-memory device.
///
/// Clones share state, so a test keeps one clone to script outcomes and
/// inspect the call log while the controller owns the other. Written values
/// are stored and returned by later reads. Reads on a closed transport fail
/// with [`TransportError::NotConnected`].
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    latency: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call for `latency`, making overlapping calls observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_u16(&self, address: u16, value: u16) {
        self.state.lock().registers.insert(address, value);
    }

    pub fn set_f32(&self, address: u16, value: f32) {
        self.state.lock().floats.insert(address, value);
    }

    /// Make every `open()` fail (or succeed again).
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Make every read fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Fail only the next `count` reads.
    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().fail_next_reads = count;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Snapshot of every call made so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: TransportCall) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// True if two calls were ever in flight at the same time.
    pub fn overlapped(&self) -> bool {
        self.state.lock().overlapped
    }

    /// Record the call and mark it in flight.
    fn begin(&self, call: TransportCall) {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.in_flight += 1;
        if state.in_flight > 1 {
            state.overlapped = true;
        }
    }

    /// Simulate wire latency, then finish the call with `f`.
    fn finish<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let mut state = self.state.lock();
        state.in_flight -= 1;
        f(&mut state)
    }

    fn read_outcome(state: &mut MockState) -> Result<(), TransportError> {
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_next_reads > 0 {
            state.fail_next_reads -= 1;
            return Err(TransportError::Timeout(Duration::from_secs(1)));
        }
        if state.fail_reads {
            return Err(TransportError::Timeout(Duration::from_secs(1)));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.begin(TransportCall::Open);
        self.finish(|state| {
            if state.fail_open {
                return Err(TransportError::Connection("connection refused".to_string()));
            }
            state.connected = true;
            Ok(())
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.begin(TransportCall::Close);
        self.finish(|state| {
            state.connected = false;
            Ok(())
        })
    }

    fn read_u16(&mut self, address: u16) -> Result<u16, TransportError> {
        self.begin(TransportCall::ReadU16(address));
        self.finish(|state| {
            Self::read_outcome(state)?;
            Ok(state.registers.get(&address).copied().unwrap_or_default())
        })
    }

    fn read_f32(&mut self, address: u16) -> Result<f32, TransportError> {
        self.begin(TransportCall::ReadF32(address));
        self.finish(|state| {
            Self::read_outcome(state)?;
            Ok(state.floats.get(&address).copied().unwrap_or_default())
        })
    }

    fn write_u16(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        self.begin(TransportCall::WriteU16(address, value));
        self.finish(|state| {
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.fail_writes {
                return Err(TransportError::Exception("IllegalDataAddress".to_string()));
            }
            state.registers.insert(address, value);
            Ok(())
        })
    }

    fn write_f32(&mut self, address: u16, value: f32) -> Result<(), TransportError> {
        self.begin(TransportCall::WriteF32(address, value));
        self.finish(|state| {
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.fail_writes {
                return Err(TransportError::Exception("IllegalDataAddress".to_string()));
            }
            state.floats.insert(address, value);
            Ok(())
        })
    }
}
