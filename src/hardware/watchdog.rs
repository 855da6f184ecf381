//! Actuator guard and the watchdog that zeros stale output.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::control::mixer::MotorCommand;
use crate::system::shared_state::{SharedState, Worker};

use super::transport::{ActuatorTransport, TransportError};

struct Guarded {
    transport: Box<dyn ActuatorTransport>,
    last_write: Option<Instant>,
    /// Output was zeroed by the watchdog and nothing was written since.
    tripped: bool,
    disconnected: bool,
}

/// Actuator transport shared by the control loop and the watchdog.
pub struct GuardedActuator {
    inner: Mutex<Guarded>,
}

impl GuardedActuator {
    pub fn new(transport: Box<dyn ActuatorTransport>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Guarded {
                transport,
                last_write: None,
                tripped: false,
                disconnected: false,
            }),
        })
    }

    pub fn write(&self, command: &MotorCommand) -> Result<(), TransportError> {
        let mut g = self.inner.lock();
        let result = g.transport.write(command);
        match &result {
            Ok(()) => {
                g.last_write = Some(Instant::now());
                g.tripped = false;
            }
            Err(TransportError::Disconnected) => g.disconnected = true,
            Err(_) => {}
        }
        result
    }

    pub fn zero(&self) -> Result<(), TransportError> {
        self.write(&MotorCommand::ZERO)
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.lock().disconnected
    }

    /// Zero the motors if the last write is older than `timeout`. Trips at most
    /// once per stale period. Returns true when it zeroed.
    pub fn zero_if_stale(&self, timeout: Duration) -> bool {
        let mut g = self.inner.lock();
        if g.disconnected || g.tripped {
            return false;
        }
        let Some(last) = g.last_write else {
            return false;
        };
        let age = last.elapsed();
        if age <= timeout {
            return false;
        }
        match g.transport.zero() {
            Ok(()) => {
                warn!(age_ms = age.as_millis() as u64, "actuator output stale, zeroed");
                g.tripped = true;
                true
            }
            Err(e) => {
                if matches!(e, TransportError::Disconnected) {
                    g.disconnected = true;
                }
                warn!("watchdog could not zero actuators: {}", e);
                false
            }
        }
    }
}

/// Thread that watches a [`GuardedActuator`] for missed control ticks.
pub struct ActuatorWatchdog {
    handle: Option<JoinHandle<()>>,
    shared: Arc<SharedState>,
}

impl ActuatorWatchdog {
    pub fn spawn(actuator: Arc<GuardedActuator>, timeout: Duration, shared: Arc<SharedState>) -> Self {
        let check_every = (timeout / 2).max(Duration::from_millis(1));
        let thread_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            debug!(timeout_ms = timeout.as_millis() as u64, "actuator watchdog started");
            while !thread_shared.should_stop(Worker::Watchdog) {
                actuator.zero_if_stale(timeout);
                thread::sleep(check_every);
            }
        });
        Self {
            handle: Some(handle),
            shared,
        }
    }

    pub fn shutdown(&mut self) {
        self.shared.request_stop(Worker::Watchdog);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ActuatorWatchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
