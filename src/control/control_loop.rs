//! Fixed-period control loop.
//!
//! The loop is the only writer of the mission state and the only producer of
//! motor commands. Each tick it reads every input once into a
//! [`TickSnapshot`], steps the flight state machine, publishes what happened,
//! and writes one command (or zero) to the actuators.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, trace, warn};

use crate::hardware::{GuardedActuator, TransportError};
use crate::link::TargetLink;
use crate::mission::{FlightStateMachine, LocationSource, LockRequest, MissionState, OperatorEvent, StepOutcome};
use crate::system::messages::{MissionEvent, emit};
use crate::system::shared_state::{SharedState, Worker};
use crate::velocity::VelocityProvider;
use crate::vision::PatternFix;

use super::mixer::{MotorMixer, OrientationSource};
use super::snapshot::TickSnapshot;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlParams {
    pub period_ms: u64,
    /// Missed periods tolerated before the watchdog zeros the motors.
    pub watchdog_periods: u32,
}

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            period_ms: 14,
            watchdog_periods: 2,
        }
    }
}

impl ControlParams {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        self.period() * self.watchdog_periods.max(1)
    }
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlExit {
    Stopped,
    TransportLost,
}

/// Input sources read by the loop.
pub struct ControlInputs {
    pub orientation: Arc<dyn OrientationSource>,
    pub velocity: Arc<dyn VelocityProvider>,
    pub location: Arc<dyn LocationSource>,
    pub operator: Receiver<OperatorEvent>,
    pub patterns: Receiver<PatternFix>,
}

pub struct ControlLoop {
    params: ControlParams,
    machine: FlightStateMachine,
    mixer: MotorMixer,
    actuator: Arc<GuardedActuator>,
    inputs: ControlInputs,
    shared: Arc<SharedState>,
    events: Sender<MissionEvent>,
    lock_requests: Sender<LockRequest>,
    link: Option<Arc<Mutex<TargetLink>>>,
    /// Final zero already sent after landing.
    output_withheld: bool,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: ControlParams,
        machine: FlightStateMachine,
        mixer: MotorMixer,
        actuator: Arc<GuardedActuator>,
        inputs: ControlInputs,
        shared: Arc<SharedState>,
        events: Sender<MissionEvent>,
        lock_requests: Sender<LockRequest>,
    ) -> Self {
        Self {
            params,
            machine,
            mixer,
            actuator,
            inputs,
            shared,
            events,
            lock_requests,
            link: None,
            output_withheld: false,
        }
    }

    /// Target link to arm when the mission enters IDLE.
    pub fn with_link(mut self, link: Arc<Mutex<TargetLink>>) -> Self {
        self.link = Some(link);
        self
    }

    pub fn spawn(self) -> JoinHandle<ControlExit> {
        thread::spawn(move || self.run())
    }

    /// Run until stopped or the transport disconnects.
    pub fn run(mut self) -> ControlExit {
        let period = self.params.period();
        info!(period_ms = self.params.period_ms, "control loop started");

        let mut tick = 0u64;
        let mut deadline = Instant::now();
        let exit = loop {
            if self.shared.should_stop(Worker::Control) {
                break ControlExit::Stopped;
            }

            if let Some(exit) = self.tick(tick) {
                break exit;
            }
            tick += 1;

            deadline += period;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                trace!(tick, overrun_us = (now - deadline).as_micros() as u64, "control tick overran");
                deadline = now;
            }
        };

        info!(?exit, ticks = tick, state = %self.machine.state(), "control loop stopped");
        exit
    }

    /// One control period. Returns `Some` when the loop must exit.
    pub fn tick(&mut self, tick: u64) -> Option<ControlExit> {
        let snap = self.snapshot(tick);
        let outcome = self.machine.step(&snap);
        self.publish(&outcome, tick);

        match self.actuate(&outcome, &snap) {
            Ok(()) => None,
            Err(TransportError::Disconnected) => {
                self.on_transport_lost(tick);
                Some(ControlExit::TransportLost)
            }
            Err(e) => {
                warn!(tick, "actuator write failed: {}", e);
                None
            }
        }
    }

    pub fn state(&self) -> MissionState {
        self.machine.state()
    }

    fn snapshot(&self, tick: u64) -> TickSnapshot {
        TickSnapshot {
            tick,
            orientation: self.inputs.orientation.rotation(),
            velocity: self.inputs.velocity.velocity(),
            location: self.inputs.location.last_fix(),
            target: self.shared.target.take(),
            pattern: self.inputs.patterns.try_iter().last(),
            ranging: self.shared.ranging.get(),
            events: self.inputs.operator.try_iter().collect(),
        }
    }

    fn publish(&mut self, outcome: &StepOutcome, tick: u64) {
        if let Some(t) = outcome.transition {
            *self.shared.mission_state.write() = t.to;
            emit(
                &self.events,
                MissionEvent::StateChanged {
                    from: t.from,
                    to: t.to,
                    tick,
                },
            );
        }
        if let Some(baseline) = outcome.calibrated {
            emit(&self.events, MissionEvent::CalibrationCaptured(baseline));
        }
        if let Some(pair) = outcome.target_acquired {
            emit(&self.events, MissionEvent::TargetAcquired(pair));
        }
        if let Some(fix) = outcome.pattern_sighted {
            emit(
                &self.events,
                MissionEvent::PatternSighted {
                    fix,
                    location: self.machine.position(),
                },
            );
        }
        if let Some(request) = outcome.lock_request {
            debug!(tick, state = %request.state, "visual lock requested");
            emit(&self.events, MissionEvent::LockRequested(request));
            match self.lock_requests.try_send(request) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("pattern worker busy, lock request skipped"),
                Err(TrySendError::Disconnected(_)) => trace!("no pattern worker"),
            }
        }
        if outcome.arm_link {
            self.arm_link();
        }
        if outcome.state != MissionState::Landed {
            self.output_withheld = false;
        }
    }

    fn arm_link(&self) {
        let Some(link) = &self.link else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        link.lock().arm(move |pair| shared.target.publish(pair));
    }

    fn actuate(&mut self, outcome: &StepOutcome, snap: &TickSnapshot) -> Result<(), TransportError> {
        if outcome.state == MissionState::Landed {
            if !self.output_withheld {
                self.actuator.zero()?;
                self.output_withheld = true;
            }
            return Ok(());
        }
        if !outcome.armed() {
            return self.actuator.zero();
        }

        let baseline = self.machine.baseline().unwrap_or_default();
        let throttle = self.mixer.params().throttle(outcome.state, snap.velocity.z);
        let command = self.mixer.command(&snap.orientation, &baseline, throttle);
        trace!(?command, "motor command");
        self.actuator.write(&command)
    }

    fn on_transport_lost(&mut self, tick: u64) {
        warn!(tick, "actuator transport disconnected, forcing LANDED");
        if let Some(t) = self.machine.force_landed() {
            *self.shared.mission_state.write() = t.to;
            emit(
                &self.events,
                MissionEvent::StateChanged {
                    from: t.from,
                    to: t.to,
                    tick,
                },
            );
        }
        emit(
            &self.events,
            MissionEvent::TransportLost(TransportError::Disconnected.to_string()),
        );
    }
}
