//! Mission system: wires the workers together and owns their lifetimes.
//!
//! `MissionSystem::start` spawns, in order, the actuator watchdog, the ranging
//! poller, visual odometry, the pattern worker and the control loop. The
//! target link is created idle and armed by the control loop on entering
//! IDLE. Shutdown stops the control loop first so that nothing writes to the
//! actuators while the other workers wind down.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::control::{ControlExit, ControlInputs, ControlLoop, MotorMixer, OrientationSource};
use crate::hardware::{ActuatorTransport, ActuatorWatchdog, GuardedActuator, RangingInput, RangingPoller};
use crate::io::MissionConfig;
use crate::link::{FrameReceiver, TargetLink};
use crate::mission::{FlightStateMachine, LocationSource, MissionState, OperatorEvent};
use crate::velocity::{CameraFeed, VelocityEstimator, VisualOdometry};
use crate::vision::{ColorBlobMatcher, ColorFrameSource, PatternMatcher};

use super::messages::MissionEvent;
use super::pattern_worker::PatternWorker;
use super::shared_state::{SharedState, Worker};

/// Capacity of the observer event channel. Events beyond it are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 256;
const LOCK_REQUEST_CAPACITY: usize = 2;
const PATTERN_FIX_CAPACITY: usize = 8;

/// Device handles the mission runs against.
pub struct MissionHardware {
    pub actuator: Box<dyn ActuatorTransport>,
    pub ranging: Box<dyn RangingInput>,
    pub modem: Arc<dyn FrameReceiver>,
    pub pattern_camera: Box<dyn ColorFrameSource>,
    pub orientation: Arc<dyn OrientationSource>,
    pub location: Arc<dyn LocationSource>,
}

pub struct MissionSystem {
    shared: Arc<SharedState>,
    operator: Sender<OperatorEvent>,
    events: Receiver<MissionEvent>,
    feed: CameraFeed,
    location: Arc<dyn LocationSource>,
    actuator: Arc<GuardedActuator>,

    control: Option<JoinHandle<ControlExit>>,
    odometry: VisualOdometry,
    ranging: RangingPoller,
    pattern: PatternWorker,
    link: Arc<Mutex<TargetLink>>,
    watchdog: ActuatorWatchdog,

    exit: Option<ControlExit>,
}

impl MissionSystem {
    /// Start every worker with the default colour-blob matcher.
    pub fn start(config: &MissionConfig, hardware: MissionHardware) -> Result<Self> {
        let matcher = ColorBlobMatcher::new(config.pattern.range, config.pattern.min_area);
        Self::start_with_matcher(config, hardware, Box::new(matcher))
    }

    pub fn start_with_matcher(
        config: &MissionConfig,
        hardware: MissionHardware,
        matcher: Box<dyn PatternMatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let shared = SharedState::new();

        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        let (operator_tx, operator_rx) = unbounded();
        let (lock_tx, lock_rx) = bounded(LOCK_REQUEST_CAPACITY);
        let (fix_tx, fix_rx) = bounded(PATTERN_FIX_CAPACITY);

        let actuator = GuardedActuator::new(hardware.actuator);
        let watchdog = ActuatorWatchdog::spawn(
            Arc::clone(&actuator),
            config.control.watchdog_timeout(),
            Arc::clone(&shared),
        );
        let ranging = RangingPoller::spawn(hardware.ranging, config.ranging.clone(), Arc::clone(&shared));

        let estimator = VelocityEstimator::new(config.estimator, &config.optical_flow, &config.pose_delta);
        let (odometry, feed) = VisualOdometry::spawn(estimator, Arc::clone(&shared), config.camera_queue);

        let pattern = PatternWorker::spawn(
            hardware.pattern_camera,
            matcher,
            lock_rx,
            fix_tx,
            Arc::clone(&shared),
        );

        let link = Arc::new(Mutex::new(TargetLink::new(
            hardware.modem,
            config.link.clone(),
            events_tx.clone(),
        )));

        hardware.location.resume();
        let inputs = ControlInputs {
            orientation: hardware.orientation,
            velocity: Arc::new(shared.velocity.clone()),
            location: Arc::clone(&hardware.location),
            operator: operator_rx,
            patterns: fix_rx,
        };
        let control = ControlLoop::new(
            config.control.clone(),
            FlightStateMachine::new(config.seek.clone()),
            MotorMixer::new(config.mixer.clone()),
            Arc::clone(&actuator),
            inputs,
            Arc::clone(&shared),
            events_tx,
            lock_tx,
        )
        .with_link(Arc::clone(&link))
        .spawn();

        info!(estimator = %config.estimator, period_ms = config.control.period_ms, "mission system started");
        Ok(Self {
            shared,
            operator: operator_tx,
            events: events_rx,
            feed,
            location: hardware.location,
            actuator,
            control: Some(control),
            odometry,
            ranging,
            pattern,
            link,
            watchdog,
            exit: None,
        })
    }

    /// Forward an operator confirmation to the control loop.
    pub fn send_event(&self, event: OperatorEvent) -> Result<()> {
        if !self.is_running() {
            bail!("control loop is not running, {:?} not delivered", event);
        }
        if self.operator.send(event).is_err() {
            bail!("control loop hung up, {:?} not delivered", event);
        }
        Ok(())
    }

    /// Handle for pushing camera samples to visual odometry.
    pub fn camera_feed(&self) -> CameraFeed {
        self.feed.clone()
    }

    pub fn events(&self) -> &Receiver<MissionEvent> {
        &self.events
    }

    pub fn state(&self) -> MissionState {
        self.shared.mission_state()
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// False once the control loop has exited, on request or on its own.
    pub fn is_running(&self) -> bool {
        self.control.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop every worker and return why the control loop exited.
    pub fn shutdown(&mut self) -> Option<ControlExit> {
        if let Some(handle) = self.control.take() {
            self.shared.request_stop(Worker::Control);
            match handle.join() {
                Ok(exit) => self.exit = Some(exit),
                Err(_) => warn!("control loop panicked"),
            }
            if !self.actuator.is_disconnected() {
                if let Err(e) = self.actuator.zero() {
                    warn!("final actuator zero failed: {}", e);
                }
            }

            self.odometry.shutdown();
            self.ranging.shutdown();
            self.pattern.shutdown();
            self.link.lock().cancel();
            self.watchdog.shutdown();
            self.shared.request_shutdown();
            self.location.pause();

            info!(exit = ?self.exit, state = %self.state(), dropped_samples = self.feed.dropped(), "mission system stopped");
        }
        self.exit
    }
}

impl Drop for MissionSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::SharedLocation;
    use crate::sim::{PatternScene, RecordingActuator, ScriptedReceiver, SimulatedRanging, StaticOrientation};
    use std::thread;
    use std::time::Duration;

    fn hardware(recorder: &RecordingActuator, location: Arc<SharedLocation>) -> MissionHardware {
        MissionHardware {
            actuator: Box::new(recorder.clone()),
            ranging: Box::new(SimulatedRanging::new(80.0)),
            modem: Arc::new(ScriptedReceiver::new(Vec::new())),
            pattern_camera: Box::new(PatternScene::new(320, 240).source()),
            orientation: Arc::new(StaticOrientation::level()),
            location,
        }
    }

    #[test]
    fn test_start_and_shutdown() {
        let recorder = RecordingActuator::new();
        let location = Arc::new(SharedLocation::new());
        let mut system = MissionSystem::start(&MissionConfig::default(), hardware(&recorder, Arc::clone(&location)))
            .unwrap();
        assert!(location.is_active());
        assert!(system.is_running());
        thread::sleep(Duration::from_millis(40));
        assert_eq!(system.state(), MissionState::Calibrate);

        assert_eq!(system.shutdown(), Some(ControlExit::Stopped));
        assert!(!system.is_running());
        assert!(!location.is_active());
        assert_eq!(recorder.last(), Some(crate::control::MotorCommand::ZERO));
        assert!(system.send_event(OperatorEvent::ConfirmCalibration).is_err());
        // Idempotent.
        assert_eq!(system.shutdown(), Some(ControlExit::Stopped));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = MissionConfig::default();
        config.control.period_ms = 0;
        let recorder = RecordingActuator::new();
        let result = MissionSystem::start(&config, hardware(&recorder, Arc::new(SharedLocation::new())));
        assert!(result.is_err());
    }

    #[test]
    fn test_disconnect_ends_mission() {
        let recorder = RecordingActuator::new();
        let mut system =
            MissionSystem::start(&MissionConfig::default(), hardware(&recorder, Arc::new(SharedLocation::new())))
                .unwrap();
        recorder.disconnect();
        let lost = (0..40)
            .filter_map(|_| system.events().recv_timeout(Duration::from_millis(50)).ok())
            .any(|e| matches!(e, MissionEvent::TransportLost(_)));
        assert!(lost);
        assert_eq!(system.shutdown(), Some(ControlExit::TransportLost));
        assert_eq!(system.state(), MissionState::Landed);
    }
}
