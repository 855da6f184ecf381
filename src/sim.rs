//! Simulated collaborators.
//!
//! Stand-ins for the sensors, actuator board and modem, used by the demo
//! binary and by tests. Each handle is cheap to clone where a test needs to
//! keep observing it after handing it to a worker.

use std::collections::VecDeque;
use std::f64::consts::FRAC_PI_2;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nalgebra::Vector3;
use parking_lot::{Mutex, RwLock};

use crate::control::{MotorCommand, Orientation, OrientationSource};
use crate::hardware::{ActuatorTransport, RangingInput, TransportError};
use crate::link::{FrameReceiver, FrameStats, LinkError};
use crate::velocity::{CameraSample, EstimatorKind};
use crate::vision::{ColorFrame, ColorFrameSource, GrayFrame};

/// Orientation that only changes when told to.
#[derive(Debug)]
pub struct StaticOrientation {
    current: RwLock<Orientation>,
}

impl StaticOrientation {
    pub fn new(orientation: Orientation) -> Self {
        Self {
            current: RwLock::new(orientation),
        }
    }

    pub fn level() -> Self {
        Self::new(Orientation::identity())
    }

    pub fn set(&self, orientation: Orientation) {
        *self.current.write() = orientation;
    }
}

impl OrientationSource for StaticOrientation {
    fn rotation(&self) -> Orientation {
        *self.current.read()
    }
}

#[derive(Debug, Default)]
struct Recording {
    commands: Vec<MotorCommand>,
    disconnected: bool,
}

/// Actuator transport that records every command it accepts.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<MotorCommand> {
        self.inner.lock().commands.last().copied()
    }

    pub fn commands(&self) -> Vec<MotorCommand> {
        self.inner.lock().commands.clone()
    }

    /// Every later write fails with `Disconnected`.
    pub fn disconnect(&self) {
        self.inner.lock().disconnected = true;
    }
}

impl ActuatorTransport for RecordingActuator {
    fn write(&mut self, command: &MotorCommand) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.disconnected {
            return Err(TransportError::Disconnected);
        }
        inner.commands.push(*command);
        Ok(())
    }
}

/// Modem that replays a fixed list of frames, one per receive call.
#[derive(Debug, Default)]
pub struct ScriptedReceiver {
    frames: Mutex<VecDeque<Vec<u8>>>,
}

impl ScriptedReceiver {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
        }
    }

    pub fn push_frame(&self, frame: Vec<u8>) {
        self.frames.lock().push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.lock().len()
    }
}

impl FrameReceiver for ScriptedReceiver {
    fn receive(&self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let Some(frame) = self.frames.lock().pop_front() else {
            return Ok(0);
        };
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }

    fn stats(&self) -> Result<FrameStats, LinkError> {
        Ok(FrameStats {
            rssi: -42.0,
            evm: 0.1,
            valid: true,
        })
    }
}

/// Range sensor at a fixed distance.
#[derive(Debug, Clone)]
pub struct SimulatedRanging {
    distance_cm: f64,
    triggers: Vec<bool>,
    /// Echoes left before every read fails.
    healthy_echoes: Option<usize>,
}

impl SimulatedRanging {
    pub fn new(distance_cm: f64) -> Self {
        Self {
            distance_cm,
            triggers: Vec::new(),
            healthy_echoes: None,
        }
    }

    pub fn failing_after(mut self, echoes: usize) -> Self {
        self.healthy_echoes = Some(echoes);
        self
    }

    pub fn trigger_log(&self) -> Vec<bool> {
        self.triggers.clone()
    }
}

impl RangingInput for SimulatedRanging {
    fn trigger(&mut self, high: bool) -> Result<(), TransportError> {
        self.triggers.push(high);
        Ok(())
    }

    fn echo_pulse(&mut self) -> Result<Duration, TransportError> {
        if let Some(left) = self.healthy_echoes.as_mut() {
            if *left == 0 {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no echo").into());
            }
            *left -= 1;
        }
        Ok(Duration::from_secs_f64(self.distance_cm * 58.0 * 1e-6))
    }
}

const PATTERN_SIDE: usize = 16;
const PATTERN_COLOR: [u8; 3] = [0, 0, 255];
const BACKGROUND: [u8; 3] = [96, 96, 96];

/// Downward scene with an optional blue landing pattern.
#[derive(Debug, Clone)]
pub struct PatternScene {
    width: usize,
    height: usize,
    centre: Arc<RwLock<Option<(f64, f64)>>>,
}

impl PatternScene {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            centre: Arc::new(RwLock::new(None)),
        }
    }

    /// Move the pattern centre, in pixels, or hide it with `None`.
    pub fn place_pattern(&self, centre: Option<(f64, f64)>) {
        *self.centre.write() = centre;
    }

    pub fn source(&self) -> PatternCamera {
        PatternCamera {
            scene: self.clone(),
            frames: 0,
        }
    }

    fn render(&self, timestamp_ns: u64) -> Result<ColorFrame> {
        let mut frame = ColorFrame::new(
            self.width,
            self.height,
            BACKGROUND.repeat(self.width * self.height),
            timestamp_ns,
        )?;
        if let Some((cx, cy)) = *self.centre.read() {
            let half = PATTERN_SIDE as f64 / 2.0;
            let x0 = (cx - half).round().max(0.0) as usize;
            let y0 = (cy - half).round().max(0.0) as usize;
            frame.fill_rect(x0, y0, PATTERN_SIDE, PATTERN_SIDE, PATTERN_COLOR);
        }
        Ok(frame)
    }
}

/// Colour camera looking at a [`PatternScene`].
#[derive(Debug)]
pub struct PatternCamera {
    scene: PatternScene,
    frames: u64,
}

impl ColorFrameSource for PatternCamera {
    fn capture(&mut self) -> Result<ColorFrame> {
        self.frames += 1;
        self.scene.render(self.frames * 33_000_000)
    }
}

/// Smooth ground texture sampled at sub-pixel offsets.
fn ground(x: f64, y: f64) -> u8 {
    let v = 128.0 + 50.0 * (x / 5.0).sin() * (y / 6.0).cos() + 40.0 * ((x + 2.0 * y) / 9.0).sin();
    v.clamp(0.0, 255.0) as u8
}

/// Down-looking camera over flat ground moving at a constant speed.
///
/// Produces grey frames for the optical-flow estimator or camera poses for
/// the pose-delta estimator.
#[derive(Debug, Clone)]
pub struct GroundCamera {
    kind: EstimatorKind,
    width: usize,
    height: usize,
    /// Ground speed in metres per second.
    speed: (f64, f64),
    metres_per_pixel: f64,
}

impl GroundCamera {
    pub fn new(kind: EstimatorKind, width: usize, height: usize, metres_per_pixel: f64) -> Self {
        Self {
            kind,
            width,
            height,
            speed: (0.0, 0.0),
            metres_per_pixel,
        }
    }

    pub fn with_speed(mut self, vx: f64, vy: f64) -> Self {
        self.speed = (vx, vy);
        self
    }

    /// Sample at `timestamp_ns` since the start of the flight.
    pub fn sample(&self, timestamp_ns: u64) -> Result<CameraSample> {
        let t = timestamp_ns as f64 * 1e-9;
        let (mx, my) = (self.speed.0 * t, self.speed.1 * t);
        match self.kind {
            EstimatorKind::OpticalFlow => {
                let (ox, oy) = (mx / self.metres_per_pixel, my / self.metres_per_pixel);
                let frame = GrayFrame::from_fn(self.width, self.height, timestamp_ns, |x, y| {
                    ground(x as f64 + ox, y as f64 + oy)
                })?;
                Ok(CameraSample::Frame(frame))
            }
            // Camera x points along the vehicle's left, hence the quarter turn.
            EstimatorKind::PoseDelta => Ok(CameraSample::Pose {
                translation: Vector3::new(mx, my, 0.0),
                yaw: FRAC_PI_2,
                timestamp_ns,
            }),
        }
    }
}
