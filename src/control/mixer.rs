//! X-frame motor mixing.
//!
//! Motor layout, seen from above with the nose up:
//!
//! ```text
//!   front_cw (FL)   front_ccw (FR)
//!          \         /
//!           +-------+
//!          /         \
//!   rear_ccw (RL)   rear_cw (RR)
//! ```
//!
//! In [`MotorMixer::mix`] a positive pitch term speeds up the front pair, a
//! positive roll term speeds up the right pair and a positive yaw term speeds
//! up the counter-clockwise pair.

use nalgebra::Matrix3;
use serde::Deserialize;

use crate::mission::MissionState;

/// Orientation snapshot as a body-to-world rotation matrix.
///
/// Body axes are forward-right-down and world axes north-east-down, so
/// positive pitch lifts the nose and positive roll drops the right side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub rotation: Matrix3<f64>,
}

impl Orientation {
    pub fn new(rotation: Matrix3<f64>) -> Self {
        Self { rotation }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Rotation for the given roll and pitch (degrees), zero yaw.
    pub fn from_roll_pitch_deg(roll: f64, pitch: f64) -> Self {
        let r = nalgebra::Rotation3::from_euler_angles(roll.to_radians(), pitch.to_radians(), 0.0);
        Self::new(*r.matrix())
    }

    /// Roll in degrees.
    pub fn roll_deg(&self) -> f64 {
        let r = &self.rotation;
        r[(2, 1)].atan2(r[(2, 2)]).to_degrees()
    }

    /// Pitch in degrees.
    pub fn pitch_deg(&self) -> f64 {
        (-self.rotation[(2, 0)]).clamp(-1.0, 1.0).asin().to_degrees()
    }

    /// Yaw in radians.
    pub fn yaw(&self) -> f64 {
        let r = &self.rotation;
        r[(1, 0)].atan2(r[(0, 0)])
    }
}

/// Source of orientation snapshots.
pub trait OrientationSource: Send + Sync {
    fn rotation(&self) -> Orientation;
}

/// Level-attitude baseline captured when calibration is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Calibration {
    pub roll_deg: f64,
    pub pitch_deg: f64,
}

impl Calibration {
    pub fn capture(orientation: &Orientation) -> Self {
        Self {
            roll_deg: orientation.roll_deg(),
            pitch_deg: orientation.pitch_deg(),
        }
    }
}

/// Duty values for the four motors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorCommand {
    pub front_cw: f64,
    pub front_ccw: f64,
    pub rear_cw: f64,
    pub rear_ccw: f64,
}

impl MotorCommand {
    pub const ZERO: MotorCommand = MotorCommand {
        front_cw: 0.0,
        front_ccw: 0.0,
        rear_cw: 0.0,
        rear_ccw: 0.0,
    };

    pub fn duties(&self) -> [f64; 4] {
        [self.front_cw, self.front_ccw, self.rear_cw, self.rear_ccw]
    }

    pub fn is_zero(&self) -> bool {
        self.duties().iter().all(|d| *d == 0.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixerParams {
    /// Duty per degree of roll error.
    pub roll_gain: f64,
    /// Duty per degree of pitch error.
    pub pitch_gain: f64,
    pub max_duty: f64,
    pub cruise_throttle: f64,
    pub descent_throttle: f64,
    /// Duty removed per m/s of climb rate while seeking.
    pub vertical_damping: f64,
}

impl Default for MixerParams {
    fn default() -> Self {
        Self {
            roll_gain: 2.3,
            pitch_gain: 1.2,
            max_duty: 1000.0,
            cruise_throttle: 120.0,
            descent_throttle: 90.0,
            vertical_damping: 15.0,
        }
    }
}

impl MixerParams {
    /// Collective throttle for a state, given the vertical rate in m/s.
    pub fn throttle(&self, state: MissionState, vz: f64) -> f64 {
        match state {
            MissionState::Liftoff => self.cruise_throttle,
            MissionState::GpsSeek | MissionState::VisualSeek => {
                let damping = if vz.is_finite() { self.vertical_damping * vz } else { 0.0 };
                self.cruise_throttle - damping
            }
            MissionState::Landing => self.descent_throttle,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MotorMixer {
    params: MixerParams,
}

impl MotorMixer {
    pub fn new(params: MixerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MixerParams {
        &self.params
    }

    /// Combine collective throttle with pitch, roll and yaw terms.
    pub fn mix(&self, throttle: f64, pitch: f64, roll: f64, yaw: f64) -> MotorCommand {
        let clamp = |v: f64| {
            if v.is_finite() {
                v.clamp(0.0, self.params.max_duty)
            } else {
                0.0
            }
        };
        MotorCommand {
            front_cw: clamp(throttle + pitch - roll - yaw),
            front_ccw: clamp(throttle + pitch + roll + yaw),
            rear_cw: clamp(throttle - pitch + roll - yaw),
            rear_ccw: clamp(throttle - pitch - roll + yaw),
        }
    }

    /// Attitude errors relative to the baseline, scaled by the gains.
    pub fn errors(&self, orientation: &Orientation, baseline: &Calibration) -> (f64, f64) {
        let roll = (orientation.roll_deg() - baseline.roll_deg) * self.params.roll_gain;
        let pitch = (orientation.pitch_deg() - baseline.pitch_deg) * self.params.pitch_gain;
        (roll, pitch)
    }

    /// Levelling command: thrust moves towards whichever side hangs low.
    ///
    /// A nose-up pitch error slows the front pair. A right-down roll error
    /// speeds up the right pair.
    pub fn command(&self, orientation: &Orientation, baseline: &Calibration, throttle: f64) -> MotorCommand {
        let (roll, pitch) = self.errors(orientation, baseline);
        self.mix(throttle, -pitch, roll, 0.0)
    }
}
