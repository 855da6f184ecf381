//! Mission states of the flight state machine.

use std::fmt;

/// Exactly one of these is current at any time; only the control loop
/// changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MissionState {
    /// Waiting for the operator to confirm the level attitude.
    #[default]
    Calibrate,
    /// Collecting location fixes and listening for a target.
    Idle,
    /// Climbing at cruise throttle.
    Liftoff,
    /// Flying toward the target, periodically looking for the pattern.
    GpsSeek,
    /// Pattern seen; centring over it.
    VisualSeek,
    Landing,
    /// Terminal. No actuator output.
    Landed,
    /// Heading back to the start point.
    Return,
}

impl MissionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Calibrate => "CALIBRATE",
            Self::Idle => "IDLE",
            Self::Liftoff => "LIFTOFF",
            Self::GpsSeek => "GPS_SEEK",
            Self::VisualSeek => "VISUAL_SEEK",
            Self::Landing => "LANDING",
            Self::Landed => "LANDED",
            Self::Return => "RETURN",
        }
    }

    /// States in which the motors receive non-zero duty.
    pub fn is_armed(&self) -> bool {
        matches!(
            self,
            Self::Liftoff | Self::GpsSeek | Self::VisualSeek | Self::Landing
        )
    }

    pub fn is_seeking(&self) -> bool {
        matches!(self, Self::GpsSeek | Self::VisualSeek)
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
