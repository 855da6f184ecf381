//! Mission configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Sections mirror the subsystems they configure.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::control::{ControlParams, MixerParams};
use crate::hardware::RangingParams;
use crate::link::LinkParams;
use crate::mission::SeekParams;
use crate::velocity::{EstimatorKind, OpticalFlowParams, PoseDeltaParams};
use crate::vision::HsvRange;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternParams {
    pub range: HsvRange,
    /// Smallest blob, in pixels, accepted as the pattern.
    pub min_area: usize,
}

impl Default for PatternParams {
    fn default() -> Self {
        Self {
            range: HsvRange::default(),
            min_area: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub estimator: EstimatorKind,
    /// Camera samples buffered ahead of visual odometry.
    pub camera_queue: usize,
    pub control: ControlParams,
    pub seek: SeekParams,
    pub mixer: MixerParams,
    pub optical_flow: OpticalFlowParams,
    pub pose_delta: PoseDeltaParams,
    pub pattern: PatternParams,
    pub ranging: RangingParams,
    pub link: LinkParams,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorKind::default(),
            camera_queue: 4,
            control: ControlParams::default(),
            seek: SeekParams::default(),
            mixer: MixerParams::default(),
            optical_flow: OpticalFlowParams::default(),
            pose_delta: PoseDeltaParams::default(),
            pattern: PatternParams::default(),
            ranging: RangingParams::default(),
            link: LinkParams::default(),
        }
    }
}

impl MissionConfig {
    /// Load and validate a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let config: MissionConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: MissionConfig = serde_yaml::from_str(text).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.control.period_ms == 0 {
            bail!("control.period_ms must be positive");
        }
        if self.control.watchdog_periods == 0 {
            bail!("control.watchdog_periods must be positive");
        }
        if self.seek.gps_lock_interval == 0 || self.seek.visual_lock_interval == 0 {
            bail!("seek lock intervals must be positive");
        }
        if self.seek.acceptance.is_empty() {
            bail!("seek.acceptance box is empty: {:?}", self.seek.acceptance);
        }

        let m = &self.mixer;
        for (name, v) in [
            ("roll_gain", m.roll_gain),
            ("pitch_gain", m.pitch_gain),
            ("cruise_throttle", m.cruise_throttle),
            ("descent_throttle", m.descent_throttle),
            ("vertical_damping", m.vertical_damping),
        ] {
            if !v.is_finite() {
                bail!("mixer.{} must be finite, got {}", name, v);
            }
        }
        if !(m.max_duty.is_finite() && m.max_duty > 0.0) {
            bail!("mixer.max_duty must be positive, got {}", m.max_duty);
        }

        let f = &self.optical_flow;
        if f.max_features == 0 {
            bail!("optical_flow.max_features must be positive");
        }
        if f.pyramid_levels == 0 {
            bail!("optical_flow.pyramid_levels must be at least 1");
        }
        if !(f.gate.is_finite() && f.gate > 0.0) {
            bail!("optical_flow.gate must be positive, got {}", f.gate);
        }
        if !(f.metres_per_pixel.is_finite() && f.metres_per_pixel > 0.0) {
            bail!("optical_flow.metres_per_pixel must be positive, got {}", f.metres_per_pixel);
        }
        if !self.pose_delta.yaw_offset_deg.is_finite() {
            bail!("pose_delta.yaw_offset_deg must be finite");
        }
        if self.camera_queue == 0 {
            bail!("camera_queue must be positive");
        }
        Ok(())
    }
}
