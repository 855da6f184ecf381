//! Visual velocity estimation.
//!
//! Two interchangeable estimators, optical flow over grayscale frames and
//! pose differencing over camera poses, publish into one shared velocity cell
//! that the control loop reads through [`VelocityProvider`].

pub mod estimator;
pub mod optical_flow;
pub mod pose_delta;
pub mod provider;

pub use estimator::{CameraFeed, CameraSample, EstimatorKind, VelocityEstimator, VisualOdometry};
pub use optical_flow::{OpticalFlowEstimator, OpticalFlowParams, OpticalFlowVelocity};
pub use pose_delta::{PoseDeltaEstimator, PoseDeltaParams, PoseDeltaVelocity};
pub use provider::{SharedVelocity, Velocity, VelocityProvider};
