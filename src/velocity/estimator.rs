//! Estimator selection and the visual odometry thread.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use nalgebra::Vector3;
use serde::Deserialize;
use tracing::{debug, info, trace};

use crate::system::shared_state::{SharedState, Worker};
use crate::vision::GrayFrame;

use super::optical_flow::{OpticalFlowParams, OpticalFlowVelocity};
use super::pose_delta::{PoseDeltaParams, PoseDeltaVelocity};
use super::provider::Velocity;

/// Timeout for receiving camera samples (allows periodic shutdown checks).
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    #[default]
    OpticalFlow,
    PoseDelta,
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpticalFlow => f.write_str("optical-flow"),
            Self::PoseDelta => f.write_str("pose-delta"),
        }
    }
}

impl FromStr for EstimatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "optical-flow" | "flow" => Ok(Self::OpticalFlow),
            "pose-delta" | "pose" => Ok(Self::PoseDelta),
            other => Err(format!("unknown estimator '{other}' (expected optical-flow or pose-delta)")),
        }
    }
}

/// One unit of camera output.
#[derive(Debug, Clone)]
pub enum CameraSample {
    Frame(GrayFrame),
    Pose {
        translation: Vector3<f64>,
        yaw: f64,
        timestamp_ns: u64,
    },
}

/// The estimator active for a mission. Chosen once at start-up.
pub enum VelocityEstimator {
    OpticalFlow(OpticalFlowVelocity),
    PoseDelta(PoseDeltaVelocity),
}

impl VelocityEstimator {
    pub fn new(kind: EstimatorKind, flow: &OpticalFlowParams, pose: &PoseDeltaParams) -> Self {
        match kind {
            EstimatorKind::OpticalFlow => Self::OpticalFlow(OpticalFlowVelocity::new(flow)),
            EstimatorKind::PoseDelta => Self::PoseDelta(PoseDeltaVelocity::new(pose)),
        }
    }

    pub fn kind(&self) -> EstimatorKind {
        match self {
            Self::OpticalFlow(_) => EstimatorKind::OpticalFlow,
            Self::PoseDelta(_) => EstimatorKind::PoseDelta,
        }
    }

    /// Feed a sample. Samples of the wrong kind are ignored.
    pub fn process(&mut self, sample: &CameraSample) -> Option<Velocity> {
        match (self, sample) {
            (Self::OpticalFlow(est), CameraSample::Frame(frame)) => est.on_frame(frame),
            (
                Self::PoseDelta(est),
                CameraSample::Pose {
                    translation,
                    yaw,
                    timestamp_ns,
                },
            ) => est.on_pose(*translation, *yaw, *timestamp_ns),
            (est, _) => {
                trace!(kind = %est.kind(), "camera sample ignored");
                None
            }
        }
    }
}

/// Non-blocking entry point for the camera callback.
#[derive(Clone)]
pub struct CameraFeed {
    sender: Sender<CameraSample>,
    dropped: Arc<AtomicU64>,
}

impl CameraFeed {
    /// Hand a sample to visual odometry. Returns false if it was dropped
    /// because the queue is full or the consumer is gone.
    pub fn push(&self, sample: CameraSample) -> bool {
        match self.sender.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("camera sample dropped, odometry busy");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Visual odometry thread: the only writer of `SharedState::velocity`.
pub struct VisualOdometry {
    handle: Option<JoinHandle<()>>,
    shared: Arc<SharedState>,
}

impl VisualOdometry {
    pub fn spawn(estimator: VelocityEstimator, shared: Arc<SharedState>, capacity: usize) -> (Self, CameraFeed) {
        let (sender, receiver) = bounded(capacity.max(1));
        let thread_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || run(estimator, receiver, thread_shared));
        let feed = CameraFeed {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (
            Self {
                handle: Some(handle),
                shared,
            },
            feed,
        )
    }

    pub fn shutdown(&mut self) {
        self.shared.request_stop(Worker::Odometry);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for VisualOdometry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut estimator: VelocityEstimator, receiver: Receiver<CameraSample>, shared: Arc<SharedState>) {
    info!(kind = %estimator.kind(), "visual odometry started");
    let mut published = 0u64;
    loop {
        if shared.should_stop(Worker::Odometry) {
            break;
        }
        match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(sample) => {
                if shared.velocity.publish(estimator.process(&sample)) {
                    published += 1;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(published, "visual odometry stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::velocity::VelocityProvider;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("optical-flow".parse::<EstimatorKind>().unwrap(), EstimatorKind::OpticalFlow);
        assert_eq!("POSE_DELTA".parse::<EstimatorKind>().unwrap(), EstimatorKind::PoseDelta);
        assert!("sonar".parse::<EstimatorKind>().is_err());
    }

    #[test]
    fn test_mismatched_sample_is_ignored() {
        let mut est = VelocityEstimator::new(
            EstimatorKind::PoseDelta,
            &OpticalFlowParams::default(),
            &PoseDeltaParams::default(),
        );
        let frame = GrayFrame::from_fn(16, 16, 0, |_, _| 0).unwrap();
        assert!(est.process(&CameraSample::Frame(frame)).is_none());
    }

    #[test]
    fn test_odometry_thread_publishes_velocity() {
        let shared = SharedState::new();
        let est = VelocityEstimator::new(
            EstimatorKind::PoseDelta,
            &OpticalFlowParams::default(),
            &PoseDeltaParams::default(),
        );
        let (mut vo, feed) = VisualOdometry::spawn(est, Arc::clone(&shared), 8);
        for (i, x) in [0.0, 0.1, 0.2].into_iter().enumerate() {
            assert!(feed.push(CameraSample::Pose {
                translation: Vector3::new(x, 0.0, 0.0),
                yaw: FRAC_PI_2,
                timestamp_ns: i as u64 * 100_000_000,
            }));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while shared.velocity.velocity().x == 0.0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        vo.shutdown();
        assert_relative_eq!(shared.velocity.velocity().x, 1.0, epsilon = 1e-9);
    }
}
