//! Geometry utilities: planar displacement vectors and robust statistics.

pub mod stats;
pub mod vector;

pub use stats::{dual_median, gated_centroid};
pub use vector::{Displacement, centroid, wrap_angle};
