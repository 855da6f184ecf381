//! Image primitives, feature detection and tracking, and the landing-pattern
//! matcher.

pub mod corners;
pub mod gradient;
pub mod image;
pub mod klt;
pub mod pattern;
pub mod pyramid;

pub use corners::{Corner, CornerDetector};
pub use image::{ColorFrame, FloatImage, GrayFrame};
pub use klt::{Correspondence, KltTracker, TrackStatus};
pub use pattern::{ColorBlobMatcher, ColorFrameSource, HsvRange, PatternFix, PatternMatcher};
pub use pyramid::Pyramid;
