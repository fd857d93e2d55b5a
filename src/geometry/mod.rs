//! Geometric primitives shared by calibration, depth analysis and tracking.

mod projective;
pub mod transform;

pub use projective::{ProjectiveDevice, ProjectorView};
