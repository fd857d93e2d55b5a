//! Depth sensor description.

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::error::CalibrationResult;
use crate::geometry::{transform, ProjectiveDevice};

/// Bytes per pixel of the color stream (BGR).
pub const COLOR_BYTES_PER_PIXEL: usize = 3;

/// Sensor generation. Selects the depth encoding and the calibration procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    /// Structured-light sensor: 2 bytes per pixel, big-endian millimetres.
    /// Calibrated with the paired extrinsic + plane procedure.
    StructuredLight,
    /// Time-of-flight sensor: 3 bytes per pixel, little-endian scaled units.
    /// Its color camera is the tracking camera; calibrated with the single
    /// extrinsic procedure.
    TimeOfFlight,
}

impl SensorKind {
    pub fn depth_bytes_per_pixel(&self) -> usize {
        match self {
            SensorKind::StructuredLight => 2,
            SensorKind::TimeOfFlight => 3,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::StructuredLight => write!(f, "Structured Light"),
            SensorKind::TimeOfFlight => write!(f, "Time of Flight"),
        }
    }
}

/// A depth sensor paired with its own color camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthSensor {
    pub kind: SensorKind,
    /// Depth camera intrinsics.
    pub depth: ProjectiveDevice,
    /// Color camera intrinsics.
    pub color: ProjectiveDevice,
    /// Depth frame -> color frame.
    pub stereo: Mat4,
}

impl DepthSensor {
    pub fn new(
        kind: SensorKind,
        depth: ProjectiveDevice,
        color: ProjectiveDevice,
        stereo: Mat4,
    ) -> Self {
        Self {
            kind,
            depth,
            color,
            stereo,
        }
    }

    /// Expected length of a raw depth buffer.
    pub fn depth_frame_len(&self) -> usize {
        self.depth.size() * self.kind.depth_bytes_per_pixel()
    }

    /// Expected length of a raw color buffer.
    pub fn color_frame_len(&self) -> usize {
        self.color.size() * COLOR_BYTES_PER_PIXEL
    }

    /// Color frame -> depth frame.
    pub fn color_to_depth(&self) -> CalibrationResult<Mat4> {
        transform::try_invert(&self.stereo)
    }
}
