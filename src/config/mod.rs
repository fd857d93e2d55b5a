//! Configuration and serialization module.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ExportError;

/// Top level configuration for an installation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcamConfig {
    /// Extrinsic and plane calibration tunables.
    pub calibration: CalibrationConfig,
    /// Per-frame depth analysis tunables.
    pub analysis: AnalysisConfig,
    /// Marker tracking tunables.
    pub tracking: TrackingConfig,
}

impl ProcamConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Calibration constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Physical size of the reference board (millimetres).
    pub board_size: Vec2,
    /// Tolerance band above the plane counted as touching.
    pub plane_height: f32,
    /// Step between normalized screen samples (0.5 gives a 3x3 grid).
    pub screen_step: f32,
    /// Offset along the normal applied to the single-extrinsic sensor plane.
    pub single_extrinsic_plane_offset: f32,
    /// Offset along the normal applied to the stereo sensor plane.
    pub stereo_plane_offset: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            board_size: Vec2::new(297.0, 210.0),
            plane_height: crate::calibration::DEFAULT_PLANE_HEIGHT,
            screen_step: 0.5,
            single_extrinsic_plane_offset: -7.0,
            stereo_plane_offset: -20.0,
        }
    }
}

/// Depth analysis constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sampling stride of the touch (2D) pass.
    pub coarse_stride: usize,
    /// Sampling stride of the surface (3D) pass.
    pub fine_stride: usize,
    /// Outward margin of the unit square for the 2D pass.
    pub margin_2d: f32,
    /// Outward margin of the unit square for the 3D pass.
    pub margin_3d: f32,
    /// Closest accepted decoded depth.
    pub near: f32,
    /// Farthest accepted decoded depth (exclusive).
    pub far: f32,
    /// Divisor applied by the time-of-flight depth decoder.
    pub depth_ratio: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            coarse_stride: 1,
            fine_stride: 1,
            margin_2d: 0.0,
            margin_3d: 0.1,
            near: 300.0,
            far: 12000.0,
            depth_ratio: crate::depth::DEFAULT_DEPTH_RATIO,
        }
    }
}

/// Marker tracking constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Length of the hold window opened by drawing mode (milliseconds).
    pub hold_duration_ms: u64,
    /// Minimum movement before a drawing-mode board is moved.
    pub drawing_min_distance: f32,
    /// Pose filter parameters applied when a camera is registered.
    pub filter: FilterConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            hold_duration_ms: 1000,
            drawing_min_distance: 2.0,
            filter: FilterConfig::default(),
        }
    }
}

/// One-Euro filter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Expected update frequency (Hz).
    pub frequency: f64,
    /// Minimum cutoff frequency (Hz).
    pub min_cutoff: f64,
    /// Speed coefficient.
    pub beta: f64,
    /// Cutoff used for the derivative.
    pub derivative_cutoff: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            frequency: 30.0,
            min_cutoff: 1.0,
            beta: 0.0,
            derivative_cutoff: 1.0,
        }
    }
}
