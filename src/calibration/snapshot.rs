//! Calibration snapshots.

use glam::Mat4;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::depth::DepthSensor;
use crate::error::ExportError;
use crate::geometry::ProjectiveDevice;

/// Reference-board poses observed at one instant.
///
/// A missing pose means the board was not detected by that device; the
/// calibration steps that need it skip the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    /// Board -> tracking camera frame.
    #[serde(default)]
    pub camera_board: Option<Mat4>,
    /// Board -> projector frame.
    #[serde(default)]
    pub projector_board: Option<Mat4>,
    /// Board -> depth sensor's color camera frame.
    #[serde(default)]
    pub depth_board: Option<Mat4>,
}

impl CalibrationSnapshot {
    pub fn new(camera_board: Mat4, projector_board: Mat4) -> Self {
        Self {
            camera_board: Some(camera_board),
            projector_board: Some(projector_board),
            depth_board: None,
        }
    }

    pub fn with_depth(mut self, depth_board: Mat4) -> Self {
        self.depth_board = Some(depth_board);
        self
    }
}

/// Everything the batch calibrator needs, as captured by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBatch {
    /// Projector intrinsics.
    pub projector: ProjectiveDevice,
    /// Depth sensor description.
    pub sensor: DepthSensor,
    pub snapshots: Vec<CalibrationSnapshot>,
}

impl SnapshotBatch {
    /// Load a batch from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save the batch as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_missing_fields_deserialize_as_none() {
        let pose = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let json = format!(
            r#"{{ "camera_board": {} }}"#,
            serde_json::to_string(&pose).unwrap()
        );
        let snapshot: CalibrationSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(snapshot.camera_board, Some(pose));
        assert_eq!(snapshot.projector_board, None);
        assert_eq!(snapshot.depth_board, None);
    }
}
