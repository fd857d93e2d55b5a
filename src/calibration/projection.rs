//! Plane plus homography: the persisted work-surface calibration.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use super::homography::HomographyModel;
use super::plane::PlaneModel;

/// Work surface in depth-sensor space and its map to normalized screen space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneAndProjection {
    pub plane: PlaneModel,
    /// Plane 2D coordinates -> normalized screen coordinates.
    pub homography: HomographyModel,
}

impl PlaneAndProjection {
    pub fn new(plane: PlaneModel, homography: HomographyModel) -> Self {
        Self { plane, homography }
    }

    /// Normalized screen coordinates of a sensor-space point.
    #[inline]
    pub fn project_to_screen(&self, p: Vec3) -> Option<Vec2> {
        self.homography.apply(self.plane.project(p))
    }
}
