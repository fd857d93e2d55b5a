//! Planar model of the work surface.
//!
//! A plane is a point, a unit normal and a tolerance `height`. The side the
//! normal points to is the touch side: points on it within `height` of the
//! plane are on the surface, points farther away are above it, points on the
//! other side are below it.

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, CalibrationResult};

/// Tolerance band used when no explicit height is configured.
pub const DEFAULT_PLANE_HEIGHT: f32 = 15.0;

/// Classification of a point relative to the plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneSide {
    /// Touch side, farther than the tolerance band.
    Above,
    /// Touch side, within the tolerance band.
    OnSurface,
    /// Opposite side of the normal.
    Below,
}

/// 3D plane with a touch tolerance band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneModel {
    /// A point on the plane.
    pub point: Vec3,
    /// Unit normal pointing to the touch side.
    pub normal: Vec3,
    /// Thickness of the touch band.
    pub height: f32,
}

impl PlaneModel {
    pub fn new(point: Vec3, normal: Vec3, height: f32) -> Self {
        Self {
            point,
            normal: normal.normalize(),
            height,
        }
    }

    /// Plane of a board given its pose and physical size.
    ///
    /// The board spans `(0, 0)..board_size` in its own XY plane; the normal is
    /// the board's +Z axis, which points away from the observing device.
    pub fn from_board_pose(board: &Mat4, board_size: Vec2, height: f32) -> Self {
        let origin = board.transform_point3(Vec3::ZERO);
        let along_x = board.transform_point3(Vec3::new(board_size.x, 0.0, 0.0));
        let along_y = board.transform_point3(Vec3::new(0.0, board_size.y, 0.0));
        let normal = (along_x - origin).cross(along_y - origin);
        Self::new(origin, normal, height)
    }

    pub fn flip_normal(&mut self) {
        self.normal = -self.normal;
    }

    /// Translate the plane along its normal.
    pub fn move_along_normal(&mut self, distance: f32) {
        self.point += self.normal * distance;
    }

    /// Signed distance, positive on the touch side.
    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p - self.point)
    }

    #[inline]
    pub fn distance_to(&self, p: Vec3) -> f32 {
        self.signed_distance(p).abs()
    }

    #[inline]
    pub fn classify(&self, p: Vec3) -> PlaneSide {
        let d = self.signed_distance(p);
        if d < 0.0 {
            PlaneSide::Below
        } else if d <= self.height {
            PlaneSide::OnSurface
        } else {
            PlaneSide::Above
        }
    }

    /// Point is on the touch side of the plane.
    #[inline]
    pub fn has_good_orientation(&self, p: Vec3) -> bool {
        self.classify(p) != PlaneSide::Below
    }

    /// Point is on the touch side and within the tolerance band.
    #[inline]
    pub fn has_good_orientation_and_distance(&self, p: Vec3) -> bool {
        self.classify(p) == PlaneSide::OnSurface
    }

    /// Point is behind the plane but still within the tolerance band.
    #[inline]
    pub fn is_under_plane(&self, p: Vec3) -> bool {
        let d = self.signed_distance(p);
        d < 0.0 && -d <= self.height
    }

    /// Orthogonal projection onto the plane, in the plane's 2D coordinates.
    ///
    /// The in-plane axes depend only on the normal direction (not its sign
    /// nor the plane offset), so flipping or moving the plane leaves the
    /// coordinates of a point unchanged.
    #[inline]
    pub fn project(&self, p: Vec3) -> Vec2 {
        let (u, v) = self.basis();
        Vec2::new(u.dot(p), v.dot(p))
    }

    /// In-plane orthonormal axes.
    pub fn basis(&self) -> (Vec3, Vec3) {
        let n = self.normal;
        let a = n.abs();
        let major = if a.x >= a.y && a.x >= a.z {
            n.x
        } else if a.y >= a.z {
            n.y
        } else {
            n.z
        };
        let canonical = if major < 0.0 { -n } else { n };
        let helper = if canonical.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
        let u = (helper - canonical * canonical.dot(helper)).normalize();
        let v = canonical.cross(u);
        (u, v)
    }

    /// Intersection of a ray with the plane, in front of the ray origin.
    pub fn intersect_ray(&self, origin: Vec3, direction: Vec3) -> Option<Vec3> {
        let denom = self.normal.dot(direction);
        if denom.abs() < 1e-6 {
            return None;
        }
        let t = self.normal.dot(self.point - origin) / denom;
        if t.is_nan() || t <= 0.0 {
            return None;
        }
        Some(origin + direction * t)
    }

    /// The same plane expressed in another frame through a rigid transform.
    pub fn transformed(&self, m: &Mat4) -> Self {
        Self {
            point: m.transform_point3(self.point),
            normal: m.transform_vector3(self.normal).normalize(),
            height: self.height,
        }
    }
}

/// Bounds check on the unit square with an outward margin (inclusive).
#[inline]
pub fn is_inside_unit_square(uv: Vec2, margin: f32) -> bool {
    uv.x >= -margin && uv.x <= 1.0 + margin && uv.y >= -margin && uv.y <= 1.0 + margin
}

/// Running sum of plane estimates.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaneAccumulator {
    point_sum: Vec3,
    normal_sum: Vec3,
    count: usize,
}

impl PlaneAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sample: &PlaneModel) {
        self.point_sum += sample.point;
        self.normal_sum += sample.normal;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean point and renormalized mean normal of the accumulated planes.
    pub fn average(&self, height: f32) -> CalibrationResult<PlaneModel> {
        if self.count == 0 {
            return Err(CalibrationError::NoUsableSnapshots {
                step: "plane average",
                total: 0,
            });
        }
        let inv = 1.0 / self.count as f32;
        let normal = self.normal_sum * inv;
        if !normal.is_finite() || normal.length_squared() < 1e-12 {
            return Err(CalibrationError::DegeneratePlane);
        }
        Ok(PlaneModel::new(self.point_sum * inv, normal, height))
    }
}
