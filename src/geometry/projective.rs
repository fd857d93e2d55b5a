//! Pinhole model for cameras, depth sensors and projectors.

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::calibration::PlaneModel;
use crate::error::CalibrationResult;
use crate::geometry::transform;

/// Intrinsic parameters of a camera or projector (no lens distortion).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectiveDevice {
    /// Resolution width in pixels.
    pub width: u32,
    /// Resolution height in pixels.
    pub height: u32,
    /// Focal length x (pixel).
    pub fx: f32,
    /// Focal length y (pixel).
    pub fy: f32,
    /// Principal point x (pixel).
    pub cx: f32,
    /// Principal point y (pixel).
    pub cy: f32,
}

impl ProjectiveDevice {
    pub fn new(width: u32, height: u32, fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
        }
    }

    /// Number of pixels.
    pub fn size(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Linear offset of pixel (x, y).
    #[inline]
    pub fn offset(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    /// Back-project a pixel with a known depth into device space.
    #[inline]
    pub fn pixel_to_world(&self, x: f32, y: f32, depth: f32) -> Vec3 {
        Vec3::new(
            (x - self.cx) * depth / self.fx,
            (y - self.cy) * depth / self.fy,
            depth,
        )
    }

    /// Project a device-space point to pixel coordinates.
    ///
    /// Returns `None` for points at or behind the optical center.
    pub fn world_to_pixel(&self, p: Vec3) -> Option<Vec2> {
        if p.z <= f32::EPSILON {
            return None;
        }
        Some(Vec2::new(
            p.x * self.fx / p.z + self.cx,
            p.y * self.fy / p.z + self.cy,
        ))
    }

    /// Pixel offset hit by a device-space point, if it lands on the sensor.
    pub fn world_to_offset(&self, p: Vec3) -> Option<usize> {
        let px = self.world_to_pixel(p)?;
        let x = px.x.round();
        let y = px.y.round();
        if x < 0.0 || y < 0.0 || x >= self.width as f32 || y >= self.height as f32 {
            return None;
        }
        Some(self.offset(x as u32, y as u32))
    }

    /// Unit direction of the ray through pixel (x, y).
    pub fn pixel_ray(&self, x: f32, y: f32) -> Vec3 {
        Vec3::new((x - self.cx) / self.fx, (y - self.cy) / self.fy, 1.0).normalize()
    }
}

/// A projector placed in the tracking frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectorView {
    /// Projector intrinsics.
    pub device: ProjectiveDevice,
    /// Tracking frame -> projector frame.
    extrinsics: Mat4,
    /// Projector frame -> tracking frame.
    extrinsics_inv: Mat4,
}

impl ProjectorView {
    pub fn new(device: ProjectiveDevice, extrinsics: Mat4) -> CalibrationResult<Self> {
        let extrinsics_inv = transform::try_invert(&extrinsics)?;
        Ok(Self {
            device,
            extrinsics,
            extrinsics_inv,
        })
    }

    pub fn extrinsics(&self) -> &Mat4 {
        &self.extrinsics
    }

    pub fn width(&self) -> u32 {
        self.device.width
    }

    pub fn height(&self) -> u32 {
        self.device.height
    }

    /// Intersection of the projector ray through normalized screen point
    /// (u, v) with a plane expressed in the tracking frame.
    pub fn projected_point_on_plane(&self, plane: &PlaneModel, u: f32, v: f32) -> Option<Vec3> {
        let ray = self.device.pixel_ray(
            u * self.device.width as f32,
            v * self.device.height as f32,
        );
        let origin = self.extrinsics_inv.transform_point3(Vec3::ZERO);
        let direction = self.extrinsics_inv.transform_vector3(ray);
        plane.intersect_ray(origin, direction)
    }

    /// Pixel coordinates of a tracking-frame point.
    pub fn to_pixel(&self, p: Vec3) -> Option<Vec2> {
        self.device.world_to_pixel(self.extrinsics.transform_point3(p))
    }
}
