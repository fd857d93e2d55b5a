//! Per-frame working set of the depth pipeline.
//!
//! Buffers are sized once from the sensor resolution and overwritten every
//! frame; nothing here is resized after construction.

use glam::{Vec2, Vec3};

/// Marker stored for pixels without a decoded point. Valid points always have
/// a strictly positive depth.
pub const INVALID_POINT: Vec3 = Vec3::ZERO;

#[inline]
pub fn is_valid_point(p: Vec3) -> bool {
    p.z > 0.0
}

/// Position of a point relative to the touch band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchAttributes {
    /// On the touch side, within the band.
    pub touch_surface: bool,
    /// Behind the plane, within the band.
    pub under_touch: bool,
    /// On the touch side, at any distance.
    pub over_touch: bool,
}

/// Which mask/list pair a classification writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTarget {
    Coarse,
    Fine,
}

/// Pixels visited at a given stride, row by row.
///
/// Both axes are sampled every `stride` pixels.
#[derive(Debug, Clone)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    stride: u32,
    x: u32,
    y: u32,
}

impl PixelGrid {
    pub fn new(width: u32, height: u32, stride: usize) -> Self {
        let stride = stride.max(1) as u32;
        Self {
            width,
            height,
            stride,
            x: 0,
            y: 0,
        }
    }

    /// Sampled rows.
    pub fn rows(height: u32, stride: usize) -> impl Iterator<Item = u32> {
        (0..height).step_by(stride.max(1))
    }
}

impl Iterator for PixelGrid {
    /// `(x, y, offset)`
    type Item = (u32, u32, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.width == 0 || self.y >= self.height {
            return None;
        }
        let item = (self.x, self.y, (self.y * self.width + self.x) as usize);
        self.x += self.stride;
        if self.x >= self.width {
            self.x = 0;
            self.y += self.stride;
        }
        Some(item)
    }
}

/// Dense per-pixel results of the last analysed frame.
#[derive(Debug, Clone)]
pub struct DepthFrameData {
    width: u32,
    height: u32,
    pub(crate) raw_depth: Vec<u8>,
    pub(crate) raw_color: Vec<u8>,
    pub(crate) has_color: bool,
    pub(crate) points: Vec<Vec3>,
    pub(crate) projected_points: Vec<Vec2>,
    pub(crate) mask_2d: Vec<bool>,
    pub(crate) mask_3d: Vec<bool>,
    pub(crate) list_2d: Vec<usize>,
    pub(crate) list_3d: Vec<usize>,
    pub(crate) touch_attributes: Vec<TouchAttributes>,
    pub(crate) colors: Vec<u32>,
}

impl DepthFrameData {
    pub fn new(width: u32, height: u32, depth_bytes: usize, color_bytes: usize) -> Self {
        let size = (width * height) as usize;
        Self {
            width,
            height,
            raw_depth: vec![0; depth_bytes],
            raw_color: vec![0; color_bytes],
            has_color: false,
            points: vec![INVALID_POINT; size],
            projected_points: vec![Vec2::ZERO; size],
            mask_2d: vec![false; size],
            mask_3d: vec![false; size],
            list_2d: Vec::with_capacity(size),
            list_3d: Vec::with_capacity(size),
            touch_attributes: vec![TouchAttributes::default(); size],
            colors: vec![0; size],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> usize {
        self.points.len()
    }

    /// Reset every per-pixel result. List capacity is kept.
    pub fn clear(&mut self) {
        self.points.fill(INVALID_POINT);
        self.projected_points.fill(Vec2::ZERO);
        self.touch_attributes.fill(TouchAttributes::default());
        self.colors.fill(0);
        self.clear_pass(PassTarget::Coarse);
        self.clear_pass(PassTarget::Fine);
    }

    pub fn clear_pass(&mut self, target: PassTarget) {
        match target {
            PassTarget::Coarse => {
                self.mask_2d.fill(false);
                self.list_2d.clear();
            }
            PassTarget::Fine => {
                self.mask_3d.fill(false);
                self.list_3d.clear();
            }
        }
    }

    #[inline]
    pub(crate) fn mark(&mut self, target: PassTarget, offset: usize) {
        let (mask, list) = match target {
            PassTarget::Coarse => (&mut self.mask_2d, &mut self.list_2d),
            PassTarget::Fine => (&mut self.mask_3d, &mut self.list_3d),
        };
        if !mask[offset] {
            mask[offset] = true;
            list.push(offset);
        }
    }

    /// Decoded points, `INVALID_POINT` where nothing was observed.
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn point(&self, offset: usize) -> Option<Vec3> {
        self.points.get(offset).copied().filter(|p| is_valid_point(*p))
    }

    /// Normalized screen coordinates of classified points.
    pub fn projected_points(&self) -> &[Vec2] {
        &self.projected_points
    }

    pub fn mask_2d(&self) -> &[bool] {
        &self.mask_2d
    }

    pub fn mask_3d(&self) -> &[bool] {
        &self.mask_3d
    }

    /// Offsets accepted by the coarse pass, in visiting order.
    pub fn valid_2d(&self) -> &[usize] {
        &self.list_2d
    }

    /// Offsets accepted by the fine pass, in visiting order.
    pub fn valid_3d(&self) -> &[usize] {
        &self.list_3d
    }

    pub fn touch_attributes(&self) -> &[TouchAttributes] {
        &self.touch_attributes
    }

    /// Packed `0xRRGGBB` colors, filled by color lookup.
    pub fn colors(&self) -> &[u32] {
        &self.colors
    }

    pub fn raw_depth(&self) -> &[u8] {
        &self.raw_depth
    }

    pub fn raw_color(&self) -> Option<&[u8]> {
        self.has_color.then_some(self.raw_color.as_slice())
    }
}
