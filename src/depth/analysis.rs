//! Depth classification pipeline.
//!
//! Each frame is decoded pixel by pixel, back-projected through the depth
//! intrinsics and classified against the calibrated work surface. The coarse
//! (touch) and fine (surface) passes use independent strides and write to
//! independent masks and lists.

use glam::{Mat4, Vec2, Vec3};
use rayon::prelude::*;

use super::decoder::DepthDecoder;
use super::frame::{DepthFrameData, PassTarget, PixelGrid, TouchAttributes};
use super::sensor::{DepthSensor, COLOR_BYTES_PER_PIXEL};
use crate::calibration::{is_inside_unit_square, PlaneAndProjection};
use crate::config::AnalysisConfig;
use crate::error::{CalibrationResult, FrameError};

/// Classification strategy of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Inside the touch band and projecting inside the screen.
    Touch2D,
    /// On the touch side and projecting inside the screen plus a margin.
    Surface3D,
    /// Records touch attributes for every point projecting inside the screen;
    /// accepts points inside the touch band.
    TouchHand,
    /// On the touch side, no projection.
    OverPlane,
}

impl Selection {
    pub fn target(&self) -> PassTarget {
        match self {
            Selection::Surface3D => PassTarget::Fine,
            Selection::Touch2D | Selection::TouchHand | Selection::OverPlane => PassTarget::Coarse,
        }
    }

    fn classify(
        &self,
        surface: &PlaneAndProjection,
        config: &AnalysisConfig,
        p: Vec3,
    ) -> Classified {
        let plane = &surface.plane;
        match self {
            Selection::Touch2D => {
                if !plane.has_good_orientation_and_distance(p) {
                    return Classified::REJECTED;
                }
                Classified::on_screen(surface.project_to_screen(p), config.margin_2d)
            }
            Selection::Surface3D => {
                if !plane.has_good_orientation(p) {
                    return Classified::REJECTED;
                }
                Classified::on_screen(surface.project_to_screen(p), config.margin_3d)
            }
            Selection::TouchHand => {
                let touch = TouchAttributes {
                    touch_surface: plane.has_good_orientation_and_distance(p),
                    under_touch: plane.is_under_plane(p),
                    over_touch: plane.has_good_orientation(p),
                };
                match surface.project_to_screen(p) {
                    Some(uv) if is_inside_unit_square(uv, config.margin_2d) => Classified {
                        projected: Some(uv),
                        touch: Some(touch),
                        valid: touch.touch_surface,
                    },
                    _ => Classified::REJECTED,
                }
            }
            Selection::OverPlane => Classified {
                projected: None,
                touch: None,
                valid: plane.has_good_orientation(p),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Classified {
    projected: Option<Vec2>,
    touch: Option<TouchAttributes>,
    valid: bool,
}

impl Classified {
    const REJECTED: Classified = Classified {
        projected: None,
        touch: None,
        valid: false,
    };

    fn on_screen(projected: Option<Vec2>, margin: f32) -> Self {
        match projected {
            Some(uv) => Classified {
                projected: Some(uv),
                touch: None,
                valid: is_inside_unit_square(uv, margin),
            },
            None => Classified::REJECTED,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    offset: usize,
    point: Vec3,
    class: Classified,
}

/// Depth analysis for one sensor.
#[derive(Debug, Clone)]
pub struct DepthAnalysis {
    sensor: DepthSensor,
    decoder: DepthDecoder,
    config: AnalysisConfig,
    color_to_depth: Mat4,
    frame: DepthFrameData,
}

impl DepthAnalysis {
    pub fn new(sensor: DepthSensor, config: AnalysisConfig) -> CalibrationResult<Self> {
        let decoder = DepthDecoder::for_sensor(sensor.kind, config.depth_ratio);
        let color_to_depth = sensor.color_to_depth()?;
        let frame = DepthFrameData::new(
            sensor.depth.width,
            sensor.depth.height,
            sensor.depth_frame_len(),
            sensor.color_frame_len(),
        );

        log::info!(
            "Depth analysis for {} sensor at {}x{}",
            sensor.kind,
            sensor.depth.width,
            sensor.depth.height
        );

        Ok(Self {
            sensor,
            decoder,
            config,
            color_to_depth,
            frame,
        })
    }

    pub fn sensor(&self) -> &DepthSensor {
        &self.sensor
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Results of the last update.
    pub fn frame(&self) -> &DepthFrameData {
        &self.frame
    }

    pub fn set_near_far(&mut self, near: f32, far: f32) {
        self.config.near = near;
        self.config.far = far;
    }

    /// Analyse a frame with the coarse touch pass and the fine surface pass.
    ///
    /// A stride of 0 disables the corresponding pass.
    pub fn update(
        &mut self,
        raw_depth: &[u8],
        raw_color: Option<&[u8]>,
        surface: &PlaneAndProjection,
        coarse_stride: usize,
        fine_stride: usize,
    ) -> Result<(), FrameError> {
        self.load_frame(raw_depth, raw_color)?;
        self.frame.clear();
        self.run_pass(surface, coarse_stride, Selection::Touch2D);
        self.run_pass(surface, fine_stride, Selection::Surface3D);
        self.trace_frame();
        Ok(())
    }

    /// Same as [`update`](Self::update), classifying rows in parallel.
    pub fn update_parallel(
        &mut self,
        raw_depth: &[u8],
        raw_color: Option<&[u8]>,
        surface: &PlaneAndProjection,
        coarse_stride: usize,
        fine_stride: usize,
    ) -> Result<(), FrameError> {
        self.load_frame(raw_depth, raw_color)?;
        self.frame.clear();
        self.run_pass_parallel(surface, coarse_stride, Selection::Touch2D);
        self.run_pass_parallel(surface, fine_stride, Selection::Surface3D);
        self.trace_frame();
        Ok(())
    }

    /// Analyse a frame with a single pass of any strategy.
    pub fn update_selection(
        &mut self,
        raw_depth: &[u8],
        raw_color: Option<&[u8]>,
        surface: &PlaneAndProjection,
        stride: usize,
        selection: Selection,
    ) -> Result<(), FrameError> {
        self.load_frame(raw_depth, raw_color)?;
        self.frame.clear();
        self.run_pass(surface, stride, selection);
        self.trace_frame();
        Ok(())
    }

    /// Fill packed colors for points accepted by either pass.
    pub fn update_colors(&mut self, stride: usize) {
        if !self.frame.has_color || stride == 0 {
            return;
        }
        let grid = PixelGrid::new(self.frame.width(), self.frame.height(), stride);
        for (_, _, offset) in grid {
            if !(self.frame.mask_2d[offset] || self.frame.mask_3d[offset]) {
                continue;
            }
            if let Some(color) = self.color_at(offset) {
                self.frame.colors[offset] = color;
            }
        }
    }

    /// Color under the point decoded at `offset`, as `0xRRGGBB`.
    pub fn color_at(&self, offset: usize) -> Option<u32> {
        let raw = self.frame.raw_color()?;
        let point = self.frame.point(offset)?;
        let color_point = self.sensor.stereo.transform_point3(point);
        let index = self.sensor.color.world_to_offset(color_point)? * COLOR_BYTES_PER_PIXEL;
        let bgr = raw.get(index..index + COLOR_BYTES_PER_PIXEL)?;
        Some((bgr[2] as u32) << 16 | (bgr[1] as u32) << 8 | bgr[0] as u32)
    }

    /// Stored depth point seen at a color-camera-space position.
    pub fn depth_point_at_color(&self, p: Vec3) -> Option<Vec3> {
        let in_depth = self.color_to_depth.transform_point3(p);
        let offset = self.sensor.depth.world_to_offset(in_depth)?;
        self.frame.point(offset)
    }

    /// Visit the points accepted by the coarse pass on a stride grid.
    pub fn for_each_valid_2d(&self, stride: usize, f: impl FnMut(usize, Vec3)) {
        self.for_each_valid(PassTarget::Coarse, stride, f);
    }

    /// Visit the points accepted by the fine pass on a stride grid.
    pub fn for_each_valid_3d(&self, stride: usize, f: impl FnMut(usize, Vec3)) {
        self.for_each_valid(PassTarget::Fine, stride, f);
    }

    fn for_each_valid(&self, target: PassTarget, stride: usize, mut f: impl FnMut(usize, Vec3)) {
        if stride == 0 {
            return;
        }
        let mask = match target {
            PassTarget::Coarse => &self.frame.mask_2d,
            PassTarget::Fine => &self.frame.mask_3d,
        };
        for (_, _, offset) in PixelGrid::new(self.frame.width(), self.frame.height(), stride) {
            if !mask[offset] {
                continue;
            }
            if let Some(p) = self.frame.point(offset) {
                f(offset, p);
            }
        }
    }

    fn load_frame(&mut self, raw_depth: &[u8], raw_color: Option<&[u8]>) -> Result<(), FrameError> {
        if raw_depth.len() != self.frame.raw_depth.len() {
            return Err(FrameError::BufferSize {
                modality: "depth",
                expected: self.frame.raw_depth.len(),
                actual: raw_depth.len(),
            });
        }
        self.frame.raw_depth.copy_from_slice(raw_depth);

        match raw_color {
            Some(color) => {
                if color.len() != self.frame.raw_color.len() {
                    return Err(FrameError::BufferSize {
                        modality: "color",
                        expected: self.frame.raw_color.len(),
                        actual: color.len(),
                    });
                }
                self.frame.raw_color.copy_from_slice(color);
                self.frame.has_color = true;
            }
            None => self.frame.has_color = false,
        }
        Ok(())
    }

    /// Decoded depth at `offset`, `None` for missing or out-of-range values.
    #[inline]
    fn depth_at(&self, offset: usize) -> Option<f32> {
        let d = self.decoder.decode(&self.frame.raw_depth, offset);
        (d > 0.0 && d >= self.config.near && d < self.config.far).then_some(d)
    }

    #[inline]
    fn sample(
        &self,
        x: u32,
        y: u32,
        surface: &PlaneAndProjection,
        selection: Selection,
    ) -> Option<Sample> {
        let offset = self.sensor.depth.offset(x, y);
        let depth = self.depth_at(offset)?;
        let point = self.sensor.depth.pixel_to_world(x as f32, y as f32, depth);
        Some(Sample {
            offset,
            point,
            class: selection.classify(surface, &self.config, point),
        })
    }

    fn run_pass(&mut self, surface: &PlaneAndProjection, stride: usize, selection: Selection) {
        if stride == 0 {
            return;
        }
        let target = selection.target();
        let grid = PixelGrid::new(self.frame.width(), self.frame.height(), stride);
        for (x, y, _) in grid {
            if let Some(sample) = self.sample(x, y, surface, selection) {
                record(&mut self.frame, target, &sample);
            }
        }
    }

    fn run_pass_parallel(
        &mut self,
        surface: &PlaneAndProjection,
        stride: usize,
        selection: Selection,
    ) {
        if stride == 0 {
            return;
        }
        let width = self.frame.width();
        let rows: Vec<u32> = PixelGrid::rows(self.frame.height(), stride).collect();

        let this = &*self;
        let samples: Vec<Vec<Sample>> = rows
            .par_iter()
            .map(|&y| {
                (0..width)
                    .step_by(stride)
                    .filter_map(|x| this.sample(x, y, surface, selection))
                    .collect()
            })
            .collect();

        // Rows are merged in order so lists match the sequential pass.
        let target = selection.target();
        for sample in samples.iter().flatten() {
            record(&mut self.frame, target, sample);
        }
    }

    fn trace_frame(&self) {
        log::trace!(
            "Depth frame classified: {} coarse, {} fine",
            self.frame.list_2d.len(),
            self.frame.list_3d.len()
        );
    }
}

#[inline]
fn record(frame: &mut DepthFrameData, target: PassTarget, sample: &Sample) {
    frame.points[sample.offset] = sample.point;
    if let Some(uv) = sample.class.projected {
        frame.projected_points[sample.offset] = uv;
    }
    if let Some(touch) = sample.class.touch {
        frame.touch_attributes[sample.offset] = touch;
    }
    if sample.class.valid {
        frame.mark(target, sample.offset);
    }
}
