//! Extrinsic calibration engine.
//!
//! Every step is a pure function of a snapshot batch. Rigid transforms are
//! averaged component-wise over their 16 entries, which is only accurate when
//! the snapshots agree closely.
//!
//! Frames: the tracking frame is the frame of the tracking camera. The
//! projector extrinsics map tracking -> projector, the depth extrinsics map
//! tracking -> depth sensor.

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use super::homography::HomographyModel;
use super::plane::{PlaneAccumulator, PlaneModel};
use super::projection::PlaneAndProjection;
use super::snapshot::CalibrationSnapshot;
use crate::config::CalibrationConfig;
use crate::depth::{DepthSensor, SensorKind};
use crate::error::{CalibrationError, CalibrationResult};
use crate::geometry::{transform, ProjectorView};

/// A persisted rigid transform between two device frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicCalibration {
    pub matrix: Mat4,
}

impl ExtrinsicCalibration {
    pub fn new(matrix: Mat4) -> Self {
        Self { matrix }
    }

    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.matrix.transform_point3(p)
    }

    pub fn inverse(&self) -> CalibrationResult<Self> {
        Ok(Self::new(transform::try_invert(&self.matrix)?))
    }
}

/// Output of a depth sensor calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthCalibration {
    /// Tracking -> depth transform. `None` for a plane-only recalibration.
    pub extrinsics: Option<ExtrinsicCalibration>,
    pub plane_projection: PlaneAndProjection,
}

/// Transform between two devices that observe the same board.
///
/// Given board poses in frames A and B, returns the A -> B transform.
pub fn compute_extrinsics(board_in_a: &Mat4, board_in_b: &Mat4) -> CalibrationResult<Mat4> {
    let a_from_b = *board_in_a * transform::try_invert(board_in_b)?;
    transform::try_invert(&a_from_b)
}

/// Average tracking -> projector transform over a snapshot batch.
pub fn compute_projector_camera_extrinsics(
    snapshots: &[CalibrationSnapshot],
) -> CalibrationResult<ExtrinsicCalibration> {
    let mut sum = Mat4::ZERO;
    let mut count = 0;

    for (i, snapshot) in snapshots.iter().enumerate() {
        let (Some(camera), Some(projector)) = (snapshot.camera_board, snapshot.projector_board)
        else {
            log::debug!("Snapshot {} has no camera/projector pair, skipping", i);
            continue;
        };
        match compute_extrinsics(&camera, &projector) {
            Ok(extrinsics) => {
                transform::accumulate(&mut sum, &extrinsics);
                count += 1;
            }
            Err(e) => log::warn!("Snapshot {} rejected: {}", i, e),
        }
    }

    if count == 0 {
        return Err(CalibrationError::NoUsableSnapshots {
            step: "projector-camera extrinsics",
            total: snapshots.len(),
        });
    }

    let average = transform::normalize(&sum, count)?;
    log::info!(
        "Projector-camera extrinsics averaged over {}/{} snapshots",
        count,
        snapshots.len()
    );
    Ok(ExtrinsicCalibration::new(average))
}

/// Average board plane seen by the tracking camera.
pub fn average_camera_plane(
    snapshots: &[CalibrationSnapshot],
    board_size: Vec2,
    height: f32,
) -> CalibrationResult<PlaneModel> {
    let mut sum = PlaneAccumulator::new();
    for (i, snapshot) in snapshots.iter().enumerate() {
        let Some(board) = snapshot.camera_board else {
            continue;
        };
        match board_plane(&board, board_size, height) {
            Ok(plane) => sum.add(&plane),
            Err(e) => log::warn!("Snapshot {} camera board rejected: {}", i, e),
        }
    }
    finish_plane(sum, "camera plane", snapshots.len(), height)
}

/// Average board plane in depth sensor space.
///
/// `color_to_depth` maps the sensor's color frame, where the board is
/// detected, into its depth frame.
pub fn average_depth_plane(
    snapshots: &[CalibrationSnapshot],
    color_to_depth: &Mat4,
    board_size: Vec2,
    height: f32,
) -> CalibrationResult<PlaneModel> {
    let mut sum = PlaneAccumulator::new();
    for (i, snapshot) in snapshots.iter().enumerate() {
        let Some(board) = snapshot.depth_board else {
            continue;
        };
        match board_plane(&(*color_to_depth * board), board_size, height) {
            Ok(plane) => sum.add(&plane),
            Err(e) => log::warn!("Snapshot {} depth board rejected: {}", i, e),
        }
    }
    finish_plane(sum, "depth plane", snapshots.len(), height)
}

/// Plane of a single board pose. Collapsed poses from a failed detection are
/// rejected instead of poisoning the average.
fn board_plane(board: &Mat4, board_size: Vec2, height: f32) -> CalibrationResult<PlaneModel> {
    transform::try_invert(board)?;
    let plane = PlaneModel::from_board_pose(board, board_size, height);
    if !plane.point.is_finite() || !plane.normal.is_finite() {
        return Err(CalibrationError::DegeneratePlane);
    }
    Ok(plane)
}

fn finish_plane(
    sum: PlaneAccumulator,
    step: &'static str,
    total: usize,
    height: f32,
) -> CalibrationResult<PlaneModel> {
    if sum.count() == 0 {
        return Err(CalibrationError::NoUsableSnapshots { step, total });
    }
    log::debug!("{} averaged over {}/{} snapshots", step, sum.count(), total);
    sum.average(height)
}

/// Homography from the work surface to normalized screen coordinates.
///
/// Samples a grid of screen points every `step`, casts each projector ray onto
/// `plane` (tracking frame), moves the hit into sensor space with
/// `sensor_extrinsics` and pairs its 2D coordinates on `surface` (sensor
/// frame) with the screen point. A single missed ray fails the whole
/// computation.
pub fn compute_screen_paper_intersection(
    projector: &ProjectorView,
    plane: &PlaneModel,
    sensor_extrinsics: &Mat4,
    surface: &PlaneModel,
    step: f32,
) -> CalibrationResult<HomographyModel> {
    if !(step > 0.0 && step <= 1.0) {
        return Err(CalibrationError::DegenerateHomography(format!(
            "screen step {} outside (0, 1]",
            step
        )));
    }

    let samples = ((1.0 / step) + 1e-4).floor() as usize;
    let mut plane_points = Vec::with_capacity((samples + 1) * (samples + 1));
    let mut screen_points = Vec::with_capacity((samples + 1) * (samples + 1));

    for i in 0..=samples {
        for j in 0..=samples {
            let screen = Vec2::new(i as f32 * step, j as f32 * step);

            let Some(hit) = projector.projected_point_on_plane(plane, screen.x, screen.y) else {
                log::warn!(
                    "Projector ray at ({}, {}) does not intersect the plane",
                    screen.x,
                    screen.y
                );
                return Err(CalibrationError::NoIntersection {
                    u: screen.x,
                    v: screen.y,
                });
            };

            let sensor_point = sensor_extrinsics.transform_point3(hit);
            plane_points.push(surface.project(sensor_point));
            screen_points.push(screen);
        }
    }

    let homography = HomographyModel::estimate(&plane_points, &screen_points)?;
    log::debug!(
        "Screen homography from {} samples, mean error {:.6}",
        plane_points.len(),
        homography.reprojection_error(&plane_points, &screen_points)
    );
    Ok(homography)
}

/// Depth sensor calibration against a calibrated projector.
pub struct DepthCalibrator<'a> {
    projector: &'a ProjectorView,
    sensor: &'a DepthSensor,
    config: &'a CalibrationConfig,
}

impl<'a> DepthCalibrator<'a> {
    pub fn new(
        projector: &'a ProjectorView,
        sensor: &'a DepthSensor,
        config: &'a CalibrationConfig,
    ) -> Self {
        Self {
            projector,
            sensor,
            config,
        }
    }

    /// Run the procedure matching the sensor generation.
    pub fn calibrate_depth_sensor(
        &self,
        snapshots: &[CalibrationSnapshot],
    ) -> CalibrationResult<DepthCalibration> {
        log::info!(
            "Calibrating {} depth sensor from {} snapshot(s)",
            self.sensor.kind,
            snapshots.len()
        );

        match self.sensor.kind {
            SensorKind::TimeOfFlight => self.calibrate_single_extrinsic(snapshots),
            SensorKind::StructuredLight => {
                let extrinsics = self.calibrate_stereo_extrinsics(snapshots)?;
                let plane_projection = self.calibrate_stereo_plane(snapshots, &extrinsics)?;
                Ok(DepthCalibration {
                    extrinsics: Some(extrinsics),
                    plane_projection,
                })
            }
        }
    }

    /// Sensor whose color camera is the tracking camera.
    ///
    /// The extrinsics come straight from the stereo calibration; the plane is
    /// fit in tracking space and carried into depth space.
    pub fn calibrate_single_extrinsic(
        &self,
        snapshots: &[CalibrationSnapshot],
    ) -> CalibrationResult<DepthCalibration> {
        let extrinsics = self.sensor.color_to_depth()?;

        let mut camera_plane = self.camera_plane(snapshots)?;
        camera_plane.flip_normal();
        let mut sensor_plane = camera_plane.transformed(&extrinsics);

        let homography = compute_screen_paper_intersection(
            self.projector,
            &camera_plane,
            &extrinsics,
            &sensor_plane,
            self.config.screen_step,
        )?;

        sensor_plane.move_along_normal(self.config.single_extrinsic_plane_offset);
        log::info!("Single extrinsic depth calibration complete");

        Ok(DepthCalibration {
            extrinsics: Some(ExtrinsicCalibration::new(extrinsics)),
            plane_projection: PlaneAndProjection::new(sensor_plane, homography),
        })
    }

    /// Tracking -> depth transform for a sensor with its own color camera.
    ///
    /// Uses snapshots where both the tracking camera and the sensor's color
    /// camera see the board.
    pub fn calibrate_stereo_extrinsics(
        &self,
        snapshots: &[CalibrationSnapshot],
    ) -> CalibrationResult<ExtrinsicCalibration> {
        let color_to_depth = self.sensor.color_to_depth()?;
        let mut sum = Mat4::ZERO;
        let mut count = 0;

        for (i, snapshot) in snapshots.iter().enumerate() {
            let (Some(depth_board), Some(camera_board)) =
                (snapshot.depth_board, snapshot.camera_board)
            else {
                log::debug!("Snapshot {} has no depth/camera pair, skipping", i);
                continue;
            };
            let board_in_depth = color_to_depth * depth_board;
            match compute_extrinsics(&board_in_depth, &camera_board) {
                Ok(depth_to_tracking) => {
                    transform::accumulate(&mut sum, &depth_to_tracking);
                    count += 1;
                }
                Err(e) => log::warn!("Snapshot {} rejected: {}", i, e),
            }
        }

        if count == 0 {
            return Err(CalibrationError::NoUsableSnapshots {
                step: "depth extrinsics",
                total: snapshots.len(),
            });
        }

        let depth_to_tracking = transform::normalize(&sum, count)?;
        let tracking_to_depth = transform::try_invert(&depth_to_tracking)?;
        log::info!(
            "Depth extrinsics averaged over {}/{} snapshots",
            count,
            snapshots.len()
        );
        Ok(ExtrinsicCalibration::new(tracking_to_depth))
    }

    /// Plane and homography for a sensor with its own color camera.
    ///
    /// The homography is built with `persisted` (tracking -> depth), so the
    /// plane can be recalibrated without recomputing the extrinsics.
    pub fn calibrate_stereo_plane(
        &self,
        snapshots: &[CalibrationSnapshot],
        persisted: &ExtrinsicCalibration,
    ) -> CalibrationResult<PlaneAndProjection> {
        let color_to_depth = self.sensor.color_to_depth()?;

        let mut camera_plane = self.camera_plane(snapshots)?;
        let mut depth_plane = average_depth_plane(
            snapshots,
            &color_to_depth,
            self.config.board_size,
            self.config.plane_height,
        )?;
        camera_plane.flip_normal();
        depth_plane.flip_normal();

        let homography = compute_screen_paper_intersection(
            self.projector,
            &camera_plane,
            &persisted.matrix,
            &depth_plane,
            self.config.screen_step,
        )?;

        depth_plane.move_along_normal(self.config.stereo_plane_offset);
        log::info!("Stereo depth plane calibration complete");

        Ok(PlaneAndProjection::new(depth_plane, homography))
    }

    fn camera_plane(&self, snapshots: &[CalibrationSnapshot]) -> CalibrationResult<PlaneModel> {
        average_camera_plane(snapshots, self.config.board_size, self.config.plane_height)
    }
}
