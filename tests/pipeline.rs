//! End-to-end flow on a synthetic installation: snapshots, calibration,
//! persistence, depth classification and board visibility.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec2, Vec3};
use procam_tracking::calibration::{
    compute_projector_camera_extrinsics, CalibrationSnapshot, DepthCalibrator, SnapshotBatch,
};
use procam_tracking::config::ProcamConfig;
use procam_tracking::depth::{DepthAnalysis, DepthDecoder, DepthSensor, SensorKind};
use procam_tracking::error::CalibrationError;
use procam_tracking::export::CalibrationFiles;
use procam_tracking::geometry::{transform, ProjectiveDevice, ProjectorView};
use procam_tracking::tracking::{MarkerBoard, ManualClock, PoseEstimator};

const DEPTH_WIDTH: u32 = 160;
const DEPTH_HEIGHT: u32 = 120;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn projector_device() -> ProjectiveDevice {
    ProjectiveDevice::new(1280, 800, 1000.0, 1000.0, 640.0, 400.0)
}

/// Projector 50 units right of the tracking camera, same orientation.
fn tracking_to_projector() -> Mat4 {
    Mat4::from_translation(Vec3::new(-50.0, 0.0, 0.0))
}

/// Sensor color camera 100 units right of the tracking camera.
fn tracking_to_sensor_color() -> Mat4 {
    Mat4::from_translation(Vec3::new(-100.0, 0.0, 0.0))
}

fn sensor(kind: SensorKind) -> DepthSensor {
    let device = ProjectiveDevice::new(DEPTH_WIDTH, DEPTH_HEIGHT, 150.0, 150.0, 80.0, 60.0);
    // Depth -> color.
    let stereo = Mat4::from_translation(Vec3::new(25.0, 0.0, 0.0));
    DepthSensor::new(kind, device, device, stereo)
}

/// A4 board lying on a table 1000 units in front of the camera.
fn board_pose(shift: Vec2) -> Mat4 {
    Mat4::from_translation(Vec3::new(-148.5 + shift.x, -105.0 + shift.y, 1000.0))
}

fn snapshots() -> Vec<CalibrationSnapshot> {
    [Vec2::ZERO, Vec2::new(40.0, -10.0), Vec2::new(-25.0, 30.0)]
        .iter()
        .map(|shift| {
            let camera_board = board_pose(*shift);
            CalibrationSnapshot::new(camera_board, tracking_to_projector() * camera_board)
                .with_depth(tracking_to_sensor_color() * camera_board)
        })
        .collect()
}

fn config() -> ProcamConfig {
    let mut config = ProcamConfig::default();
    // Keep the table itself inside the touch band.
    config.calibration.stereo_plane_offset = -7.0;
    config
}

fn depth_frame(depth: impl Fn(u32, u32) -> f32) -> Vec<u8> {
    let mut raw = Vec::new();
    for y in 0..DEPTH_HEIGHT {
        for x in 0..DEPTH_WIDTH {
            DepthDecoder::BigEndian16.encode(depth(x, y), &mut raw);
        }
    }
    raw
}

#[test]
fn test_projector_extrinsics_recover_camera_points() {
    init_logging();
    let truth = Mat4::from_rotation_translation(
        Quat::from_rotation_y(0.15) * Quat::from_rotation_x(-0.05),
        Vec3::new(-80.0, 20.0, 15.0),
    );
    let snapshots: Vec<_> = [Vec2::ZERO, Vec2::new(30.0, 30.0), Vec2::new(-60.0, 5.0)]
        .iter()
        .map(|shift| {
            let camera_board = board_pose(*shift);
            CalibrationSnapshot::new(camera_board, truth * camera_board)
        })
        .collect();

    let extrinsics = compute_projector_camera_extrinsics(&snapshots).unwrap();
    let inverse = extrinsics.inverse().unwrap();

    let camera_point = Vec3::new(12.0, -40.0, 950.0);
    let projector_point = truth.transform_point3(camera_point);
    let recovered = inverse.transform_point(projector_point);
    assert!((recovered - camera_point).length() < 1e-2);
}

#[test]
fn test_full_calibration_and_classification() {
    init_logging();
    let config = config();
    let sensor = sensor(SensorKind::StructuredLight);
    let snapshots = snapshots();

    let projector_extrinsics = compute_projector_camera_extrinsics(&snapshots).unwrap();
    let error = transform::max_difference(&projector_extrinsics.matrix, &tracking_to_projector());
    assert!(error < 1e-3);

    let projector = ProjectorView::new(projector_device(), projector_extrinsics.matrix).unwrap();
    let calibrator = DepthCalibrator::new(&projector, &sensor, &config.calibration);
    let depth = calibrator.calibrate_depth_sensor(&snapshots).unwrap();

    let depth_extrinsics = depth.extrinsics.unwrap();
    let expected = Mat4::from_translation(Vec3::new(-125.0, 0.0, 0.0));
    assert!(transform::max_difference(&depth_extrinsics.matrix, &expected) < 1e-3);

    // Persist and reload before using the calibration.
    let files = CalibrationFiles::new(std::env::temp_dir().join("procam_pipeline_test"));
    files.save_projector_extrinsics(&projector_extrinsics).unwrap();
    files.save_depth_extrinsics(&depth_extrinsics).unwrap();
    files.save_plane_projection(&depth.plane_projection).unwrap();
    let surface = files.load_plane_projection().unwrap();
    assert_eq!(surface, depth.plane_projection);
    assert_eq!(files.load_depth_extrinsics().unwrap(), depth_extrinsics);
    let _ = std::fs::remove_dir_all(files.dir());

    // Projector center hits the table at (50, 0, 1000) in the tracking frame.
    let center = depth_extrinsics.transform_point(Vec3::new(50.0, 0.0, 1000.0));
    let uv = surface.project_to_screen(center).unwrap();
    assert!((uv - Vec2::new(0.5, 0.5)).length() < 1e-3);

    // A hand hovers over the left quarter of the table.
    let raw = depth_frame(|x, _| if x < DEPTH_WIDTH / 4 { 850.0 } else { 1000.0 });
    let mut analysis = DepthAnalysis::new(sensor, config.analysis.clone()).unwrap();
    analysis.update(&raw, None, &surface, 1, 1).unwrap();

    let frame = analysis.frame();
    let total = (DEPTH_WIDTH * DEPTH_HEIGHT) as usize;
    assert_eq!(frame.valid_3d().len(), total);
    assert!(frame.valid_2d().iter().all(|&o| o as u32 % DEPTH_WIDTH >= DEPTH_WIDTH / 4));
    assert!(frame.valid_2d().len() >= (DEPTH_WIDTH * 3 / 4 * (DEPTH_HEIGHT - 1)) as usize);

    for &offset in frame.valid_2d() {
        let uv = frame.projected_points()[offset];
        assert!(uv.x >= 0.0 && uv.x <= 1.0 && uv.y >= 0.0 && uv.y <= 1.0);
    }
}

#[test]
fn test_plane_only_recalibration_uses_persisted_extrinsics() {
    init_logging();
    let config = config();
    let sensor = sensor(SensorKind::StructuredLight);
    let projector = ProjectorView::new(projector_device(), tracking_to_projector()).unwrap();
    let calibrator = DepthCalibrator::new(&projector, &sensor, &config.calibration);

    let extrinsics = calibrator.calibrate_stereo_extrinsics(&snapshots()).unwrap();

    // Only the tracking camera saw the board this time around.
    let plane_snapshots: Vec<_> = snapshots()
        .into_iter()
        .map(|s| CalibrationSnapshot {
            projector_board: None,
            ..s
        })
        .collect();
    let plane = calibrator.calibrate_stereo_plane(&plane_snapshots, &extrinsics).unwrap();

    let full = calibrator.calibrate_depth_sensor(&snapshots()).unwrap();
    assert!((plane.plane.point - full.plane_projection.plane.point).length() < 1e-3);
    assert_eq!(plane.homography, full.plane_projection.homography);
}

#[test]
fn test_single_extrinsic_sensor() {
    init_logging();
    let config = config();
    let sensor = sensor(SensorKind::TimeOfFlight);
    let projector = ProjectorView::new(projector_device(), tracking_to_projector()).unwrap();
    let calibrator = DepthCalibrator::new(&projector, &sensor, &config.calibration);

    let depth = calibrator.calibrate_depth_sensor(&snapshots()).unwrap();
    let extrinsics = depth.extrinsics.unwrap();
    let color_to_depth = sensor.color_to_depth().unwrap();
    assert!(transform::max_difference(&extrinsics.matrix, &color_to_depth) < 1e-6);

    // Table at 1000 in the tracking frame, nudged 7 units away from the sensor.
    let plane = depth.plane_projection.plane;
    assert!((plane.normal - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
    assert!((plane.point.z - 1007.0).abs() < 1e-3);
}

#[test]
fn test_plane_parallel_to_projector_axis_is_invalid() {
    init_logging();
    let config = config();
    let sensor = sensor(SensorKind::TimeOfFlight);
    let projector = ProjectorView::new(projector_device(), tracking_to_projector()).unwrap();
    let calibrator = DepthCalibrator::new(&projector, &sensor, &config.calibration);

    // Board standing on its edge, its plane containing the projector's center.
    let standing = Mat4::from_rotation_translation(
        Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
        Vec3::new(50.0, -105.0, 500.0),
    );
    let snapshots = vec![CalibrationSnapshot::new(standing, tracking_to_projector() * standing)];

    let result = calibrator.calibrate_depth_sensor(&snapshots);
    assert!(matches!(result, Err(CalibrationError::NoIntersection { .. })));
}

#[test]
fn test_no_usable_snapshots() {
    init_logging();
    let config = config();
    let sensor = sensor(SensorKind::StructuredLight);
    let projector = ProjectorView::new(projector_device(), tracking_to_projector()).unwrap();
    let calibrator = DepthCalibrator::new(&projector, &sensor, &config.calibration);

    let camera_only: Vec<_> = snapshots()
        .into_iter()
        .map(|s| CalibrationSnapshot {
            depth_board: None,
            ..s
        })
        .collect();
    assert!(matches!(
        calibrator.calibrate_depth_sensor(&camera_only),
        Err(CalibrationError::NoUsableSnapshots { total: 3, .. })
    ));
}

#[test]
fn test_snapshot_batch_file() {
    let batch = SnapshotBatch {
        projector: projector_device(),
        sensor: sensor(SensorKind::StructuredLight),
        snapshots: snapshots(),
    };
    let path = std::env::temp_dir().join("procam_snapshot_batch.json");
    batch.save(&path).unwrap();
    let loaded = SnapshotBatch::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded, batch);
}

/// Detects nothing; poses are set by hand.
struct NoDetection;

impl PoseEstimator for NoDetection {
    type Frame = [u8];
    type Context = ();

    fn estimate(&mut self, _frame: &[u8], _context: &()) -> Option<Mat4> {
        None
    }
}

#[test]
fn test_board_seen_by_projector() {
    init_logging();
    let clock = Arc::new(ManualClock::new(0));
    let config = ProcamConfig::default();
    let board = MarkerBoard::new("a4", Vec2::new(297.0, 210.0), config.tracking, clock);
    board.register_camera("tracking", NoDetection);

    let projector = ProjectorView::new(projector_device(), tracking_to_projector()).unwrap();

    board
        .set_fake_location("tracking", Mat4::from_translation(Vec3::new(50.0, 0.0, 1000.0)))
        .unwrap();
    let px = board.board_location("tracking", &projector).unwrap().unwrap();
    assert!((px - Vec2::new(640.0, 400.0)).length() < 1e-3);
    assert!(board.is_seen_by("tracking", &projector, 0.0).unwrap());

    board.update_location("tracking", &[0u8; 16][..], &()).unwrap();
    assert!(board.is_seen_by("tracking", &projector, 0.0).unwrap());

    board
        .set_fake_location("tracking", Mat4::from_translation(Vec3::new(2000.0, 0.0, 1000.0)))
        .unwrap();
    assert!(!board.is_seen_by("tracking", &projector, 50.0).unwrap());
}
