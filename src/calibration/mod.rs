//! Calibration module: work-surface plane, screen homography and extrinsics.

mod extrinsic;
mod homography;
mod plane;
mod projection;
mod snapshot;

pub use extrinsic::{
    average_camera_plane, average_depth_plane, compute_extrinsics,
    compute_projector_camera_extrinsics, compute_screen_paper_intersection, DepthCalibration,
    DepthCalibrator, ExtrinsicCalibration,
};
pub use homography::HomographyModel;
pub use plane::{
    is_inside_unit_square, PlaneAccumulator, PlaneModel, PlaneSide, DEFAULT_PLANE_HEIGHT,
};
pub use projection::PlaneAndProjection;
pub use snapshot::{CalibrationSnapshot, SnapshotBatch};
