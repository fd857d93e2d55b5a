//! Error types for calibration, tracking and persistence.

use thiserror::Error;

/// Result type alias for calibration operations.
pub type CalibrationResult<T> = Result<T, CalibrationError>;

/// Errors raised while computing extrinsics, planes or homographies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// No snapshot in the batch carried the fields this step needs.
    #[error("No usable snapshots for {step} (got {total} snapshot(s))")]
    NoUsableSnapshots { step: &'static str, total: usize },
    /// A projector ray missed the work surface while building the homography.
    #[error("Screen sample ({u}, {v}) does not intersect the plane")]
    NoIntersection { u: f32, v: f32 },
    /// A transform required to be invertible is singular.
    #[error("Transform is singular, cannot invert")]
    SingularTransform,
    /// Averaged plane normals cancelled out.
    #[error("Plane normals cancel out, cannot average")]
    DegeneratePlane,
    /// The homography solver could not produce a usable matrix.
    #[error("Degenerate homography: {0}")]
    DegenerateHomography(String),
}

/// Errors raised when a sensor frame cannot be analysed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{modality} frame has {actual} bytes, expected {expected}")]
    BufferSize {
        modality: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Result type alias for marker tracking operations.
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Errors raised by the marker tracker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    #[error("The board {board} is not registered with camera {camera}")]
    UnregisteredCamera { board: String, camera: String },
    #[error("The pose of board {board} is singular")]
    SingularPose { board: String },
}

/// Errors raised while saving or loading calibration files.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Binary encoding error: {0}")]
    Binary(#[from] bincode::Error),
    #[error("Unsupported calibration file extension: {0}")]
    UnsupportedFormat(String),
}
