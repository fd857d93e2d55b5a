//! Tracking module: marker board poses with filtering and update windows.

mod board;
mod clock;
mod filter;

pub use board::{MarkerBoard, PoseEstimator, TrackedBoardState, UpdateMode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use filter::{OneEuroFilter, PoseFilter, POSE_COMPONENTS};
