//! Projector-Camera Tracking
//!
//! Geometric core of interactive projection installations:
//! - Extrinsic calibration of projector, tracking camera and depth sensor
//! - Work-surface plane and screen homography
//! - Per-frame depth classification for touch and surface detection
//! - Marker board tracking with filtering and update windows

pub mod calibration;
pub mod config;
pub mod depth;
pub mod error;
pub mod export;
pub mod geometry;
pub mod tracking;
