//! Export module for calibration data.
//!
//! The format is chosen from the file extension: `.json` is pretty JSON,
//! `.bin` and `.calib` are bincode.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::calibration::{ExtrinsicCalibration, PlaneAndProjection};
use crate::error::ExportError;

/// Tracking camera -> projector extrinsics.
pub const PROJECTOR_EXTRINSICS_FILE: &str = "camera_projector.json";
/// Tracking camera -> depth sensor extrinsics.
pub const DEPTH_EXTRINSICS_FILE: &str = "camera_depth.json";
/// Work-surface plane and screen homography.
pub const PLANE_PROJECTION_FILE: &str = "plane_projection.json";

/// Encoding of a calibration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationFormat {
    Json,
    Binary,
}

impl CalibrationFormat {
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(CalibrationFormat::Json),
            "bin" | "calib" => Ok(CalibrationFormat::Binary),
            _ => Err(ExportError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Save a calibration blob, replacing the file only once it is fully written.
pub fn save_calibration<T: Serialize>(value: &T, path: &Path) -> Result<(), ExportError> {
    let bytes = match CalibrationFormat::from_path(path)? {
        CalibrationFormat::Json => serde_json::to_string_pretty(value)?.into_bytes(),
        CalibrationFormat::Binary => bincode::serialize(value)?,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;

    log::info!("Saved calibration: {}", path.display());
    Ok(())
}

/// Load a calibration blob.
pub fn load_calibration<T: DeserializeOwned>(path: &Path) -> Result<T, ExportError> {
    let format = CalibrationFormat::from_path(path)?;
    let bytes = std::fs::read(path)?;
    let value = match format {
        CalibrationFormat::Json => serde_json::from_slice(&bytes)?,
        CalibrationFormat::Binary => bincode::deserialize(&bytes)?,
    };
    log::debug!("Loaded calibration: {}", path.display());
    Ok(value)
}

/// Per-user directory holding the calibration files of an installation.
pub fn default_calibration_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("procam-tracking"))
}

/// The calibration files of one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationFiles {
    dir: PathBuf,
}

impl CalibrationFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn projector_extrinsics_path(&self) -> PathBuf {
        self.dir.join(PROJECTOR_EXTRINSICS_FILE)
    }

    pub fn depth_extrinsics_path(&self) -> PathBuf {
        self.dir.join(DEPTH_EXTRINSICS_FILE)
    }

    pub fn plane_projection_path(&self) -> PathBuf {
        self.dir.join(PLANE_PROJECTION_FILE)
    }

    pub fn save_projector_extrinsics(
        &self,
        extrinsics: &ExtrinsicCalibration,
    ) -> Result<(), ExportError> {
        save_calibration(extrinsics, &self.projector_extrinsics_path())
    }

    pub fn load_projector_extrinsics(&self) -> Result<ExtrinsicCalibration, ExportError> {
        load_calibration(&self.projector_extrinsics_path())
    }

    pub fn save_depth_extrinsics(
        &self,
        extrinsics: &ExtrinsicCalibration,
    ) -> Result<(), ExportError> {
        save_calibration(extrinsics, &self.depth_extrinsics_path())
    }

    pub fn load_depth_extrinsics(&self) -> Result<ExtrinsicCalibration, ExportError> {
        load_calibration(&self.depth_extrinsics_path())
    }

    pub fn save_plane_projection(&self, plane: &PlaneAndProjection) -> Result<(), ExportError> {
        save_calibration(plane, &self.plane_projection_path())
    }

    pub fn load_plane_projection(&self) -> Result<PlaneAndProjection, ExportError> {
        load_calibration(&self.plane_projection_path())
    }
}
