//! Projector-Camera Tracking
//!
//! Batch calibration from a captured snapshot file.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use procam_tracking::calibration::{
    compute_projector_camera_extrinsics, DepthCalibration, DepthCalibrator, SnapshotBatch,
};
use procam_tracking::config::ProcamConfig;
use procam_tracking::depth::SensorKind;
use procam_tracking::export::{default_calibration_dir, CalibrationFiles};
use procam_tracking::geometry::ProjectorView;

/// Compute projector, depth sensor and work-surface calibrations.
#[derive(Debug, Parser)]
#[command(name = "procam-calibrate", version)]
struct Args {
    /// JSON snapshot batch (projector, sensor and board poses).
    #[arg(long)]
    snapshots: PathBuf,

    /// JSON configuration. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory. Defaults to the per-user configuration directory.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Recompute only the plane, reusing the saved extrinsics.
    #[arg(long)]
    plane_only: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(Args::parse()) {
        log::error!("Calibration failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => ProcamConfig::load(path)?,
        None => ProcamConfig::default(),
    };
    let out = args
        .out
        .or_else(default_calibration_dir)
        .ok_or("no output directory given and no configuration directory available")?;
    let files = CalibrationFiles::new(out);

    let batch = SnapshotBatch::load(&args.snapshots)?;
    log::info!(
        "Loaded {} snapshot(s) for a {} sensor",
        batch.snapshots.len(),
        batch.sensor.kind
    );

    let projector_extrinsics = if args.plane_only {
        files.load_projector_extrinsics()?
    } else {
        compute_projector_camera_extrinsics(&batch.snapshots)?
    };
    let projector = ProjectorView::new(batch.projector, projector_extrinsics.matrix)?;
    let calibrator = DepthCalibrator::new(&projector, &batch.sensor, &config.calibration);

    let depth = match (args.plane_only, batch.sensor.kind) {
        (true, SensorKind::StructuredLight) => {
            let persisted = files.load_depth_extrinsics()?;
            DepthCalibration {
                extrinsics: None,
                plane_projection: calibrator.calibrate_stereo_plane(&batch.snapshots, &persisted)?,
            }
        }
        (true, SensorKind::TimeOfFlight) => DepthCalibration {
            extrinsics: None,
            ..calibrator.calibrate_single_extrinsic(&batch.snapshots)?
        },
        (false, _) => calibrator.calibrate_depth_sensor(&batch.snapshots)?,
    };

    // Nothing is written until every step has succeeded.
    if !args.plane_only {
        files.save_projector_extrinsics(&projector_extrinsics)?;
    }
    if let Some(extrinsics) = &depth.extrinsics {
        files.save_depth_extrinsics(extrinsics)?;
    }
    files.save_plane_projection(&depth.plane_projection)?;

    log::info!("Calibration written to {}", files.dir().display());
    Ok(())
}
