//! Marker board tracking state machine.
//!
//! Each camera observing a board owns a pose estimator and a
//! [`TrackedBoardState`]: the filtered pose and the update mode with its hold
//! window. The estimator and the state sit behind separate locks, so readers
//! never wait for a detection to finish.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};
use parking_lot::{Mutex, RwLock};

use super::clock::Clock;
use super::filter::PoseFilter;
use crate::config::{FilterConfig, TrackingConfig};
use crate::error::{TrackingError, TrackingResult};
use crate::geometry::{transform, ProjectorView};

/// Device-specific marker detection.
///
/// Returns the board pose in the camera frame, or `None` when the board is
/// not found in the frame.
pub trait PoseEstimator: Send {
    type Frame: ?Sized;
    type Context: ?Sized;

    fn estimate(&mut self, frame: &Self::Frame, context: &Self::Context) -> Option<Mat4>;
}

/// Update policy of a (board, camera) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Every detection updates the pose.
    Normal,
    /// Detections are ignored until the hold window ends.
    BlockUpdate,
    /// Every detection updates the pose, bypassing drawing mode.
    ForceUpdate,
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateMode::Normal => write!(f, "Normal"),
            UpdateMode::BlockUpdate => write!(f, "Block Update"),
            UpdateMode::ForceUpdate => write!(f, "Force Update"),
        }
    }
}

/// Tracking state of a board for one camera.
#[derive(Debug)]
pub struct TrackedBoardState {
    /// Filtered board pose in the camera frame.
    pose: Mat4,
    last_update_ms: Option<u64>,
    /// End of the current hold window.
    next_event_ms: u64,
    mode: UpdateMode,
    last_position: Vec3,
    last_distance: f32,
    filter: Option<PoseFilter>,
    drawing_mode: bool,
    drawing_min_distance: f32,
}

impl TrackedBoardState {
    fn new(config: &TrackingConfig) -> Self {
        Self {
            pose: Mat4::IDENTITY,
            last_update_ms: None,
            next_event_ms: 0,
            mode: UpdateMode::Normal,
            last_position: Vec3::ZERO,
            last_distance: 0.0,
            filter: Some(PoseFilter::new(config.filter)),
            drawing_mode: false,
            drawing_min_distance: config.drawing_min_distance,
        }
    }

    pub fn pose(&self) -> Mat4 {
        self.pose
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn next_event_ms(&self) -> u64 {
        self.next_event_ms
    }

    pub fn last_update_ms(&self) -> Option<u64> {
        self.last_update_ms
    }

    pub fn last_distance(&self) -> f32 {
        self.last_distance
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    pub fn drawing_mode(&self) -> bool {
        self.drawing_mode
    }

    fn is_blocked(&self, now: u64) -> bool {
        self.mode == UpdateMode::BlockUpdate && now < self.next_event_ms
    }

    fn accept(&mut self, candidate: &Mat4, now: u64) {
        self.pose = match self.filter.as_mut() {
            Some(filter) => filter.filter(candidate, now),
            None => *candidate,
        };
        self.last_position = transform::translation(&self.pose);
        self.last_update_ms = Some(now);
    }
}

struct CameraTracker<E> {
    estimator: Mutex<E>,
    state: Mutex<TrackedBoardState>,
}

/// A physical marker board tracked by one or more cameras.
pub struct MarkerBoard<E: PoseEstimator> {
    name: String,
    /// Physical size of the board.
    size: Vec2,
    hold_duration_ms: u64,
    config: TrackingConfig,
    clock: Arc<dyn Clock>,
    cameras: RwLock<HashMap<String, Arc<CameraTracker<E>>>>,
    /// Held for the whole of `update_location`.
    updating: Mutex<()>,
}

impl<E: PoseEstimator> MarkerBoard<E> {
    pub fn new(
        name: impl Into<String>,
        size: Vec2,
        config: TrackingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            hold_duration_ms: config.hold_duration_ms,
            config,
            clock,
            cameras: RwLock::new(HashMap::new()),
            updating: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> Vec2 {
        self.size
    }

    /// Start tracking this board with `camera`, replacing any previous state.
    pub fn register_camera(&self, camera: impl Into<String>, estimator: E) {
        let camera = camera.into();
        log::info!("Board {} registered with camera {}", self.name, camera);
        let tracker = CameraTracker {
            estimator: Mutex::new(estimator),
            state: Mutex::new(TrackedBoardState::new(&self.config)),
        };
        self.cameras.write().insert(camera, Arc::new(tracker));
    }

    pub fn is_tracked_by(&self, camera: &str) -> bool {
        self.cameras.read().contains_key(camera)
    }

    /// Read the tracking state of a camera.
    pub fn inspect<R>(
        &self,
        camera: &str,
        f: impl FnOnce(&TrackedBoardState) -> R,
    ) -> TrackingResult<R> {
        let tracker = self.tracker(camera)?;
        let state = tracker.state.lock();
        Ok(f(&state))
    }

    fn with_state<R>(
        &self,
        camera: &str,
        f: impl FnOnce(&mut TrackedBoardState) -> R,
    ) -> TrackingResult<R> {
        let tracker = self.tracker(camera)?;
        let mut state = tracker.state.lock();
        Ok(f(&mut state))
    }

    fn tracker(&self, camera: &str) -> TrackingResult<Arc<CameraTracker<E>>> {
        self.cameras
            .read()
            .get(camera)
            .cloned()
            .ok_or_else(|| self.unregistered(camera))
    }

    fn unregistered(&self, camera: &str) -> TrackingError {
        TrackingError::UnregisteredCamera {
            board: self.name.clone(),
            camera: camera.to_string(),
        }
    }

    /// Replace the pose filter of a camera.
    pub fn set_filtering(&self, camera: &str, config: FilterConfig) -> TrackingResult<()> {
        self.with_state(camera, |state| state.filter = Some(PoseFilter::new(config)))
    }

    /// Use raw detections for a camera.
    pub fn remove_filtering(&self, camera: &str) -> TrackingResult<()> {
        self.with_state(camera, |state| state.filter = None)
    }

    /// In drawing mode the pose only follows moves larger than `min_distance`.
    pub fn set_drawing_mode(
        &self,
        camera: &str,
        enabled: bool,
        min_distance: f32,
    ) -> TrackingResult<()> {
        self.with_state(camera, |state| {
            state.drawing_mode = enabled;
            state.drawing_min_distance = min_distance;
        })
    }

    /// Freeze the pose for `duration_ms`.
    pub fn block_update(&self, camera: &str, duration_ms: u64) -> TrackingResult<()> {
        self.set_mode(camera, UpdateMode::BlockUpdate, duration_ms)
    }

    /// Accept every detection for `duration_ms`.
    pub fn force_update(&self, camera: &str, duration_ms: u64) -> TrackingResult<()> {
        self.set_mode(camera, UpdateMode::ForceUpdate, duration_ms)
    }

    fn set_mode(&self, camera: &str, mode: UpdateMode, duration_ms: u64) -> TrackingResult<()> {
        let now = self.clock.now_ms();
        self.with_state(camera, |state| {
            state.mode = mode;
            state.next_event_ms = now + duration_ms;
        })?;
        log::debug!("Board {} / {}: {} for {} ms", self.name, camera, mode, duration_ms);
        Ok(())
    }

    /// Run the camera's pose estimator on a frame and update the pose.
    ///
    /// Calls for the same board are serialized. The state is only locked
    /// around the update itself, not during detection.
    pub fn update_location(
        &self,
        camera: &str,
        frame: &E::Frame,
        context: &E::Context,
    ) -> TrackingResult<()> {
        let _updating = self.updating.lock();
        let tracker = self.tracker(camera)?;

        if tracker.state.lock().is_blocked(self.clock.now_ms()) {
            return Ok(());
        }

        let candidate = tracker.estimator.lock().estimate(frame, context);
        let Some(candidate) = candidate else {
            return Ok(());
        };

        let position = transform::translation(&candidate);
        if position.z == 0.0 {
            log::debug!("Board {} / {}: discarding pose at depth 0", self.name, camera);
            return Ok(());
        }

        let now = self.clock.now_ms();
        let mut state = tracker.state.lock();
        // A block requested while detecting still applies.
        if state.is_blocked(now) {
            return Ok(());
        }

        let distance = position.distance(state.last_position);
        state.last_distance = distance;

        if state.mode == UpdateMode::ForceUpdate && now < state.next_event_ms {
            state.accept(&candidate, now);
            return Ok(());
        }

        if state.mode != UpdateMode::Normal {
            log::debug!("Board {} / {}: {} ended", self.name, camera, state.mode);
            state.mode = UpdateMode::Normal;
        }

        if state.drawing_mode {
            if distance > state.drawing_min_distance {
                state.accept(&candidate, now);
                state.mode = UpdateMode::ForceUpdate;
                state.next_event_ms = now + self.hold_duration_ms;
            }
        } else {
            state.accept(&candidate, now);
        }
        Ok(())
    }

    /// Whether the pose may change; false during a block window.
    pub fn is_moving(&self, camera: &str) -> TrackingResult<bool> {
        let now = self.clock.now_ms();
        self.inspect(camera, |state| !state.is_blocked(now))
    }

    /// Filtered board pose in the camera frame.
    pub fn pose(&self, camera: &str) -> TrackingResult<Mat4> {
        self.inspect(camera, |state| state.pose)
    }

    /// Override the pose, bypassing detection and filtering.
    pub fn set_fake_location(&self, camera: &str, pose: Mat4) -> TrackingResult<()> {
        self.with_state(camera, |state| {
            state.pose = pose;
            state.last_position = transform::translation(&pose);
        })
    }

    pub fn last_movement_distance(&self, camera: &str) -> TrackingResult<f32> {
        self.inspect(camera, |state| state.last_distance)
    }

    /// Pose of this board expressed in the frame of `other`, both seen by `camera`.
    pub fn pose_relative_to<F: PoseEstimator>(
        &self,
        camera: &str,
        other: &MarkerBoard<F>,
    ) -> TrackingResult<Mat4> {
        let mine = self.pose(camera)?;
        let theirs = other.pose(camera)?;
        let inverse = transform::try_invert(&theirs).map_err(|_| TrackingError::SingularPose {
            board: other.name.clone(),
        })?;
        Ok(inverse * mine)
    }

    /// Pixel position of the board origin on a projector.
    ///
    /// The camera frame is taken as the projector's tracking frame. `None`
    /// when the origin is behind the projector.
    pub fn board_location(
        &self,
        camera: &str,
        view: &ProjectorView,
    ) -> TrackingResult<Option<Vec2>> {
        let position = transform::translation(&self.pose(camera)?);
        Ok(view.to_pixel(position))
    }

    /// Whether the board origin lands on the projector image, with `margin`
    /// pixels of tolerance on every side.
    pub fn is_seen_by(
        &self,
        camera: &str,
        view: &ProjectorView,
        margin: f32,
    ) -> TrackingResult<bool> {
        let Some(px) = self.board_location(camera, view)? else {
            return Ok(false);
        };
        let width = view.width() as f32;
        let height = view.height() as f32;
        Ok(px.x >= -margin && px.x <= width + margin && px.y >= -margin && px.y <= height + margin)
    }
}

impl<E: PoseEstimator> std::fmt::Display for MarkerBoard<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MarkerBoard {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ProjectiveDevice;
    use crate::tracking::ManualClock;

    /// Returns the pose it is handed.
    struct Replay;

    impl PoseEstimator for Replay {
        type Frame = Mat4;
        type Context = ();

        fn estimate(&mut self, frame: &Mat4, _context: &()) -> Option<Mat4> {
            Some(*frame)
        }
    }

    fn at(x: f32, y: f32, z: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, y, z))
    }

    fn board(clock: &Arc<ManualClock>) -> MarkerBoard<Replay> {
        let board = MarkerBoard::new(
            "a4-board",
            Vec2::new(297.0, 210.0),
            TrackingConfig::default(),
            clock.clone(),
        );
        board.register_camera("cam", Replay);
        board.remove_filtering("cam").unwrap();
        board
    }

    #[test]
    fn test_unregistered_camera() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(&clock);

        let err = board.update_location("other", &at(0.0, 0.0, 500.0), &()).unwrap_err();
        assert_eq!(
            err,
            TrackingError::UnregisteredCamera {
                board: "a4-board".to_string(),
                camera: "other".to_string()
            }
        );
        assert!(board.is_moving("other").is_err());
        assert!(!board.is_tracked_by("other"));
        assert!(board.is_tracked_by("cam"));
    }

    #[test]
    fn test_normal_update() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(&clock);

        board.update_location("cam", &at(10.0, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(10.0, 0.0, 500.0));
        assert!((board.last_movement_distance("cam").unwrap() - 500.1).abs() < 0.1);
        assert_eq!(board.inspect("cam", |s| s.last_update_ms()).unwrap(), Some(0));
    }

    #[test]
    fn test_zero_depth_pose_is_discarded() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(&clock);

        board.update_location("cam", &at(1.0, 2.0, 0.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), Mat4::IDENTITY);
    }

    #[test]
    fn test_block_update_window() {
        let clock = Arc::new(ManualClock::new(1000));
        let board = board(&clock);
        board.update_location("cam", &at(0.0, 0.0, 500.0), &()).unwrap();

        board.block_update("cam", 500).unwrap();
        assert!(!board.is_moving("cam").unwrap());

        clock.advance(100);
        board.update_location("cam", &at(50.0, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(0.0, 0.0, 500.0));

        clock.advance(300);
        board.update_location("cam", &at(60.0, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(0.0, 0.0, 500.0));

        clock.advance(100);
        assert!(board.is_moving("cam").unwrap());
        board.update_location("cam", &at(70.0, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(70.0, 0.0, 500.0));
        assert_eq!(board.inspect("cam", |s| s.mode()).unwrap(), UpdateMode::Normal);
    }

    #[test]
    fn test_drawing_mode_holds_small_moves() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(&clock);
        board.set_fake_location("cam", at(0.0, 0.0, 500.0)).unwrap();
        board.set_drawing_mode("cam", true, 2.0).unwrap();

        board.update_location("cam", &at(1.0, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(0.0, 0.0, 500.0));
        assert!((board.last_movement_distance("cam").unwrap() - 1.0).abs() < 1e-5);

        board.update_location("cam", &at(10.0, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(10.0, 0.0, 500.0));
        assert_eq!(board.inspect("cam", |s| s.mode()).unwrap(), UpdateMode::ForceUpdate);
        assert_eq!(board.inspect("cam", |s| s.next_event_ms()).unwrap(), 1000);

        // Inside the force window small moves are followed.
        clock.advance(200);
        board.update_location("cam", &at(10.5, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(10.5, 0.0, 500.0));

        // After it, drawing mode applies again.
        clock.advance(1000);
        board.update_location("cam", &at(11.0, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(10.5, 0.0, 500.0));
        assert_eq!(board.inspect("cam", |s| s.mode()).unwrap(), UpdateMode::Normal);
    }

    #[test]
    fn test_filtered_update_smooths_jump() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(&clock);
        board.set_filtering("cam", FilterConfig::default()).unwrap();

        board.update_location("cam", &at(0.0, 0.0, 500.0), &()).unwrap();
        clock.advance(33);
        board.update_location("cam", &at(100.0, 0.0, 500.0), &()).unwrap();

        let x = transform::translation(&board.pose("cam").unwrap()).x;
        assert!(x > 0.0 && x < 100.0);
        assert!(board.inspect("cam", |s| s.is_filtered()).unwrap());
    }

    #[test]
    fn test_is_seen_by_margin() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(&clock);
        let device = ProjectiveDevice::new(640, 480, 500.0, 500.0, 320.0, 240.0);
        let view = ProjectorView::new(device, Mat4::IDENTITY).unwrap();

        // Projects to x = -10.
        board.set_fake_location("cam", at(-660.0, 0.0, 1000.0)).unwrap();
        assert!(board.is_seen_by("cam", &view, 10.0).unwrap());
        assert!(!board.is_seen_by("cam", &view, 9.0).unwrap());

        // Projects to x = 650.
        board.set_fake_location("cam", at(660.0, 0.0, 1000.0)).unwrap();
        assert!(board.is_seen_by("cam", &view, 10.0).unwrap());
        assert!(!board.is_seen_by("cam", &view, 9.0).unwrap());

        board.set_fake_location("cam", at(0.0, 0.0, -1000.0)).unwrap();
        assert!(!board.is_seen_by("cam", &view, 1000.0).unwrap());
    }

    #[test]
    fn test_pose_relative_to() {
        let clock = Arc::new(ManualClock::new(0));
        let a = board(&clock);
        let b = board(&clock);
        a.set_fake_location("cam", at(100.0, 0.0, 500.0)).unwrap();
        b.set_fake_location("cam", at(40.0, 10.0, 500.0)).unwrap();

        let relative = a.pose_relative_to("cam", &b).unwrap();
        assert!((transform::translation(&relative) - Vec3::new(60.0, -10.0, 0.0)).length() < 1e-4);
        assert!(a.pose_relative_to("cam", &a).is_ok());
    }

    #[test]
    fn test_force_update_window() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(&clock);
        board.set_fake_location("cam", at(0.0, 0.0, 500.0)).unwrap();
        board.set_drawing_mode("cam", true, 50.0).unwrap();

        board.force_update("cam", 300).unwrap();
        assert_eq!(board.inspect("cam", |s| s.mode()).unwrap(), UpdateMode::ForceUpdate);
        assert_eq!(board.inspect("cam", |s| s.next_event_ms()).unwrap(), 300);
        assert!(board.is_moving("cam").unwrap());

        // Small moves are followed despite drawing mode.
        clock.advance(100);
        board.update_location("cam", &at(1.0, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(1.0, 0.0, 500.0));
        assert!(board.is_moving("cam").unwrap());

        clock.advance(200);
        board.update_location("cam", &at(2.0, 0.0, 500.0), &()).unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(1.0, 0.0, 500.0));
        assert_eq!(board.inspect("cam", |s| s.mode()).unwrap(), UpdateMode::Normal);
        assert!(board.is_moving("cam").unwrap());
    }

    /// Signals when detection starts, then takes `delay` to answer.
    struct SlowDetector {
        started: std::sync::mpsc::Sender<()>,
        delay: std::time::Duration,
    }

    impl PoseEstimator for SlowDetector {
        type Frame = Mat4;
        type Context = ();

        fn estimate(&mut self, frame: &Mat4, _context: &()) -> Option<Mat4> {
            let _ = self.started.send(());
            std::thread::sleep(self.delay);
            Some(*frame)
        }
    }

    fn slow_board(
        clock: &Arc<ManualClock>,
    ) -> (Arc<MarkerBoard<SlowDetector>>, std::sync::mpsc::Receiver<()>) {
        let (started, rx) = std::sync::mpsc::channel();
        let board = MarkerBoard::new(
            "slow-board",
            Vec2::new(297.0, 210.0),
            TrackingConfig::default(),
            clock.clone(),
        );
        board.register_camera(
            "cam",
            SlowDetector {
                started,
                delay: std::time::Duration::from_millis(300),
            },
        );
        board.remove_filtering("cam").unwrap();
        (Arc::new(board), rx)
    }

    #[test]
    fn test_readers_do_not_wait_for_detection() {
        let clock = Arc::new(ManualClock::new(0));
        let (board, started) = slow_board(&clock);

        let worker = {
            let board = Arc::clone(&board);
            std::thread::spawn(move || board.update_location("cam", &at(5.0, 0.0, 500.0), &()))
        };
        started.recv().unwrap();

        let begin = std::time::Instant::now();
        assert!(board.is_moving("cam").unwrap());
        assert_eq!(board.pose("cam").unwrap(), Mat4::IDENTITY);
        board.set_drawing_mode("cam", false, 2.0).unwrap();
        assert!(begin.elapsed() < std::time::Duration::from_millis(150));

        worker.join().unwrap().unwrap();
        assert_eq!(board.pose("cam").unwrap(), at(5.0, 0.0, 500.0));
    }

    #[test]
    fn test_block_requested_during_detection_applies() {
        let clock = Arc::new(ManualClock::new(0));
        let (board, started) = slow_board(&clock);

        let worker = {
            let board = Arc::clone(&board);
            std::thread::spawn(move || board.update_location("cam", &at(5.0, 0.0, 500.0), &()))
        };
        started.recv().unwrap();
        board.block_update("cam", 500).unwrap();

        worker.join().unwrap().unwrap();
        assert_eq!(board.pose("cam").unwrap(), Mat4::IDENTITY);
        assert!(!board.is_moving("cam").unwrap());
    }
}
