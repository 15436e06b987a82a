//! Recording mode state machine.
//!
//! One control thread alternates between two modes, re-sampling the ignition
//! whenever a mode ends:
//!
//! * ignition on: continuous recording, cut into segments of bounded length;
//! * ignition off: sentry mode, which watches the camera feed, pans towards
//!   motion and records while something is moving.
//!
//! Finished recordings are handed to the [`TranscodePipeline`] without
//! waiting. Each decision is a pure function in [`decision`]; this module only
//! wires those decisions to the devices.

mod decision;
mod session;

use chrono::Local;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::devices::{Camera, CaptureSettings, Clock, IgnitionSensor, MotionDetector};
use crate::tracking::{horizontal_centroid, AreaFilter, MotorTracker};
use crate::transcode::TranscodePipeline;

pub use decision::{
    decide_segment, decide_sentry, SegmentAction, SentryAction, SentryObservation, StopReason,
};
pub use session::{RecordingMode, RecordingSession};

/// Consecutive capture failures after which sentry mode gives up and the
/// ignition is sampled again.
const MAX_FRAME_ERRORS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    ReadIgnition,
    IgnitionRecording,
    SentryWatching,
    SentryRecording,
    Stopped,
}

/// The slice of [`AppConfig`] the control loop reads.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub capture: CaptureSettings,
    pub segment_length: Duration,
    pub poll_interval: Duration,
    pub warmup: Duration,
    pub min_retention: Duration,
    pub initial_discard_frames: u32,
    pub ignition_dir: PathBuf,
    pub sentry_dir: PathBuf,
    pub area_filter: AreaFilter,
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let recording = &config.recording;
        Self {
            capture: CaptureSettings {
                width: recording.width,
                height: recording.height,
                frame_rate: recording.frame_rate,
                bitrate: recording.bitrate,
            },
            segment_length: recording.segment_length(),
            poll_interval: recording.poll_interval(),
            warmup: recording.warmup(),
            min_retention: config.sentry.min_retention(),
            initial_discard_frames: config.sentry.initial_discard_frames,
            ignition_dir: recording.ignition_dir.clone(),
            sentry_dir: recording.sentry_dir.clone(),
            area_filter: AreaFilter::from(&config.motion),
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.capture.frame_rate.max(1) as f64)
    }
}

pub struct RecordingController<C, D>
where
    C: Camera,
    D: MotionDetector<C::Frame>,
{
    settings: ControllerSettings,
    camera: C,
    detector: D,
    ignition: Box<dyn IgnitionSensor>,
    tracker: MotorTracker,
    pipeline: Arc<TranscodePipeline>,
    clock: Arc<dyn Clock>,
    state: ControllerState,
}

impl<C, D> RecordingController<C, D>
where
    C: Camera,
    D: MotionDetector<C::Frame>,
{
    pub fn new(
        settings: ControllerSettings,
        camera: C,
        detector: D,
        ignition: Box<dyn IgnitionSensor>,
        tracker: MotorTracker,
        pipeline: Arc<TranscodePipeline>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            camera,
            detector,
            ignition,
            tracker,
            pipeline,
            clock,
            state: ControllerState::ReadIgnition,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn tracker(&self) -> &MotorTracker {
        &self.tracker
    }

    /// Run until `shutdown` is set, then finish the current recording, park
    /// the motor and drain the background conversions.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!("Recorder started");
        self.recenter();

        while !shutdown.load(Ordering::SeqCst) {
            self.set_state(ControllerState::ReadIgnition);
            if self.ignition.read_ignition() {
                self.run_ignition_segment(shutdown);
            } else {
                self.run_sentry(shutdown);
            }
        }

        self.recenter();
        self.tracker.wait_idle();
        self.pipeline.wait_idle();
        self.set_state(ControllerState::Stopped);
        info!("Recorder stopped");
    }

    /// Record one segment. Returns when the ignition goes off, the segment
    /// is full or shutdown is requested.
    pub fn run_ignition_segment(&mut self, shutdown: &AtomicBool) {
        self.set_state(ControllerState::IgnitionRecording);
        self.recenter();
        if !self.open_camera() {
            return;
        }

        let session = match self.start_session(RecordingMode::Ignition) {
            Some(session) => session,
            None => {
                self.camera.close();
                self.clock.sleep(self.settings.poll_interval);
                return;
            }
        };

        let reason = loop {
            self.clock.sleep(self.settings.poll_interval);
            if shutdown.load(Ordering::SeqCst) {
                break StopReason::Shutdown;
            }
            let ignition_on = self.ignition.read_ignition();
            let elapsed = self
                .clock
                .now()
                .saturating_duration_since(session.started);
            if let SegmentAction::Stop(reason) =
                decide_segment(ignition_on, elapsed, self.settings.segment_length)
            {
                break reason;
            }
        };

        self.finish_session(session, reason);
        self.camera.close();
    }

    /// Watch for motion with the ignition off. Returns when the ignition comes
    /// on, the camera keeps failing or shutdown is requested.
    pub fn run_sentry(&mut self, shutdown: &AtomicBool) {
        self.set_state(ControllerState::SentryWatching);
        self.recenter();
        if !self.open_camera() {
            return;
        }
        self.tracker.hold_frames(self.settings.initial_discard_frames);
        self.detector.reset();

        let mut session: Option<RecordingSession> = None;
        let mut frame_errors = 0;

        loop {
            if shutdown.load(Ordering::SeqCst) {
                if let Some(session) = session.take() {
                    self.finish_session(session, StopReason::Shutdown);
                }
                break;
            }

            let frame = match self.camera.capture_frame() {
                Ok(frame) => {
                    frame_errors = 0;
                    frame
                }
                Err(e) => {
                    frame_errors += 1;
                    warn!("Frame capture failed ({}/{}): {}", frame_errors, MAX_FRAME_ERRORS, e);
                    if frame_errors >= MAX_FRAME_ERRORS {
                        if let Some(session) = session.take() {
                            self.finish_session(session, StopReason::CameraFault);
                        }
                        break;
                    }
                    self.clock.sleep(self.settings.frame_interval());
                    continue;
                }
            };

            if self.tracker.take_lost_frame() {
                continue;
            }

            let boxes = self.detector.detect(&frame);
            let qualifying = self.settings.area_filter.qualifying(&boxes);
            let centroid = horizontal_centroid(&qualifying);
            let now = self.clock.now();
            let observation = SentryObservation {
                ignition_on: self.ignition.read_ignition(),
                motion: centroid.is_some(),
                since_last_move: if centroid.is_some() {
                    Some(Duration::ZERO)
                } else {
                    self.tracker
                        .last_move()
                        .map(|at| now.saturating_duration_since(at))
                },
            };

            match decide_sentry(session.is_some(), &observation, self.settings.min_retention) {
                SentryAction::Idle => {}
                SentryAction::Yield => {
                    info!("Ignition on, leaving sentry mode");
                    break;
                }
                SentryAction::StartRecording => {
                    if let Some(x) = centroid {
                        self.track(x, now);
                    }
                    session = self.start_session(RecordingMode::Sentry);
                    if session.is_some() {
                        self.set_state(ControllerState::SentryRecording);
                    }
                }
                SentryAction::Keep => {
                    if let Some(x) = centroid {
                        self.track(x, now);
                    }
                }
                SentryAction::Stop => {
                    if let Some(session) = session.take() {
                        self.finish_session(session, StopReason::Quiet);
                    }
                    self.set_state(ControllerState::SentryWatching);
                }
                SentryAction::StopAndYield => {
                    if let Some(session) = session.take() {
                        self.finish_session(session, StopReason::IgnitionOn);
                    }
                    info!("Ignition on, leaving sentry mode");
                    break;
                }
            }
        }

        self.recenter();
        self.camera.close();
    }

    fn track(&mut self, centroid_x: f64, now: std::time::Instant) {
        self.tracker.track(centroid_x, now);
        // The scene shifted with the camera; stale background would read as motion.
        self.detector.reset();
    }

    /// Park the motor at neutral. A camera that actually moved invalidates
    /// the detector's background model.
    fn recenter(&mut self) {
        if self.tracker.center().moves_motor() {
            self.detector.reset();
        }
    }

    fn open_camera(&mut self) -> bool {
        match self.camera.open(&self.settings.capture) {
            Ok(()) => {
                self.clock.sleep(self.settings.warmup);
                true
            }
            Err(e) => {
                warn!("Could not open camera: {}", e);
                self.clock.sleep(self.settings.poll_interval);
                false
            }
        }
    }

    /// Register the file for conversion, then start writing it.
    fn start_session(&mut self, mode: RecordingMode) -> Option<RecordingSession> {
        let dir = match mode {
            RecordingMode::Ignition => &self.settings.ignition_dir,
            RecordingMode::Sentry => &self.settings.sentry_dir,
        };
        if let Err(e) = fs::create_dir_all(dir) {
            error!("Cannot create {}: {}", dir.display(), e);
            return None;
        }

        let session = RecordingSession::new(mode, dir, Local::now(), self.clock.now());
        let registered = match self.pipeline.register(&session.item) {
            Ok(()) => true,
            Err(e) => {
                error!("Could not register {} for conversion: {}", session.item, e);
                false
            }
        };

        if let Err(e) = self.camera.start_recording(&session.file_path()) {
            error!("Could not start {} recording: {}", mode, e);
            if registered {
                if let Err(e) = self.pipeline.unregister(&session.item) {
                    warn!("Could not unregister {}: {}", session.item, e);
                }
            }
            return None;
        }

        info!("Started {} recording {}", mode, session.file_path().display());
        Some(session)
    }

    /// Stop the camera and hand the file to the transcode pipeline.
    fn finish_session(&mut self, session: RecordingSession, reason: StopReason) {
        if let Err(e) = self.camera.stop_recording() {
            warn!("Stopping {} recording failed: {}", session.mode, e);
        }
        let duration = self
            .clock
            .now()
            .saturating_duration_since(session.started);
        info!(
            "Stopped {} recording {} after {:.1}s ({:?})",
            session.mode,
            session.item,
            duration.as_secs_f64(),
            reason
        );
        self.recenter();

        match self.pipeline.submit(session.item.clone()) {
            Ok(_detached) => debug!("Queued {} for conversion", session.item),
            Err(e) => error!("Could not queue {} for conversion: {}", session.item, e),
        }
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state != state {
            debug!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}
