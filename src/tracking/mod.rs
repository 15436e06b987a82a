//! Pan-motor tracking: turns a motion centroid into a motor move and the
//! number of frames the vision loop must skip while the camera swings.

mod motion;
mod planner;

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::devices::Motor;
use crate::error::Result;
use crate::worker::WorkerPool;

pub use motion::{horizontal_centroid, AreaFilter};
pub use planner::{MotorMove, TrackingConfig, TrackingState};

pub struct MotorTracker {
    config: TrackingConfig,
    frame_rate: u32,
    state: TrackingState,
    motor: Arc<dyn Motor>,
    // One thread: moves run in dispatch order and never overlap.
    dispatcher: WorkerPool,
    homed: bool,
}

impl MotorTracker {
    pub fn new(config: TrackingConfig, frame_rate: u32, motor: Arc<dyn Motor>) -> Result<Self> {
        let state = TrackingState::centered(config.neutral_angle);
        Ok(Self {
            config,
            frame_rate,
            state,
            motor,
            dispatcher: WorkerPool::new("motor", 1)?,
            homed: false,
        })
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    pub fn plan_track(&self, centroid_x: f64) -> MotorMove {
        let target = self
            .config
            .target_angle(centroid_x, self.state.previous_angle);
        self.config
            .plan(self.state.previous_angle, target, self.frame_rate)
    }

    pub fn plan_center(&self) -> MotorMove {
        self.config.plan(
            self.state.previous_angle,
            self.config.neutral_angle,
            self.frame_rate,
        )
    }

    /// Pan towards `centroid_x`. The move is dispatched without waiting.
    pub fn track(&mut self, centroid_x: f64, now: Instant) -> MotorMove {
        let mv = self.plan_track(centroid_x);
        debug!(
            "Tracking centroid {:.0}px: {:.1} -> {:.1}, {} frames lost",
            centroid_x, mv.from, mv.target, mv.lost_frames
        );
        self.dispatch(mv);
        self.state.previous_angle = mv.target;
        self.state.lost_frame_count = mv.lost_frames;
        self.state.last_move = Some(now);
        mv
    }

    /// Return to neutral and reset the tracking state. The first call always
    /// drives the motor since its physical position is unknown at startup.
    pub fn center(&mut self) -> MotorMove {
        let mut mv = self.plan_center();
        if !self.homed {
            mv = self
                .config
                .plan(self.config.min_angle, self.config.neutral_angle, self.frame_rate);
            self.homed = true;
        }
        let moved = self.dispatch(mv);
        self.reset();
        if moved {
            self.state.lost_frame_count = mv.lost_frames;
        }
        mv
    }

    /// Forget the tracking history without moving the motor.
    pub fn reset(&mut self) {
        self.state = TrackingState::centered(self.config.neutral_angle);
    }

    /// Discard at least `frames` upcoming frames.
    pub fn hold_frames(&mut self, frames: u32) {
        self.state.lost_frame_count = self.state.lost_frame_count.max(frames);
    }

    /// True when the current frame falls inside a settle window and must be dropped.
    pub fn take_lost_frame(&mut self) -> bool {
        if self.state.lost_frame_count > 0 {
            self.state.lost_frame_count -= 1;
            true
        } else {
            false
        }
    }

    pub fn last_move(&self) -> Option<Instant> {
        self.state.last_move
    }

    /// Block until every dispatched move has finished.
    pub fn wait_idle(&self) {
        self.dispatcher.wait_idle();
    }

    /// Returns false when the motor is already at the target.
    fn dispatch(&self, mv: MotorMove) -> bool {
        if !mv.moves_motor() {
            return false;
        }
        let motor = self.motor.clone();
        let pin = self.config.pin;
        self.dispatcher.spawn(
            format!("move {:.1}->{:.1}", mv.from, mv.target),
            move || {
                if let Err(e) = motor.move_to(mv.from, mv.target, pin) {
                    warn!("Motor move {:.1} -> {:.1} failed: {}", mv.from, mv.target, e);
                }
            },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMotor {
        moves: Mutex<Vec<(f64, f64, u8)>>,
    }

    impl Motor for RecordingMotor {
        fn move_to(&self, from: f64, angle: f64, pin: u8) -> Result<()> {
            self.moves.lock().unwrap().push((from, angle, pin));
            Ok(())
        }
    }

    fn tracker() -> (MotorTracker, Arc<RecordingMotor>) {
        let motor = Arc::new(RecordingMotor::default());
        let tracker = MotorTracker::new(TrackingConfig::default(), 30, motor.clone()).unwrap();
        (tracker, motor)
    }

    #[test]
    fn test_first_center_always_drives_motor() {
        let (mut tracker, motor) = tracker();
        tracker.center();
        tracker.center();
        tracker.wait_idle();
        let moves = motor.moves.lock().unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].1, 250.0);
    }

    #[test]
    fn test_track_updates_state_and_moves() {
        let (mut tracker, motor) = tracker();
        tracker.center();
        let now = Instant::now();
        let mv = tracker.track(480.0, now);
        tracker.wait_idle();

        assert_eq!(tracker.state().previous_angle, mv.target);
        assert_eq!(tracker.state().lost_frame_count, mv.lost_frames);
        assert_eq!(tracker.last_move(), Some(now));
        assert!(mv.target > 250.0);
        assert_eq!(motor.moves.lock().unwrap().last().unwrap().1, mv.target);
    }

    #[test]
    fn test_center_resets_state() {
        let (mut tracker, _motor) = tracker();
        tracker.center();
        tracker.track(20.0, Instant::now());
        let mv = tracker.center();
        assert_eq!(mv.target, 250.0);
        assert_eq!(tracker.state().previous_angle, 250.0);
        assert_eq!(tracker.last_move(), None);
        assert_eq!(tracker.state().lost_frame_count, mv.lost_frames);
    }

    #[test]
    fn test_reset_does_not_move() {
        let (mut tracker, motor) = tracker();
        tracker.center();
        tracker.track(450.0, Instant::now());
        tracker.wait_idle();
        let before = motor.moves.lock().unwrap().len();

        tracker.reset();
        tracker.wait_idle();
        assert_eq!(motor.moves.lock().unwrap().len(), before);
        assert_eq!(tracker.state(), &TrackingState::centered(250.0));
    }

    #[test]
    fn test_center_in_place_loses_no_frames() {
        let (mut tracker, _motor) = tracker();
        tracker.center();
        while tracker.take_lost_frame() {}
        tracker.center();
        assert_eq!(tracker.state().lost_frame_count, 0);
    }

    struct JammedMotor;

    impl Motor for JammedMotor {
        fn move_to(&self, _from: f64, _angle: f64, _pin: u8) -> Result<()> {
            Err(crate::error::Error::device("motor", "servo jammed"))
        }
    }

    #[test]
    fn test_motor_failure_keeps_tracking() {
        let mut tracker =
            MotorTracker::new(TrackingConfig::default(), 30, Arc::new(JammedMotor)).unwrap();
        assert!(tracker.center().moves_motor());
        let mv = tracker.track(480.0, Instant::now());
        tracker.wait_idle();

        assert_eq!(tracker.state().previous_angle, mv.target);
        assert!(tracker.center().moves_motor());
        tracker.wait_idle();
        assert_eq!(tracker.state().previous_angle, 250.0);
    }

    #[test]
    fn test_lost_frames_are_consumed() {
        let (mut tracker, _motor) = tracker();
        tracker.hold_frames(2);
        assert!(tracker.take_lost_frame());
        assert!(tracker.take_lost_frame());
        assert!(!tracker.take_lost_frame());
    }
}
