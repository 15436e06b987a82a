use std::time::{Duration, Instant};

use crate::config::{MotionConfig, MotorConfig};

/// Geometry and timing of the pan motor, in the driver's own angle units.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub neutral_angle: f64,
    pub min_angle: f64,
    pub max_angle: f64,
    /// Driver units per pixel of offset from the frame centre.
    pub scale: f64,
    pub bucket_px: f64,
    /// Horizontal centre of the resized frame.
    pub frame_center_px: f64,
    pub step_units: f64,
    pub step_secs: f64,
    pub settle_frames: u32,
    pub pin: u8,
}

impl TrackingConfig {
    pub fn new(motor: &MotorConfig, motion: &MotionConfig) -> Self {
        Self {
            neutral_angle: motor.neutral_angle,
            min_angle: motor.min_angle,
            max_angle: motor.max_angle,
            scale: motor.scale,
            bucket_px: motor.bucket_px,
            frame_center_px: motion.frame_width as f64 / 2.0,
            step_units: motor.step_units,
            step_secs: motor.step_secs,
            settle_frames: motor.settle_frames,
            pin: motor.pin,
        }
    }

    pub fn bucket(&self, centroid_x: f64) -> f64 {
        (centroid_x / self.bucket_px).floor() * self.bucket_px
    }

    pub fn clamp(&self, angle: f64) -> f64 {
        angle.clamp(self.min_angle, self.max_angle)
    }

    /// Absolute angle that brings `centroid_x` towards the frame centre.
    pub fn target_angle(&self, centroid_x: f64, previous_angle: f64) -> f64 {
        let delta = (self.bucket(centroid_x) - self.frame_center_px) * self.scale;
        self.clamp(previous_angle + delta)
    }

    /// The driver sweeps `step_units` every `step_secs`; partial steps are not taken.
    pub fn travel_time(&self, from: f64, to: f64) -> Duration {
        let steps = ((to - from).abs() / self.step_units).floor();
        Duration::from_secs_f64(steps * self.step_secs)
    }

    pub fn lost_frames(&self, travel_time: Duration, frame_rate: u32) -> u32 {
        (travel_time.as_secs_f64() * frame_rate as f64).floor() as u32 + self.settle_frames
    }

    pub fn plan(&self, from: f64, target: f64, frame_rate: u32) -> MotorMove {
        let target = self.clamp(target);
        let travel_time = self.travel_time(from, target);
        MotorMove {
            from,
            target,
            travel_time,
            lost_frames: self.lost_frames(travel_time, frame_rate),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::new(&MotorConfig::default(), &MotionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorMove {
    pub from: f64,
    pub target: f64,
    pub travel_time: Duration,
    /// Frames to throw away while the camera is still panning.
    pub lost_frames: u32,
}

impl MotorMove {
    /// False for a move that ends where it starts.
    pub fn moves_motor(&self) -> bool {
        (self.target - self.from).abs() >= f64::EPSILON
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingState {
    pub previous_angle: f64,
    pub lost_frame_count: u32,
    pub last_move: Option<Instant>,
}

impl TrackingState {
    pub fn centered(neutral_angle: f64) -> Self {
        Self {
            previous_angle: neutral_angle,
            lost_frame_count: 0,
            last_move: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_floors_to_ten_pixels() {
        let config = TrackingConfig::default();
        assert_eq!(config.bucket(260.0), 260.0);
        assert_eq!(config.bucket(269.9), 260.0);
        assert_eq!(config.bucket(3.0), 0.0);
    }

    #[test]
    fn test_centroid_260_from_250() {
        let config = TrackingConfig::default();
        let target = config.target_angle(260.0, 250.0);
        assert!((target - (250.0 + 10.0 * 0.72222)).abs() < 1e-9);

        let mv = config.plan(250.0, target, 30);
        assert!(mv.target >= 0.0 && mv.target <= 500.0);
        assert_eq!(mv.travel_time, Duration::ZERO);
        assert!(mv.lost_frames >= config.settle_frames);
    }

    #[test]
    fn test_target_is_clamped() {
        let config = TrackingConfig::default();
        assert_eq!(config.target_angle(499.0, 480.0), 500.0);
        assert_eq!(config.target_angle(0.0, 20.0), 0.0);
    }

    #[test]
    fn test_full_sweep_timing() {
        let config = TrackingConfig::default();
        let mv = config.plan(0.0, 500.0, 30);
        // 50 steps of 20ms
        assert_eq!(mv.travel_time, Duration::from_secs(1));
        assert_eq!(mv.lost_frames, 30 + 3);
    }

    #[test]
    fn test_centroid_in_frame_centre_holds_position() {
        let config = TrackingConfig::default();
        assert_eq!(config.target_angle(255.0, 321.0), 321.0);
    }

    #[test]
    fn test_every_centroid_lands_in_range() {
        let config = TrackingConfig::default();
        for previous in [0.0, 125.0, 250.0, 375.0, 500.0] {
            for x in (0..=500).step_by(7) {
                let target = config.target_angle(x as f64, previous);
                assert!(
                    (0.0..=500.0).contains(&target),
                    "x={} previous={} gave {}",
                    x,
                    previous,
                    target
                );
            }
        }
    }

    #[test]
    fn test_lost_frames_monotonic_in_distance() {
        let config = TrackingConfig::default();
        let mut last = 0;
        for distance in 0..=500 {
            let mv = config.plan(0.0, distance as f64, 30);
            assert!(mv.lost_frames >= last, "regressed at distance {}", distance);
            last = mv.lost_frames;
        }
    }
}
