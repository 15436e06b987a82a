//! Hardware and vision collaborators.
//!
//! The control loop only talks to these traits. The process-backed
//! implementations here drive external programs; pixel processing, PWM and
//! container muxing stay in those programs.

mod camera;
mod clock;
mod ignition;
mod motor;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

pub use camera::{CommandCamera, FeedDetector};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ignition::FileIgnition;
pub use motor::CommandMotor;

/// Axis-aligned detection in the resized frame's pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center_x(&self) -> f64 {
        self.x as f64 + self.width as f64 / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
}

pub trait IgnitionSensor: Send {
    /// Cheap, side-effect free sample of the ignition line.
    fn read_ignition(&mut self) -> bool;
}

pub trait Camera {
    type Frame;

    fn open(&mut self, settings: &CaptureSettings) -> Result<()>;
    fn start_recording(&mut self, path: &Path) -> Result<()>;
    fn stop_recording(&mut self) -> Result<()>;
    /// Blocks for at most one frame interval.
    fn capture_frame(&mut self) -> Result<Self::Frame>;
    fn close(&mut self);
}

pub trait MotionDetector<F> {
    fn detect(&mut self, frame: &F) -> Vec<BoundingBox>;

    /// Drop any background model; called after the camera has moved.
    fn reset(&mut self) {}
}

pub trait Motor: Send + Sync {
    /// Sweep from `from` to `angle` (driver units) on `pin`. Blocks until the
    /// physical move is done; callers dispatch it off the control thread.
    fn move_to(&self, from: f64, angle: f64, pin: u8) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_geometry() {
        let b = BoundingBox::new(100, 40, 80, 60);
        assert_eq!(b.area(), 4800);
        assert_eq!(b.center_x(), 140.0);
    }

    #[test]
    fn test_bounding_box_from_json() {
        let boxes: Vec<BoundingBox> =
            serde_json::from_str(r#"[{"x":1,"y":2,"width":3,"height":4}]"#).unwrap();
        assert_eq!(boxes, vec![BoundingBox::new(1, 2, 3, 4)]);
    }
}
