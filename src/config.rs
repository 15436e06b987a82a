use config::{Config, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub recording: RecordingConfig,
    pub sentry: SentryConfig,
    pub motion: MotionConfig,
    pub motor: MotorConfig,
    pub ignition: IgnitionConfig,
    pub storage: StorageConfig,
    pub transcode: TranscodeConfig,
    pub camera: CameraConfig,
}

/// Capture settings shared by both recording modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
    /// Maximum length of one ignition-mode segment.
    pub segment_secs: u64,
    pub poll_interval_ms: u64,
    pub warmup_ms: u64,
    pub ignition_dir: PathBuf,
    pub sentry_dir: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            bitrate: 1_000_000,
            segment_secs: 300,
            poll_interval_ms: 500,
            warmup_ms: 1000,
            ignition_dir: PathBuf::from("recordings/ignition_on_recordings"),
            sentry_dir: PathBuf::from("recordings/sentry_mode_recordings"),
        }
    }
}

impl RecordingConfig {
    pub fn segment_length(&self) -> Duration {
        Duration::from_secs(self.segment_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentryConfig {
    /// A sentry recording is cut once this long has passed without a motor move.
    pub min_retention_secs: u64,
    /// Frames thrown away after the camera opens, while exposure settles.
    pub initial_discard_frames: u32,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            min_retention_secs: 10,
            initial_discard_frames: 10,
        }
    }
}

impl SentryConfig {
    pub fn min_retention(&self) -> Duration {
        Duration::from_secs(self.min_retention_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Width the vision collaborator resizes frames to; centroids are in this space.
    pub frame_width: u32,
    pub min_area: u32,
    pub max_area: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            frame_width: 500,
            min_area: 4000,
            max_area: 40000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    pub pin: u8,
    pub neutral_angle: f64,
    pub min_angle: f64,
    pub max_angle: f64,
    pub scale: f64,
    pub bucket_px: f64,
    pub step_units: f64,
    pub step_secs: f64,
    pub settle_frames: u32,
    /// Driver program invoked as `<program> <args..> <from> <to> <pin>`.
    pub program: String,
    pub args: Vec<String>,
    /// Written with `[from, to, pin]` before each move, for drivers that read
    /// the move from a file instead of their arguments.
    pub data_file: Option<PathBuf>,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            pin: 12,
            neutral_angle: 250.0,
            min_angle: 0.0,
            max_angle: 500.0,
            scale: 0.72222,
            bucket_px: 10.0,
            step_units: 10.0,
            step_secs: 0.02,
            settle_frames: 3,
            program: "python3".to_string(),
            args: vec!["move_motor.py".to_string()],
            data_file: Some(PathBuf::from("motor_data.json")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnitionConfig {
    pub state_file: PathBuf,
    /// When false, a `true` reading from the sensor means the ignition is off.
    pub active_high: bool,
}

impl Default for IgnitionConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("ignition_state.json"),
            active_high: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub ceiling_gb: f64,
    pub queue_db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("recordings"),
            ceiling_gb: 24.0,
            queue_db_path: PathBuf::from("itinerary.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub program: String,
    pub workers: usize,
    pub keep_raw: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            program: "MP4Box".to_string(),
            workers: 2,
            keep_raw: false,
        }
    }
}

/// Process-backed camera. `{path}`, `{width}`, `{height}`, `{fps}` and
/// `{bitrate}` are substituted in `record_args`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub record_program: String,
    pub record_args: Vec<String>,
    pub detect_program: String,
    pub detect_args: Vec<String>,
    /// Grace period between SIGINT and SIGKILL when stopping the recorder.
    pub stop_timeout_ms: u64,
    /// Longest wait for one detector line once frames are flowing.
    pub frame_timeout_ms: u64,
    /// Longest wait for the first detector line after it starts.
    pub startup_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            record_program: "libcamera-vid".to_string(),
            record_args: [
                "-t", "0", "--width", "{width}", "--height", "{height}", "--framerate", "{fps}",
                "--bitrate", "{bitrate}", "--codec", "h264", "-o", "{path}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            detect_program: "python3".to_string(),
            detect_args: vec!["detect_motion.py".to_string()],
            stop_timeout_ms: 5000,
            frame_timeout_ms: 2000,
            startup_timeout_ms: 10_000,
        }
    }
}

impl CameraConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let motor = &self.motor;
        if motor.min_angle >= motor.max_angle {
            return Err(Error::InvalidConfig(format!(
                "motor.min_angle {} must be below motor.max_angle {}",
                motor.min_angle, motor.max_angle
            )));
        }
        if motor.neutral_angle < motor.min_angle || motor.neutral_angle > motor.max_angle {
            return Err(Error::InvalidConfig(format!(
                "motor.neutral_angle {} lies outside [{}, {}]",
                motor.neutral_angle, motor.min_angle, motor.max_angle
            )));
        }
        if motor.bucket_px <= 0.0 || motor.step_units <= 0.0 {
            return Err(Error::InvalidConfig(
                "motor.bucket_px and motor.step_units must be positive".to_string(),
            ));
        }
        if self.motion.min_area > self.motion.max_area {
            return Err(Error::InvalidConfig(format!(
                "motion.min_area {} exceeds motion.max_area {}",
                self.motion.min_area, self.motion.max_area
            )));
        }
        if self.recording.frame_rate == 0 {
            return Err(Error::InvalidConfig(
                "recording.frame_rate must be non-zero".to_string(),
            ));
        }
        if self.storage.ceiling_gb <= 0.0 {
            return Err(Error::InvalidConfig(
                "storage.ceiling_gb must be positive".to_string(),
            ));
        }
        if self.transcode.workers == 0 {
            return Err(Error::InvalidConfig(
                "transcode.workers must be at least 1".to_string(),
            ));
        }
        if self.camera.frame_timeout_ms == 0 || self.camera.startup_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "camera frame timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load `Config.toml` (optional) overlaid with `SENTRY__SECTION__KEY` env vars.
pub fn load_configuration() -> Result<AppConfig> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("SENTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let config = builder.try_deserialize::<AppConfig>()?;
    config.validate()?;
    Ok(config)
}
