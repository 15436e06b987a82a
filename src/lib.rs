//! Recording core for a vehicle camera: ignition recording, sentry-mode
//! motion tracking, background transcoding with crash recovery, and a storage
//! quota over the retained videos.

pub mod config;
pub mod controller;
pub mod devices;
pub mod error;
pub mod progress;
pub mod quota;
pub mod shutdown;
pub mod store;
pub mod tracking;
pub mod transcode;
pub mod worker;

pub use config::{load_configuration, AppConfig};
pub use controller::{ControllerSettings, RecordingController};
pub use error::{Error, Result};
pub use progress::{RecoveryReporter, SilentReporter};
pub use quota::{DirectoryUsage, DiskUsage, EnforceReport, QuotaEnforcer};
pub use shutdown::register_shutdown_flag;
pub use store::{ConversionItem, Itinerary, QueueItem, QueueStore, RetainedVideoItem};
pub use tracking::{MotorTracker, TrackingConfig};
pub use transcode::{Mp4BoxTranscoder, RecoveryReport, TranscodePipeline, Transcoder};
