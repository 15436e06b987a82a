use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Queue store error: {0}")]
    Store(#[from] rocksdb::Error),

    #[error("Queue codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Transcode failed for {path}: {reason}")]
    Transcode { path: String, reason: String },

    #[error("Device error ({device}): {reason}")]
    Device { device: &'static str, reason: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn device(device: &'static str, reason: impl Into<String>) -> Self {
        Error::Device {
            device,
            reason: reason.into(),
        }
    }

    pub fn transcode(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Error::Transcode {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
