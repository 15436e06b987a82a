use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::store::ConversionItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    Ignition,
    Sentry,
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingMode::Ignition => f.write_str("ignition"),
            RecordingMode::Sentry => f.write_str("sentry"),
        }
    }
}

/// An open capture. Owned by the controller until the camera stops, then
/// handed to the transcode pipeline as its [`ConversionItem`].
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub mode: RecordingMode,
    pub item: ConversionItem,
    pub started_at: DateTime<Local>,
    pub started: Instant,
}

impl RecordingSession {
    /// Names the file after the wall-clock start time, adding a counter
    /// when a file with that name already exists.
    pub fn new(mode: RecordingMode, save_path: &Path, started_at: DateTime<Local>, started: Instant) -> Self {
        let stem = started_at.format("%d_%m_%Y__%H_%M_%S").to_string();
        let mut item = ConversionItem::new(stem.clone(), save_path);
        let mut suffix = 1;
        while item.raw_path().exists() || item.playable_path().exists() {
            item = ConversionItem::new(format!("{}_{}", stem, suffix), save_path);
            suffix += 1;
        }
        Self {
            mode,
            item,
            started_at,
            started,
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.item.raw_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_filename_from_start_time() {
        let dir = tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2026, 10, 18, 9, 5, 7).unwrap();
        let session = RecordingSession::new(RecordingMode::Sentry, dir.path(), at, Instant::now());
        assert_eq!(session.item.filename, "18_10_2026__09_05_07");
        assert_eq!(session.file_path(), dir.path().join("18_10_2026__09_05_07.h264"));
    }

    #[test]
    fn test_same_second_does_not_overwrite() {
        let dir = tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2026, 10, 18, 9, 5, 7).unwrap();
        fs::write(dir.path().join("18_10_2026__09_05_07.h264"), b"x").unwrap();
        let session = RecordingSession::new(RecordingMode::Ignition, dir.path(), at, Instant::now());
        assert_eq!(session.item.filename, "18_10_2026__09_05_07_1");
    }
}
