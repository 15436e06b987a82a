use std::fs;
use std::path::PathBuf;
use tracing::debug;

use super::IgnitionSensor;
use crate::config::IgnitionConfig;

/// Reads the ignition level from a JSON file (`true`/`false`) kept current by
/// an external GPIO reader.
///
/// A missing or half-written file keeps the previous reading, so a torn write
/// never flips the recording mode.
pub struct FileIgnition {
    path: PathBuf,
    active_high: bool,
    last: bool,
}

impl FileIgnition {
    pub fn new(config: &IgnitionConfig) -> Self {
        Self {
            path: config.state_file.clone(),
            active_high: config.active_high,
            last: false,
        }
    }
}

impl IgnitionSensor for FileIgnition {
    fn read_ignition(&mut self) -> bool {
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<bool>(content.trim()) {
                Ok(level) => self.last = level == self.active_high,
                Err(e) => debug!(
                    "Unparseable ignition state in {}: {}",
                    self.path.display(),
                    e
                ),
            },
            Err(e) => debug!("Cannot read {}: {}", self.path.display(), e),
        }
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sensor(path: PathBuf, active_high: bool) -> FileIgnition {
        FileIgnition::new(&IgnitionConfig {
            state_file: path,
            active_high,
        })
    }

    #[test]
    fn test_reads_level_with_polarity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ignition_state.json");
        fs::write(&path, "true").unwrap();

        assert!(sensor(path.clone(), true).read_ignition());
        assert!(!sensor(path, false).read_ignition());
    }

    #[test]
    fn test_keeps_last_value_on_torn_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ignition_state.json");
        let mut ignition = sensor(path.clone(), true);

        fs::write(&path, "true\n").unwrap();
        assert!(ignition.read_ignition());

        fs::write(&path, "tr").unwrap();
        assert!(ignition.read_ignition());

        fs::remove_file(&path).unwrap();
        assert!(ignition.read_ignition());

        fs::write(&path, "false").unwrap();
        assert!(!ignition.read_ignition());
    }
}
