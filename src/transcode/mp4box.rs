use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use super::Transcoder;
use crate::config::TranscodeConfig;
use crate::error::{Error, Result};
use crate::store::PLAYABLE_EXTENSION;

/// Wraps the raw H.264 stream into an MP4 container with `MP4Box -add`.
pub struct Mp4BoxTranscoder {
    program: String,
    keep_raw: bool,
}

impl Mp4BoxTranscoder {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self {
            program: config.program.clone(),
            keep_raw: config.keep_raw,
        }
    }
}

impl Transcoder for Mp4BoxTranscoder {
    fn convert(&self, raw: &Path) -> Result<PathBuf> {
        if !raw.is_file() {
            return Err(Error::transcode(raw, "source file missing"));
        }
        let output_path = raw.with_extension(PLAYABLE_EXTENSION);

        // MP4Box appends tracks to an existing file; a leftover from an
        // interrupted run would end up with duplicate streams.
        match fs::remove_file(&output_path) {
            Ok(()) => debug!("Removed partial {}", output_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let output = Command::new(&self.program)
            .arg("-add")
            .arg(raw)
            .arg(&output_path)
            .output()
            .map_err(|e| Error::transcode(raw, format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let _ = fs::remove_file(&output_path);
            return Err(Error::transcode(
                raw,
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        if !self.keep_raw {
            if let Err(e) = fs::remove_file(raw) {
                warn!("Converted but could not remove {}: {}", raw.display(), e);
            }
        }
        Ok(output_path)
    }
}
