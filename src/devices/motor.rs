use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use super::Motor;
use crate::config::MotorConfig;
use crate::error::{Error, Result};

/// Hands each move to an external servo driver.
///
/// The move is written to `data_file` as `[from, to, pin]` (when one is
/// configured) and also passed on the command line, so the driver is run as
/// `<program> <args..> <from> <to> <pin>` and may read either.
pub struct CommandMotor {
    program: String,
    args: Vec<String>,
    data_file: Option<PathBuf>,
}

impl CommandMotor {
    pub fn new(config: &MotorConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            data_file: config.data_file.clone(),
        }
    }

    fn write_move(&self, from: f64, angle: f64, pin: u8) -> Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let data = serde_json::to_vec(&(from, angle, pin))
            .map_err(|e| Error::device("motor", format!("cannot encode move: {}", e)))?;
        fs::write(path, data).map_err(|e| {
            Error::device("motor", format!("cannot write {}: {}", path.display(), e))
        })
    }
}

impl Motor for CommandMotor {
    fn move_to(&self, from: f64, angle: f64, pin: u8) -> Result<()> {
        self.write_move(from, angle, pin)?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(format!("{:.2}", from))
            .arg(format!("{:.2}", angle))
            .arg(pin.to_string())
            .output()
            .map_err(|e| Error::device("motor", format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(Error::device(
                "motor",
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        debug!("Motor moved {:.1} -> {:.1} on pin {}", from, angle, pin);
        Ok(())
    }
}
