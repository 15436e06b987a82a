use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{BoundingBox, Camera, CaptureSettings, MotionDetector};
use crate::config::CameraConfig;
use crate::error::{Error, Result};

const STOP_POLL: Duration = Duration::from_millis(50);

/// Running detector process and the lines its reader thread forwards.
struct DetectorFeed {
    child: Child,
    lines: Receiver<io::Result<String>>,
    streaming: bool,
}

/// Camera driven by two external programs: a recorder writing the raw
/// stream to disk, and a detector printing one JSON array of
/// [`BoundingBox`]es per analysed frame on stdout.
///
/// The recorder is asked to stop with SIGINT so it can finish the file, and
/// killed only if it is still running after `stop_timeout_ms`.
pub struct CommandCamera {
    config: CameraConfig,
    settings: Option<CaptureSettings>,
    recorder: Option<Child>,
    detector: Option<DetectorFeed>,
}

impl CommandCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            settings: None,
            recorder: None,
            detector: None,
        }
    }

    fn record_args(&self, settings: &CaptureSettings, path: &Path) -> Vec<String> {
        let path = path.to_string_lossy();
        self.config
            .record_args
            .iter()
            .map(|arg| {
                arg.replace("{path}", &path)
                    .replace("{width}", &settings.width.to_string())
                    .replace("{height}", &settings.height.to_string())
                    .replace("{fps}", &settings.frame_rate.to_string())
                    .replace("{bitrate}", &settings.bitrate.to_string())
            })
            .collect()
    }

    fn spawn_detector(&mut self) -> Result<()> {
        let mut child = Command::new(&self.config.detect_program)
            .args(&self.config.detect_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::device("camera", format!("failed to start detector: {}", e)))?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                reap(child);
                return Err(Error::device("camera", "detector has no stdout"));
            }
        };

        let (tx, lines) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("detector-feed".to_string())
            .spawn(move || forward_lines(stdout, tx));
        if let Err(e) = spawned {
            reap(child);
            return Err(Error::device("camera", format!("failed to read detector: {}", e)));
        }

        self.detector = Some(DetectorFeed {
            child,
            lines,
            streaming: false,
        });
        debug!("Detector '{}' started", self.config.detect_program);
        Ok(())
    }

    fn stop_detector(&mut self) {
        if let Some(feed) = self.detector.take() {
            reap(feed.child);
        }
    }
}

/// Forward detector lines until its stdout closes or nobody listens.
fn forward_lines(stdout: ChildStdout, tx: mpsc::Sender<io::Result<String>>) {
    for line in BufReader::new(stdout).lines() {
        let failed = line.is_err();
        if tx.send(line).is_err() || failed {
            break;
        }
    }
}

fn reap(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn interrupt(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGINT) {
        debug!("Recorder interrupt: {}", e);
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) {}

impl Camera for CommandCamera {
    type Frame = Vec<BoundingBox>;

    fn open(&mut self, settings: &CaptureSettings) -> Result<()> {
        self.settings = Some(*settings);
        Ok(())
    }

    fn start_recording(&mut self, path: &Path) -> Result<()> {
        let settings = self
            .settings
            .ok_or_else(|| Error::device("camera", "start_recording before open"))?;
        if self.recorder.is_some() {
            return Err(Error::device("camera", "recording already in progress"));
        }
        let child = Command::new(&self.config.record_program)
            .args(self.record_args(&settings, path))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::device("camera", format!("failed to start recorder: {}", e)))?;
        self.recorder = Some(child);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<()> {
        let mut child = self
            .recorder
            .take()
            .ok_or_else(|| Error::device("camera", "no recording in progress"))?;

        interrupt(&child);
        let deadline = Instant::now() + self.config.stop_timeout();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Recorder exited with {}", status);
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(STOP_POLL),
                Ok(None) => {
                    warn!(
                        "Recorder still running {:?} after interrupt, killing it",
                        self.config.stop_timeout()
                    );
                    break;
                }
                Err(e) => {
                    warn!("Could not poll recorder: {}", e);
                    break;
                }
            }
        }

        if let Err(e) = child.kill() {
            debug!("Recorder kill: {}", e);
        }
        child
            .wait()
            .map_err(|e| Error::device("camera", format!("failed to reap recorder: {}", e)))?;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Self::Frame> {
        if self.detector.is_none() {
            self.spawn_detector()?;
        }
        let (received, timeout) = match self.detector.as_mut() {
            Some(feed) => {
                let timeout = if feed.streaming {
                    self.config.frame_timeout()
                } else {
                    self.config.startup_timeout()
                };
                let received = feed.lines.recv_timeout(timeout);
                if matches!(received, Ok(Ok(_))) {
                    feed.streaming = true;
                }
                (received, timeout)
            }
            None => return Err(Error::device("camera", "detector not running")),
        };

        match received {
            Ok(Ok(line)) => serde_json::from_str(line.trim())
                .map_err(|e| Error::device("camera", format!("bad detector line: {}", e))),
            Ok(Err(e)) => {
                self.stop_detector();
                Err(e.into())
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::device(
                "camera",
                format!("no frame from detector within {:?}", timeout),
            )),
            Err(RecvTimeoutError::Disconnected) => {
                self.stop_detector();
                Err(Error::device("camera", "detector stream ended"))
            }
        }
    }

    fn close(&mut self) {
        if self.recorder.is_some() {
            if let Err(e) = self.stop_recording() {
                warn!("Recorder did not stop cleanly: {}", e);
            }
        }
        self.stop_detector();
        self.settings = None;
    }
}

impl Drop for CommandCamera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pass-through detector for cameras whose frames already are detections.
#[derive(Default)]
pub struct FeedDetector;

impl MotionDetector<Vec<BoundingBox>> for FeedDetector {
    fn detect(&mut self, frame: &Vec<BoundingBox>) -> Vec<BoundingBox> {
        frame.clone()
    }
}
