use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    IgnitionOff,
    SegmentFull,
    IgnitionOn,
    /// No motor move for longer than the sentry retention window.
    Quiet,
    CameraFault,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentAction {
    Continue,
    Stop(StopReason),
}

/// Ignition-mode segment: runs while the ignition stays on, cut at
/// `segment_length` so a crash never costs more than one segment.
pub fn decide_segment(ignition_on: bool, elapsed: Duration, segment_length: Duration) -> SegmentAction {
    if !ignition_on {
        SegmentAction::Stop(StopReason::IgnitionOff)
    } else if elapsed >= segment_length {
        SegmentAction::Stop(StopReason::SegmentFull)
    } else {
        SegmentAction::Continue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentryObservation {
    pub ignition_on: bool,
    /// At least one detection passed the area filter this frame.
    pub motion: bool,
    /// Time since the camera last panned; `None` if it has not moved since centering.
    pub since_last_move: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentryAction {
    /// Not recording, nothing moved.
    Idle,
    StartRecording,
    /// Recording continues; pan if there was motion.
    Keep,
    Stop,
    StopAndYield,
    /// Leave sentry mode without touching the camera.
    Yield,
}

/// One sentry frame. Ignition wins over everything: with the ignition on a
/// running recording is cut and no new one is started.
pub fn decide_sentry(
    recording: bool,
    observation: &SentryObservation,
    min_retention: Duration,
) -> SentryAction {
    match (recording, observation.ignition_on) {
        (true, true) => SentryAction::StopAndYield,
        (false, true) => SentryAction::Yield,
        (false, false) if observation.motion => SentryAction::StartRecording,
        (false, false) => SentryAction::Idle,
        (true, false) if observation.motion => SentryAction::Keep,
        (true, false) => match observation.since_last_move {
            Some(quiet) if quiet <= min_retention => SentryAction::Keep,
            _ => SentryAction::Stop,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETENTION: Duration = Duration::from_secs(10);

    fn observe(ignition_on: bool, motion: bool, quiet_secs: Option<u64>) -> SentryObservation {
        SentryObservation {
            ignition_on,
            motion,
            since_last_move: quiet_secs.map(Duration::from_secs),
        }
    }

    #[test]
    fn test_segment_runs_while_ignition_on() {
        let len = Duration::from_secs(300);
        assert_eq!(
            decide_segment(true, Duration::from_secs(10), len),
            SegmentAction::Continue
        );
        assert_eq!(
            decide_segment(true, len, len),
            SegmentAction::Stop(StopReason::SegmentFull)
        );
        assert_eq!(
            decide_segment(false, Duration::from_secs(1), len),
            SegmentAction::Stop(StopReason::IgnitionOff)
        );
    }

    #[test]
    fn test_motion_starts_recording() {
        assert_eq!(
            decide_sentry(false, &observe(false, true, None), RETENTION),
            SentryAction::StartRecording
        );
        assert_eq!(
            decide_sentry(false, &observe(false, false, None), RETENTION),
            SentryAction::Idle
        );
    }

    #[test]
    fn test_ignition_takes_priority_over_motion() {
        assert_eq!(
            decide_sentry(false, &observe(true, true, None), RETENTION),
            SentryAction::Yield
        );
        assert_eq!(
            decide_sentry(true, &observe(true, true, Some(0)), RETENTION),
            SentryAction::StopAndYield
        );
    }

    #[test]
    fn test_recording_kept_until_quiet_for_retention() {
        assert_eq!(
            decide_sentry(true, &observe(false, false, Some(10)), RETENTION),
            SentryAction::Keep
        );
        assert_eq!(
            decide_sentry(true, &observe(false, false, Some(11)), RETENTION),
            SentryAction::Stop
        );
        assert_eq!(
            decide_sentry(true, &observe(false, true, Some(60)), RETENTION),
            SentryAction::Keep
        );
        assert_eq!(
            decide_sentry(true, &observe(false, false, None), RETENTION),
            SentryAction::Stop
        );
    }
}
