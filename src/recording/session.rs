//! Motion session lifecycle.
//!
//! While motion is active (or within the cooldown after the last
//! detection) frames are mirrored into a dedicated motion recording:
//!
//! ```text
//!          motion                     no motion, ts > deadline
//!   Idle ─────────► Recording ───────────────────────────────► Idle
//!                   │  ▲
//!                   └──┘ motion: re-arm deadline
//!                        no motion, ts <= deadline: keep writing
//! ```
//!
//! Deadlines are measured on the frame timeline. When a motion recording
//! cannot be opened, further attempts back off (1s doubling up to 30s of
//! frame time) and the motion in between is reported as deferred.

use super::encoder::{EncodeError, EncoderFactory, StreamKind};
use super::naming::PathTemplate;
use super::segment::{SegmentConfig, SegmentSummary, SegmentWriter};
use crate::capture::Frame;
use crate::config::ConfigError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Result of feeding one frame to the controller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// No session and no motion.
    Idle,
    /// Motion opened a new session.
    Started { session: u64, path: PathBuf },
    /// Motion re-armed the running session.
    Refreshed,
    /// No motion, but the session is within its cooldown.
    Continued,
    /// The cooldown elapsed and the session was closed.
    Ended(SessionSummary),
    /// Motion, but opening a recording failed recently and the retry delay
    /// has not elapsed.
    Deferred,
}

impl SessionEvent {
    /// True for events carrying a fresh detection.
    pub fn is_motion(&self) -> bool {
        matches!(self, SessionEvent::Started { .. } | SessionEvent::Refreshed)
    }
}

/// A finished motion session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Per-run session number.
    pub session: u64,
    /// Frames mirrored into the motion recording.
    pub frames: u64,
    /// Timeline distance from the first to the last recorded frame.
    pub duration: Duration,
    /// Segment files the session produced.
    pub segments: Vec<SegmentSummary>,
}

struct ActiveSession {
    number: u64,
    writer: SegmentWriter,
    started_at: Instant,
    last_frame: Instant,
    deadline: Instant,
    frames: u64,
}

/// Opens, extends and closes motion recordings.
pub struct MotionSessionController {
    cooldown: Duration,
    segment: SegmentConfig,
    motion_dir: PathBuf,
    factory: Arc<dyn EncoderFactory>,
    next_session: u64,
    active: Option<ActiveSession>,
    retry_at: Option<Instant>,
    retry_delay: Duration,
}

impl MotionSessionController {
    /// Creates an idle controller.
    pub fn new(
        cooldown: Duration,
        segment: SegmentConfig,
        motion_dir: impl Into<PathBuf>,
        factory: Arc<dyn EncoderFactory>,
    ) -> Result<Self, ConfigError> {
        segment.validate()?;
        Ok(Self {
            cooldown,
            segment,
            motion_dir: motion_dir.into(),
            factory,
            next_session: 0,
            active: None,
            retry_at: None,
            retry_delay: INITIAL_RETRY_DELAY,
        })
    }

    /// Advances the session state machine by one frame.
    ///
    /// An error means the motion writer failed; the session has been
    /// ended and its writer released.
    pub fn on_frame(&mut self, frame: &Frame, motion: bool) -> Result<SessionEvent, EncodeError> {
        let now = frame.timestamp();

        let Some(active) = self.active.as_mut() else {
            if !motion {
                return Ok(SessionEvent::Idle);
            }
            if self.retry_at.is_some_and(|at| now < at) {
                return Ok(SessionEvent::Deferred);
            }
            return self.start(frame).inspect_err(|e| self.back_off(now, e));
        };

        if !motion && now > active.deadline {
            return match self.active.take() {
                Some(expired) => Self::finish(expired).map(SessionEvent::Ended),
                None => Ok(SessionEvent::Idle),
            };
        }

        let event = if motion {
            active.deadline = now + self.cooldown;
            SessionEvent::Refreshed
        } else {
            SessionEvent::Continued
        };

        if let Err(e) = active.writer.write(frame) {
            tracing::warn!(session = active.number, error = %e, "Motion recording failed; ending session");
            self.active = None;
            return Err(e);
        }
        active.frames += 1;
        active.last_frame = now;
        Ok(event)
    }

    fn start(&mut self, frame: &Frame) -> Result<SessionEvent, EncodeError> {
        let number = self.next_session;

        let template = PathTemplate::motion(&self.motion_dir, number, self.factory.extension());
        let mut writer = SegmentWriter::new(
            StreamKind::Motion,
            self.segment.clone(),
            template,
            Arc::clone(&self.factory),
        )?;
        let path = writer.open()?;
        writer.write(frame)?;

        let now = frame.timestamp();
        self.next_session += 1;
        self.retry_at = None;
        self.retry_delay = INITIAL_RETRY_DELAY;
        tracing::info!(session = number, path = %path.display(), "Motion session started");
        self.active = Some(ActiveSession {
            number,
            writer,
            started_at: now,
            last_frame: now,
            deadline: now + self.cooldown,
            frames: 1,
        });
        Ok(SessionEvent::Started {
            session: number,
            path,
        })
    }

    fn back_off(&mut self, now: Instant, error: &EncodeError) {
        tracing::warn!(
            error = %error,
            retry_ms = self.retry_delay.as_millis() as u64,
            "Could not open motion recording; backing off"
        );
        self.retry_at = Some(now + self.retry_delay);
        self.retry_delay = (self.retry_delay * 2).min(MAX_RETRY_DELAY);
    }

    fn finish(mut active: ActiveSession) -> Result<SessionSummary, EncodeError> {
        active.writer.close()?;
        let summary = SessionSummary {
            session: active.number,
            frames: active.frames,
            duration: active.last_frame.saturating_duration_since(active.started_at),
            segments: active.writer.take_completed(),
        };
        tracing::info!(
            session = summary.session,
            frames = summary.frames,
            duration_ms = summary.duration.as_millis() as u64,
            "Motion session ended"
        );
        Ok(summary)
    }

    /// Ends the active session, if any.
    pub fn shutdown(&mut self) -> Result<Option<SessionSummary>, EncodeError> {
        self.active.take().map(Self::finish).transpose()
    }

    /// True while a motion recording is open.
    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Number of the active session.
    pub fn active_session(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.number)
    }

    /// Timeline instant after which the active session ends.
    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.deadline)
    }

    /// Path of the motion segment currently being written.
    pub fn current_path(&self) -> Option<&Path> {
        self.active.as_ref().and_then(|a| a.writer.current_path())
    }

    /// Sessions opened since construction.
    pub fn sessions_started(&self) -> u64 {
        self.next_session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferMode;
    use crate::recording::Y4mEncoderFactory;

    const W: u32 = 8;
    const H: u32 = 8;

    struct Timeline {
        origin: Instant,
        fps: u64,
    }

    impl Timeline {
        fn new(fps: u64) -> Self {
            Self {
                origin: Instant::now(),
                fps,
            }
        }

        fn frame(&self, n: u64) -> Frame {
            Frame::with_timestamp(
                vec![0u8; (W * H) as usize],
                W,
                H,
                crate::capture::PixelFormat::Gray8,
                n,
                self.origin + Duration::from_nanos(n * 1_000_000_000 / self.fps),
            )
        }
    }

    fn controller(dir: &Path, cooldown: Duration) -> MotionSessionController {
        MotionSessionController::new(
            cooldown,
            SegmentConfig {
                width: W,
                height: H,
                fps: 10,
                max_duration: None,
                max_size: None,
                buffering: BufferMode::Immediate,
            },
            dir,
            Arc::new(Y4mEncoderFactory),
        )
        .unwrap()
    }

    #[test]
    fn test_idle_without_motion() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path(), Duration::from_secs(2));
        let timeline = Timeline::new(10);

        for n in 0..20 {
            let event = controller.on_frame(&timeline.frame(n), false).unwrap();
            assert!(matches!(event, SessionEvent::Idle));
        }
        assert!(!controller.is_recording());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cooldown_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path(), Duration::from_secs(2));
        let timeline = Timeline::new(10);

        let mut ended_at = None;
        for n in 0..26 {
            let motion = n <= 3;
            match controller.on_frame(&timeline.frame(n), motion).unwrap() {
                SessionEvent::Started { session, path } => {
                    assert_eq!(n, 0);
                    assert_eq!(session, 0);
                    let name = path.file_name().unwrap().to_string_lossy().into_owned();
                    assert!(name.starts_with("motion_"), "{name}");
                }
                SessionEvent::Refreshed => assert!((1..=3).contains(&n)),
                SessionEvent::Continued => assert!((4..=23).contains(&n), "frame {n}"),
                SessionEvent::Ended(summary) => {
                    ended_at = Some(n);
                    assert_eq!(summary.frames, 24);
                    assert_eq!(summary.segments.len(), 1);
                    assert_eq!(summary.segments[0].frames, 24);
                }
                SessionEvent::Idle => assert!(n > 24),
                SessionEvent::Deferred => panic!("unexpected deferral at frame {n}"),
            }
        }

        assert_eq!(ended_at, Some(24));
        assert!(!controller.is_recording());
    }

    #[test]
    fn test_motion_rearms_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path(), Duration::from_secs(1));
        let timeline = Timeline::new(10);

        controller.on_frame(&timeline.frame(0), true).unwrap();
        let first = controller.deadline().unwrap();
        controller.on_frame(&timeline.frame(5), true).unwrap();
        let second = controller.deadline().unwrap();

        assert_eq!(second - first, Duration::from_millis(500));
    }

    #[test]
    fn test_sessions_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path(), Duration::from_millis(200));
        let timeline = Timeline::new(10);

        let mut paths = Vec::new();
        for n in 0..30 {
            let motion = n % 10 == 0;
            if let SessionEvent::Started { path, .. } =
                controller.on_frame(&timeline.frame(n), motion).unwrap()
            {
                paths.push(path);
            }
        }

        assert_eq!(paths.len(), 3);
        assert_eq!(controller.sessions_started(), 3);
        paths.dedup();
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_shutdown_closes_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path(), Duration::from_secs(60));
        let timeline = Timeline::new(10);

        for n in 0..5 {
            controller.on_frame(&timeline.frame(n), true).unwrap();
        }
        let summary = controller.shutdown().unwrap().unwrap();
        assert_eq!(summary.frames, 5);
        assert!(summary.segments[0].path.exists());
        assert!(controller.shutdown().unwrap().is_none());
    }

    #[test]
    fn test_open_failure_backs_off() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let mut controller = controller(&blocker.join("motion"), Duration::from_secs(2));
        let timeline = Timeline::new(10);

        // 60 seconds of continuous motion
        let mut failures = Vec::new();
        let mut deferred = 0;
        for n in 0..600 {
            match controller.on_frame(&timeline.frame(n), true) {
                Err(_) => failures.push(n),
                Ok(SessionEvent::Deferred) => deferred += 1,
                Ok(other) => panic!("unexpected {other:?}"),
            }
        }

        // Retries double from one second; the seventh would be due at 61s
        assert_eq!(failures, vec![0, 10, 30, 70, 150, 310]);
        assert_eq!(deferred, 600 - failures.len());
        assert_eq!(controller.sessions_started(), 0);
        assert!(!controller.is_recording());
    }

    #[test]
    fn test_writer_failure_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path(), Duration::from_secs(60));
        let timeline = Timeline::new(10);

        controller.on_frame(&timeline.frame(0), true).unwrap();
        let wrong = Frame::gray(vec![0u8; 4], 2, 2, 1);
        assert!(controller.on_frame(&wrong, true).is_err());
        assert!(!controller.is_recording());

        // The next detection opens a fresh session
        let event = controller.on_frame(&timeline.frame(2), true).unwrap();
        assert!(matches!(event, SessionEvent::Started { session: 1, .. }));
    }
}
