//! Processing loop: detection, recording and notification.

use super::queue::{DequeueOutcome, FrameReceiver};
use super::PipelineError;
use crate::capture::Frame;
use crate::detection::MotionDetector;
use crate::metrics::{MetricsRegistry, ProcessingSnapshot};
use crate::notify::{DispatchError, NotificationThrottle, ThrottleOutcome};
use crate::recording::{
    EncodeError, MotionSessionController, SegmentSummary, SessionEvent, SessionSummary,
    SegmentWriter, StreamKind,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Writer failures of one stream over the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFailure {
    /// Which writer failed.
    pub stream: StreamKind,
    /// Failures seen.
    pub count: u64,
    /// Most recent encoder error, rendered.
    pub last_error: String,
}

/// Totals gathered by the processing thread.
#[derive(Debug, Clone, Default)]
pub struct ProcessingReport {
    /// Frames taken off the queue.
    pub frames_processed: u64,
    /// Frames in which motion was detected.
    pub motion_frames: u64,
    /// Motion frames seen while opening a motion recording was backing off.
    pub motion_deferred: u64,
    /// Frames the detector could not analyse.
    pub detection_errors: u64,
    /// Motion sessions opened.
    pub sessions_started: u64,
    /// Motion sessions that ran to completion, including the one closed at
    /// shutdown.
    pub sessions: Vec<SessionSummary>,
    /// Messages delivered.
    pub notifications_sent: u64,
    /// Dispatch attempts that failed.
    pub notifications_failed: u64,
    /// Motion events swallowed by the throttle.
    pub notifications_suppressed: u64,
    /// Most recent dispatch failure, if any.
    pub last_dispatch_error: Option<DispatchError>,
    /// Finished continuous archive segments.
    pub default_segments: Vec<SegmentSummary>,
    /// Writer failures, fatal or tolerated; at most one entry per stream.
    pub stream_failures: Vec<StreamFailure>,
}

impl ProcessingReport {
    /// Failures recorded for `stream`.
    pub fn failure_count(&self, stream: StreamKind) -> u64 {
        self.stream_failures
            .iter()
            .find(|f| f.stream == stream)
            .map_or(0, |f| f.count)
    }

    /// Motion segments written across all sessions.
    pub fn motion_segments(&self) -> usize {
        self.sessions.iter().map(|s| s.segments.len()).sum()
    }
}

/// Failure tolerance and timing of the processing loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProcessingPolicy {
    pub tolerate_default: bool,
    pub tolerate_motion: bool,
    pub poll_interval: Duration,
    /// How long to keep waiting for capture after a stop was observed.
    pub shutdown_grace: Duration,
}

/// Owns every processing-side component.
pub(crate) struct Processor {
    detector: MotionDetector,
    archive: SegmentWriter,
    sessions: MotionSessionController,
    throttle: NotificationThrottle,
    policy: ProcessingPolicy,
    stop: Arc<AtomicBool>,
    metrics: Option<MetricsRegistry>,
    report: ProcessingReport,
    archive_failed: bool,
    fatal: Option<PipelineError>,
}

impl Processor {
    pub fn new(
        detector: MotionDetector,
        archive: SegmentWriter,
        sessions: MotionSessionController,
        throttle: NotificationThrottle,
        policy: ProcessingPolicy,
        stop: Arc<AtomicBool>,
        metrics: Option<MetricsRegistry>,
    ) -> Self {
        Self {
            detector,
            archive,
            sessions,
            throttle,
            policy,
            stop,
            metrics,
            report: ProcessingReport::default(),
            archive_failed: false,
            fatal: None,
        }
    }

    /// Opens the first archive segment before any frame arrives.
    pub fn open_archive(&mut self) -> Result<(), PipelineError> {
        if let Err(e) = self.archive.open() {
            self.archive_failed = true;
            self.record_failure(StreamKind::Default, e);
        }
        match self.fatal.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Drains the queue, then closes every writer.
    ///
    /// Returns once capture has exited and every queued frame was
    /// processed, or once capture has failed to exit within the shutdown
    /// grace after a stop.
    pub fn run(mut self, rx: FrameReceiver) -> (ProcessingReport, Option<PipelineError>) {
        let mut stop_seen: Option<Instant> = None;
        loop {
            match rx.pop(self.policy.poll_interval) {
                DequeueOutcome::Frame(frame) => self.process(&frame),
                DequeueOutcome::Drained => break,
                DequeueOutcome::Empty => {
                    if !self.stop.load(Ordering::Acquire) {
                        continue;
                    }
                    let since = *stop_seen.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.policy.shutdown_grace {
                        tracing::warn!("Capture still running after stop; closing writers");
                        break;
                    }
                }
            }
        }
        self.finish()
    }

    fn process(&mut self, frame: &Frame) {
        self.throttle.poll();

        let detection = self.detector.detect(frame);
        self.report.frames_processed += 1;
        if detection.motion {
            self.report.motion_frames += 1;
        }

        match self.sessions.on_frame(frame, detection.motion) {
            Ok(SessionEvent::Started { .. }) => {
                self.report.sessions_started += 1;
                self.notify(frame);
            }
            Ok(SessionEvent::Refreshed) => self.notify(frame),
            Ok(SessionEvent::Ended(summary)) => {
                self.throttle.reset();
                self.report.sessions.push(summary);
            }
            Ok(SessionEvent::Deferred) => self.report.motion_deferred += 1,
            Ok(SessionEvent::Idle | SessionEvent::Continued) => {}
            Err(e) => {
                self.throttle.reset();
                self.record_failure(StreamKind::Motion, e);
            }
        }

        if !self.archive_failed {
            if let Err(e) = self.archive.write(frame) {
                self.archive_failed = true;
                self.record_failure(StreamKind::Default, e);
            }
        }

        self.publish();
    }

    fn notify(&mut self, frame: &Frame) {
        let recording = self.sessions.current_path().map(|p| p.to_path_buf());
        if let ThrottleOutcome::Failed(e) =
            self.throttle.on_motion(frame.timestamp(), recording.as_deref())
        {
            tracing::warn!(error = %e, "Motion notification not dispatched");
        }
    }

    fn record_failure(&mut self, stream: StreamKind, error: EncodeError) {
        let failures = &mut self.report.stream_failures;
        match failures.iter_mut().find(|f| f.stream == stream) {
            Some(tally) => {
                tally.count += 1;
                tally.last_error = error.to_string();
            }
            None => failures.push(StreamFailure {
                stream,
                count: 1,
                last_error: error.to_string(),
            }),
        }

        let tolerated = match stream {
            StreamKind::Default => self.policy.tolerate_default,
            StreamKind::Motion => self.policy.tolerate_motion,
        };
        if tolerated {
            tracing::warn!(stream = %stream, error = %error, "Writer failed; continuing without it");
        } else if self.fatal.is_none() {
            tracing::error!(stream = %stream, error = %error, "Writer failed; stopping pipeline");
            self.stop.store(true, Ordering::Release);
            self.fatal = Some(PipelineError::Encode {
                stream,
                source: error,
            });
        }
    }

    fn finish(mut self) -> (ProcessingReport, Option<PipelineError>) {
        match self.sessions.shutdown() {
            Ok(Some(summary)) => self.report.sessions.push(summary),
            Ok(None) => {}
            Err(e) => self.record_failure(StreamKind::Motion, e),
        }
        if let Err(e) = self.archive.close() {
            self.record_failure(StreamKind::Default, e);
        }
        self.throttle.close(self.policy.shutdown_grace);
        self.publish();

        self.report.default_segments = self.archive.take_completed();
        self.report.detection_errors = self.detector.error_count();
        self.report.notifications_sent = self.throttle.sent();
        self.report.notifications_failed = self.throttle.failed();
        self.report.notifications_suppressed = self.throttle.suppressed();
        self.report.last_dispatch_error = self.throttle.last_error().cloned();

        tracing::info!(
            frames = self.report.frames_processed,
            motion_frames = self.report.motion_frames,
            sessions = self.report.sessions_started,
            notifications = self.report.notifications_sent,
            "Processing finished"
        );

        let report = std::mem::take(&mut self.report);
        (report, self.fatal.take())
    }

    fn publish(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };

        let archive_segments = self.archive.completed_segments().len() as u64
            + u64::from(self.archive.current_path().is_some());
        let motion_segments =
            self.report.motion_segments() as u64 + u64::from(self.sessions.is_recording());

        metrics.update_processing(&ProcessingSnapshot {
            frames_processed: self.report.frames_processed,
            motion_frames: self.report.motion_frames,
            detection_errors: self.detector.error_count(),
            default_segments: archive_segments,
            motion_segments,
            motion_sessions: self.report.sessions_started,
            motion_active: self.sessions.is_recording(),
            notifications_sent: self.throttle.sent(),
            notifications_failed: self.throttle.failed(),
            notifications_suppressed: self.throttle.suppressed(),
            default_failures: self.report.failure_count(StreamKind::Default),
            motion_failures: self.report.failure_count(StreamKind::Motion),
        });
    }
}
