//! Capture/processing orchestration.
//!
//! A run uses exactly two threads joined by one bounded queue:
//!
//! ```text
//! FrameSource ─► capture thread ─► FrameQueue ─► processing thread
//!                                                 ├─ MotionDetector
//!                                                 ├─ MotionSessionController ─► motion segments
//!                                                 ├─ NotificationThrottle ─► Notifier
//!                                                 └─ SegmentWriter ─► archive segments
//! ```
//!
//! Notifications are delivered on a third, `notifier` thread so that a slow
//! backend never holds up processing.
//!
//! Shutdown (external stop, end of stream or a fatal error) runs in a
//! fixed order: capture stops, processing drains the queue and closes the
//! motion writer then the archive writer, and finally the source is
//! closed. Only then is the outcome reported.

mod capture;
mod processing;
mod queue;

pub use processing::{ProcessingReport, StreamFailure};
pub use queue::{frame_queue, DequeueOutcome, EnqueueOutcome, FrameReceiver, FrameSender};

use crate::capture::{FrameSource, SourceError};
use crate::config::{
    ConfigError, DetectionConfig, MonitorConfig, MotionConfig, PipelineSettings, RecordingConfig,
};
use crate::detection::MotionDetector;
use crate::metrics::MetricsRegistry;
use crate::notify::{NotificationThrottle, Notifier};
use crate::recording::{
    EncodeError, EncoderFactory, MotionSessionController, PathTemplate, SegmentConfig,
    SegmentWriter, StreamKind, StreamSpec,
};
use processing::{ProcessingPolicy, Processor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often shutdown checks whether the capture thread has exited.
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source could not deliver a frame.
    #[error("frame source failed: {0}")]
    Source(#[from] SourceError),
    /// A writer failed and its stream is not tolerated.
    #[error("{stream} stream writer failed: {source}")]
    Encode {
        /// Failing stream.
        stream: StreamKind,
        /// Underlying encoder error.
        #[source]
        source: EncodeError,
    },
    /// Components rejected the configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A worker thread panicked.
    #[error("{0} thread panicked")]
    TaskPanicked(&'static str),
    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: &'static str,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Why capture stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source reported end of stream.
    EndOfStream,
    /// A stop was requested (externally or after a fatal writer error).
    Stopped,
    /// The source failed to deliver a frame.
    SourceFailed,
    /// The capture thread did not exit within the shutdown grace period.
    Detached,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Frames read from the source.
    pub frames_captured: u64,
    /// Frames dropped on a full queue.
    pub frames_dropped: u64,
    /// Why capture ended.
    pub stop_reason: StopReason,
    /// Processing-side totals.
    pub processing: ProcessingReport,
}

/// Requests a cooperative stop of a running pipeline.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Asks capture to stop; processing drains what is queued.
    pub fn stop(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            tracing::info!("Stop requested");
        }
    }

    /// Returns true once a stop was requested or the run is shutting down.
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Parts of the configuration the pipeline consumes.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Output directories and rotation budgets.
    pub recording: RecordingConfig,
    /// Detector tuning.
    pub detection: DetectionConfig,
    /// Session cooldown.
    pub motion: MotionConfig,
    /// Queue sizing, timing and failure tolerance.
    pub settings: PipelineSettings,
}

impl PipelineConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recording.validate()?;
        self.detection.validate()?;
        self.settings.validate()
    }
}

impl From<&MonitorConfig> for PipelineConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            recording: config.recording.clone(),
            detection: config.detection.clone(),
            motion: config.motion.clone(),
            settings: config.pipeline.clone(),
        }
    }
}

/// Runs a frame source through detection, recording and notification.
pub struct Pipeline {
    config: PipelineConfig,
    factory: Arc<dyn EncoderFactory>,
    notifier: Box<dyn Notifier>,
    metrics: Option<MetricsRegistry>,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    /// Creates a pipeline after validating its configuration.
    pub fn new(
        config: PipelineConfig,
        factory: Arc<dyn EncoderFactory>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            notifier,
            metrics: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Publishes run metrics into `registry`.
    pub fn with_metrics(mut self, registry: MetricsRegistry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Handle for stopping the run from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Runs until end of stream, a stop request, or a fatal error.
    ///
    /// The source is closed before this returns, except when a wedged
    /// read outlives the shutdown grace period; the capture thread is then
    /// detached and drops the source once the read returns.
    pub fn run<S>(self, mut source: S) -> Result<PipelineReport, PipelineError>
    where
        S: FrameSource + 'static,
    {
        let Self {
            config,
            factory,
            notifier,
            metrics,
            stop,
        } = self;

        let stream = StreamSpec {
            width: source.width(),
            height: source.height(),
            fps: source.effective_fps(),
        };
        let capacity = config.settings.queue_capacity_for(stream.fps);

        let built = build_processor(&config, factory, notifier, stream, &stop, metrics.clone());
        let mut processor = match built {
            Ok(processor) => processor,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };
        if let Err(e) = processor.open_archive() {
            source.close();
            return Err(e);
        }

        tracing::info!(
            width = stream.width,
            height = stream.height,
            fps = stream.fps,
            capacity,
            "Pipeline starting"
        );

        let (tx, rx) = frame_queue(capacity);

        let capture_stop = Arc::clone(&stop);
        let capture_metrics = metrics.clone();
        let capture = thread::Builder::new()
            .name("capture".into())
            .spawn(move || capture::run(source, tx, capture_stop, capture_metrics))
            .map_err(|source| PipelineError::Spawn {
                name: "capture",
                source,
            })?;

        let processing = match thread::Builder::new()
            .name("processing".into())
            .spawn(move || processor.run(rx))
        {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::Release);
                finish_capture(capture, config.settings.shutdown_grace());
                return Err(PipelineError::Spawn {
                    name: "processing",
                    source: e,
                });
            }
        };

        let processed = processing.join();
        stop.store(true, Ordering::Release);
        let captured = finish_capture(capture, config.settings.shutdown_grace());

        let (processing_report, processing_error) =
            processed.map_err(|_| PipelineError::TaskPanicked("processing"))?;

        let Some(captured) = captured else {
            return Err(PipelineError::TaskPanicked("capture"));
        };

        let report = PipelineReport {
            frames_captured: captured.frames_captured,
            frames_dropped: captured.frames_dropped,
            stop_reason: captured.reason,
            processing: processing_report,
        };

        tracing::info!(
            captured = report.frames_captured,
            dropped = report.frames_dropped,
            processed = report.processing.frames_processed,
            reason = ?report.stop_reason,
            "Pipeline finished"
        );

        if let Some(error) = captured.error {
            return Err(PipelineError::Source(error));
        }
        if let Some(error) = processing_error {
            return Err(error);
        }
        Ok(report)
    }
}

/// What remains of the capture thread after shutdown.
struct CaptureTotals {
    frames_captured: u64,
    frames_dropped: u64,
    reason: StopReason,
    error: Option<SourceError>,
}

/// Waits up to `grace` for the capture thread, then closes its source.
///
/// Returns `None` if the thread panicked.
fn finish_capture<S: FrameSource>(
    handle: thread::JoinHandle<capture::CaptureResult<S>>,
    grace: Duration,
) -> Option<CaptureTotals> {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::error!(
                grace_ms = grace.as_millis() as u64,
                "Capture thread did not exit in time; detaching it"
            );
            return Some(CaptureTotals {
                frames_captured: 0,
                frames_dropped: 0,
                reason: StopReason::Detached,
                error: None,
            });
        }
        thread::sleep(JOIN_POLL);
    }

    match handle.join() {
        Ok(mut result) => {
            result.source.close();
            tracing::debug!("Frame source closed");
            Some(CaptureTotals {
                frames_captured: result.frames_captured,
                frames_dropped: result.frames_dropped,
                reason: result.reason,
                error: result.error,
            })
        }
        Err(_) => {
            tracing::error!("Capture thread panicked");
            None
        }
    }
}

fn build_processor(
    config: &PipelineConfig,
    factory: Arc<dyn EncoderFactory>,
    notifier: Box<dyn Notifier>,
    stream: StreamSpec,
    stop: &Arc<AtomicBool>,
    metrics: Option<MetricsRegistry>,
) -> Result<Processor, PipelineError> {
    let detector = MotionDetector::new(config.detection.clone())?;
    let segment =
        SegmentConfig::from_recording(&config.recording, stream.width, stream.height, stream.fps);

    let archive = SegmentWriter::new(
        StreamKind::Default,
        segment.clone(),
        PathTemplate::archive(&config.recording.output_dir, factory.extension()),
        Arc::clone(&factory),
    )?;
    let sessions = MotionSessionController::new(
        config.motion.cooldown(),
        segment,
        &config.recording.motion_dir,
        factory,
    )?;

    let throttle = NotificationThrottle::new(notifier, config.settings.notification_retry())
        .map_err(|source| PipelineError::Spawn {
            name: "notifier",
            source,
        })?;

    Ok(Processor::new(
        detector,
        archive,
        sessions,
        throttle,
        ProcessingPolicy {
            tolerate_default: config.settings.tolerate_default_failure,
            tolerate_motion: config.settings.tolerate_motion_failure,
            poll_interval: config.settings.poll_interval(),
            shutdown_grace: config.settings.shutdown_grace(),
        },
        Arc::clone(stop),
        metrics,
    ))
}
