//! Metrics collection and registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Capture-side totals, published by the capture thread.
#[derive(Debug, Clone, Default)]
pub struct CaptureSnapshot {
    /// Frames read from the source.
    pub frames_captured: u64,
    /// Frames dropped because the queue was full.
    pub frames_dropped: u64,
    /// Frames waiting in the queue.
    pub queue_depth: usize,
}

/// Processing-side totals, published by the processing thread.
#[derive(Debug, Clone, Default)]
pub struct ProcessingSnapshot {
    /// Frames taken off the queue and analysed.
    pub frames_processed: u64,
    /// Frames in which motion was detected.
    pub motion_frames: u64,
    /// Frames the detector could not analyse.
    pub detection_errors: u64,
    /// Continuous archive segments opened.
    pub default_segments: u64,
    /// Motion recording segments opened.
    pub motion_segments: u64,
    /// Motion sessions started.
    pub motion_sessions: u64,
    /// Whether a motion recording is open.
    pub motion_active: bool,
    /// Notifications delivered.
    pub notifications_sent: u64,
    /// Notification attempts that failed.
    pub notifications_failed: u64,
    /// Notifications withheld by the throttle.
    pub notifications_suppressed: u64,
    /// Writer failures on the continuous archive.
    pub default_failures: u64,
    /// Writer failures on motion recordings.
    pub motion_failures: u64,
}

/// Prometheus metrics registry for the monitor.
///
/// Cloning shares the underlying collectors, so the capture and processing
/// threads can each hold a handle.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,

    // Capture metrics
    frames_captured: IntCounter,
    frames_dropped: IntCounter,
    queue_depth: IntGauge,

    // Detection metrics
    frames_processed: IntCounter,
    motion_frames: IntCounter,
    detection_errors: IntCounter,

    // Recording metrics
    segments: IntCounterVec,
    writer_failures: IntCounterVec,
    motion_sessions: IntCounter,
    motion_active: IntGauge,

    // Notification metrics
    notifications: IntCounterVec,
}

/// Raises `counter` to `total`; counters never go down.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

fn advance_label(counters: &IntCounterVec, label: &str, total: u64) {
    advance(&counters.with_label_values(&[label]), total);
}

impl MetricsRegistry {
    /// Creates a new registry with all monitor metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_captured = IntCounter::new(
            "motion_sentry_frames_captured_total",
            "Frames read from the source",
        )?;
        let frames_dropped = IntCounter::new(
            "motion_sentry_frames_dropped_total",
            "Frames dropped because the processing queue was full",
        )?;
        let queue_depth = IntGauge::new(
            "motion_sentry_queue_depth",
            "Frames waiting in the processing queue",
        )?;

        let frames_processed = IntCounter::new(
            "motion_sentry_frames_processed_total",
            "Frames analysed by the motion detector",
        )?;
        let motion_frames = IntCounter::new(
            "motion_sentry_motion_frames_total",
            "Frames in which motion was detected",
        )?;
        let detection_errors = IntCounter::new(
            "motion_sentry_detection_errors_total",
            "Frames the motion detector could not analyse",
        )?;

        let segments = IntCounterVec::new(
            Opts::new("motion_sentry_segments_total", "Segment files opened"),
            &["stream"],
        )?;
        let writer_failures = IntCounterVec::new(
            Opts::new(
                "motion_sentry_writer_failures_total",
                "Segment writer failures",
            ),
            &["stream"],
        )?;
        let motion_sessions = IntCounter::new(
            "motion_sentry_motion_sessions_total",
            "Motion sessions started",
        )?;
        let motion_active = IntGauge::new(
            "motion_sentry_motion_active",
            "Whether a motion recording is open (1=recording, 0=idle)",
        )?;

        let notifications = IntCounterVec::new(
            Opts::new(
                "motion_sentry_notifications_total",
                "Motion notifications by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(frames_captured.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(frames_processed.clone()))?;
        registry.register(Box::new(motion_frames.clone()))?;
        registry.register(Box::new(detection_errors.clone()))?;
        registry.register(Box::new(segments.clone()))?;
        registry.register(Box::new(writer_failures.clone()))?;
        registry.register(Box::new(motion_sessions.clone()))?;
        registry.register(Box::new(motion_active.clone()))?;
        registry.register(Box::new(notifications.clone()))?;

        Ok(Self {
            registry,
            frames_captured,
            frames_dropped,
            queue_depth,
            frames_processed,
            motion_frames,
            detection_errors,
            segments,
            writer_failures,
            motion_sessions,
            motion_active,
            notifications,
        })
    }

    /// Publishes capture-side totals.
    pub fn update_capture(&self, snapshot: &CaptureSnapshot) {
        advance(&self.frames_captured, snapshot.frames_captured);
        advance(&self.frames_dropped, snapshot.frames_dropped);
        self.queue_depth.set(snapshot.queue_depth as i64);
    }

    /// Publishes processing-side totals.
    pub fn update_processing(&self, snapshot: &ProcessingSnapshot) {
        advance(&self.frames_processed, snapshot.frames_processed);
        advance(&self.motion_frames, snapshot.motion_frames);
        advance(&self.detection_errors, snapshot.detection_errors);

        advance_label(&self.segments, "default", snapshot.default_segments);
        advance_label(&self.segments, "motion", snapshot.motion_segments);
        advance_label(&self.writer_failures, "default", snapshot.default_failures);
        advance_label(&self.writer_failures, "motion", snapshot.motion_failures);
        advance(&self.motion_sessions, snapshot.motion_sessions);
        self.motion_active.set(i64::from(snapshot.motion_active));

        advance_label(&self.notifications, "sent", snapshot.notifications_sent);
        advance_label(&self.notifications, "failed", snapshot.notifications_failed);
        advance_label(
            &self.notifications,
            "suppressed",
            snapshot.notifications_suppressed,
        );
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_capture_update() {
        let registry = MetricsRegistry::new().unwrap();

        registry.update_capture(&CaptureSnapshot {
            frames_captured: 10,
            frames_dropped: 2,
            queue_depth: 3,
        });

        let output = registry.encode().unwrap();
        assert!(output.contains("motion_sentry_frames_captured_total 10"));
        assert!(output.contains("motion_sentry_frames_dropped_total 2"));
        assert!(output.contains("motion_sentry_queue_depth 3"));
    }

    #[test]
    fn test_counters_only_move_forward() {
        let registry = MetricsRegistry::new().unwrap();

        let mut snapshot = ProcessingSnapshot {
            frames_processed: 50,
            notifications_sent: 1,
            motion_active: true,
            ..Default::default()
        };
        registry.update_processing(&snapshot);

        snapshot.frames_processed = 40;
        snapshot.motion_active = false;
        registry.update_processing(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("motion_sentry_frames_processed_total 50"));
        assert!(output.contains("motion_sentry_motion_active 0"));
        assert!(output.contains(r#"motion_sentry_notifications_total{outcome="sent"} 1"#));
    }

    #[test]
    fn test_clones_share_collectors() {
        let registry = MetricsRegistry::new().unwrap();
        let handle = registry.clone();

        handle.update_processing(&ProcessingSnapshot {
            motion_segments: 2,
            ..Default::default()
        });

        let output = registry.encode().unwrap();
        assert!(output.contains(r#"motion_sentry_segments_total{stream="motion"} 2"#));
    }
}
