//! Prometheus metrics for the monitor.
//!
//! The capture and processing threads publish their running totals into a
//! shared [`MetricsRegistry`]; the counters are write-only telemetry and are
//! never read back for control flow.
//!
//! # Metrics Exposed
//!
//! ## Capture
//! - `motion_sentry_frames_captured_total` - Frames read from the source
//! - `motion_sentry_frames_dropped_total` - Frames dropped on a full queue
//! - `motion_sentry_queue_depth` - Frames waiting for processing
//!
//! ## Detection
//! - `motion_sentry_frames_processed_total` - Frames analysed
//! - `motion_sentry_motion_frames_total` - Frames with motion
//! - `motion_sentry_detection_errors_total` - Frames that failed analysis
//!
//! ## Recording
//! - `motion_sentry_segments_total{stream}` - Segment files opened
//! - `motion_sentry_writer_failures_total{stream}` - Writer failures
//! - `motion_sentry_motion_sessions_total` - Motion sessions started
//! - `motion_sentry_motion_active` - 1 while a motion recording is open
//!
//! ## Notification
//! - `motion_sentry_notifications_total{outcome}` - sent, failed, suppressed
//!
//! # Example
//!
//! ```no_run
//! use motion_sentry::metrics::{CaptureSnapshot, MetricsRegistry};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! registry.update_capture(&CaptureSnapshot {
//!     frames_captured: 120,
//!     frames_dropped: 0,
//!     queue_depth: 2,
//! });
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{CaptureSnapshot, MetricsError, MetricsRegistry, ProcessingSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
