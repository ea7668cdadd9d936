//! Capture loop.

use super::queue::{EnqueueOutcome, FrameSender};
use super::StopReason;
use crate::capture::{FrameSource, SourceError};
use crate::metrics::{CaptureSnapshot, MetricsRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What the capture thread hands back to the orchestrator.
pub(crate) struct CaptureResult<S> {
    pub source: S,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub reason: StopReason,
    pub error: Option<SourceError>,
}

/// Reads frames until end of stream, a read failure, or the stop flag.
///
/// Sets the stop flag on exit so processing knows no more frames follow.
pub(crate) fn run<S: FrameSource>(
    mut source: S,
    mut tx: FrameSender,
    stop: Arc<AtomicBool>,
    metrics: Option<MetricsRegistry>,
) -> CaptureResult<S> {
    let mut captured = 0u64;
    let mut error = None;

    let reason = loop {
        if stop.load(Ordering::Acquire) {
            break StopReason::Stopped;
        }

        match source.read_frame() {
            Ok(Some(frame)) => {
                captured += 1;
                let sequence = frame.sequence();
                match tx.push(frame) {
                    EnqueueOutcome::Queued => {}
                    EnqueueOutcome::Dropped => {
                        if tx.dropped() == 1 {
                            tracing::warn!(sequence, "Processing queue full; dropping frames");
                        } else {
                            tracing::debug!(sequence, dropped = tx.dropped(), "Frame dropped");
                        }
                    }
                    EnqueueOutcome::Closed => break StopReason::Stopped,
                }
            }
            Ok(None) => {
                tracing::info!(frames = captured, "End of stream");
                break StopReason::EndOfStream;
            }
            Err(e) => {
                tracing::error!(error = %e, frames = captured, "Frame source failed");
                error = Some(e);
                break StopReason::SourceFailed;
            }
        }

        if let Some(metrics) = &metrics {
            metrics.update_capture(&CaptureSnapshot {
                frames_captured: captured,
                frames_dropped: tx.dropped(),
                queue_depth: tx.len(),
            });
        }
    };

    stop.store(true, Ordering::Release);

    if let Some(metrics) = &metrics {
        metrics.update_capture(&CaptureSnapshot {
            frames_captured: captured,
            frames_dropped: tx.dropped(),
            queue_depth: tx.len(),
        });
    }

    CaptureResult {
        source,
        frames_captured: captured,
        frames_dropped: tx.dropped(),
        reason,
        error,
    }
}
