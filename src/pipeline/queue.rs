//! Bounded frame queue between capture and processing.
//!
//! Capture never blocks: when the queue is full the incoming (newest)
//! frame is dropped and counted. Processing waits with a timeout so it can
//! observe the stop flag, and keeps receiving queued frames after the
//! sender is gone until the queue is empty.

use crate::capture::Frame;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Result of offering a frame to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Frame was accepted.
    Queued,
    /// Queue was full; the frame was discarded.
    Dropped,
    /// The receiver is gone.
    Closed,
}

/// Result of waiting for a frame.
#[derive(Debug)]
pub enum DequeueOutcome {
    /// Next frame in capture order.
    Frame(Frame),
    /// Nothing arrived within the timeout.
    Empty,
    /// The sender is gone and every queued frame has been received.
    Drained,
}

/// Capture-side handle.
pub struct FrameSender {
    tx: Sender<Frame>,
    queued: u64,
    dropped: u64,
}

impl FrameSender {
    /// Offers a frame without blocking.
    pub fn push(&mut self, frame: Frame) -> EnqueueOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.queued += 1;
                EnqueueOutcome::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Frames waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// True when no frames are waiting.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Frames accepted so far.
    pub fn queued(&self) -> u64 {
        self.queued
    }

    /// Frames dropped on a full queue so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Processing-side handle.
pub struct FrameReceiver {
    rx: Receiver<Frame>,
}

impl FrameReceiver {
    /// Waits up to `timeout` for the next frame.
    pub fn pop(&self, timeout: Duration) -> DequeueOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => DequeueOutcome::Frame(frame),
            Err(RecvTimeoutError::Timeout) => DequeueOutcome::Empty,
            Err(RecvTimeoutError::Disconnected) => DequeueOutcome::Drained,
        }
    }

    /// Frames waiting in the queue.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when no frames are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Creates a single-producer, single-consumer frame queue.
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    (
        FrameSender {
            tx,
            queued: 0,
            dropped: 0,
        },
        FrameReceiver { rx },
    )
}
