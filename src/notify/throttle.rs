//! One-notification-per-session throttling.
//!
//! The throttle is driven by events: a motion event while `Waiting` hands a
//! message to the notifier thread, a successful delivery moves to
//! `Throttled`, and only the end of the motion session moves back to
//! `Waiting`. At most one delivery is in flight at a time. After a failed
//! delivery the next attempt waits for the retry interval, measured on the
//! frame timeline.

use super::worker::{Completed, DispatchWorker};
use super::{DispatchError, Notifier};
use chrono::{DateTime, Local};
use std::path::Path;
use std::time::{Duration, Instant};

/// Throttle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    /// Next motion event dispatches.
    Waiting,
    /// A notification went out for the current session.
    Throttled,
}

/// What the throttle did with a motion event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleOutcome {
    /// A message was handed to the notifier thread.
    Queued,
    /// A message already went out for this session.
    Suppressed,
    /// A delivery is in flight or the retry interval has not elapsed.
    Deferred,
    /// The notifier thread is gone.
    Failed(DispatchError),
}

/// Composes the operator message.
pub fn motion_message(at: DateTime<Local>, recording: Option<&Path>) -> String {
    let stamp = at.format("%Y-%m-%d %H:%M:%S");
    match recording {
        Some(path) => format!("Motion detected at {stamp} (recording {})", path.display()),
        None => format!("Motion detected at {stamp}"),
    }
}

/// Rate-limits a [`Notifier`] to one message per motion session.
pub struct NotificationThrottle {
    worker: DispatchWorker,
    state: ThrottleState,
    /// Bumped by every reset; identifies the session a delivery belongs to.
    generation: u64,
    in_flight: Option<u64>,
    last_attempt: Option<Instant>,
    retry_interval: Duration,
    retry_at: Option<Instant>,
    sent: u64,
    failed: u64,
    suppressed: u64,
    last_error: Option<DispatchError>,
}

impl NotificationThrottle {
    /// Moves `notifier` onto its own thread, starting in `Waiting`.
    pub fn new(notifier: Box<dyn Notifier>, retry_interval: Duration) -> std::io::Result<Self> {
        Ok(Self {
            worker: DispatchWorker::spawn(notifier)?,
            state: ThrottleState::Waiting,
            generation: 0,
            in_flight: None,
            last_attempt: None,
            retry_interval,
            retry_at: None,
            sent: 0,
            failed: 0,
            suppressed: 0,
            last_error: None,
        })
    }

    /// Handles a motion-bearing session event seen at frame time `at`.
    ///
    /// `recording` is the motion file being written, if known. Never
    /// blocks on the notifier.
    pub fn on_motion(&mut self, at: Instant, recording: Option<&Path>) -> ThrottleOutcome {
        self.poll();

        if self.state == ThrottleState::Throttled {
            self.suppressed += 1;
            return ThrottleOutcome::Suppressed;
        }
        if self.in_flight.is_some() || self.retry_at.is_some_and(|t| at < t) {
            return ThrottleOutcome::Deferred;
        }

        let message = motion_message(Local::now(), recording);
        if !self.worker.submit(self.generation, message) {
            let error = DispatchError::Transport {
                backend: self.worker.backend(),
                reason: "notifier thread is not accepting messages".into(),
            };
            self.failed += 1;
            self.last_error = Some(error.clone());
            return ThrottleOutcome::Failed(error);
        }

        self.in_flight = Some(self.generation);
        self.last_attempt = Some(at);
        ThrottleOutcome::Queued
    }

    /// Absorbs finished deliveries.
    pub fn poll(&mut self) {
        while let Some(done) = self.worker.try_complete() {
            self.complete(done);
        }
    }

    /// Waits up to `timeout` for the delivery in flight to finish.
    ///
    /// Returns true when nothing is in flight afterwards.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        if self.in_flight.is_some() {
            if let Some(done) = self.worker.wait(timeout) {
                self.complete(done);
            }
        }
        self.in_flight.is_none()
    }

    fn complete(&mut self, done: Completed) {
        self.in_flight = None;
        let current = done.id == self.generation;

        match done.result {
            Ok(()) => {
                self.sent += 1;
                self.retry_at = None;
                if current {
                    self.state = ThrottleState::Throttled;
                }
                tracing::info!(backend = self.worker.backend(), "Motion notification sent");
            }
            Err(e) => {
                self.failed += 1;
                if current {
                    self.retry_at = self.last_attempt.map(|t| t + self.retry_interval);
                }
                tracing::warn!(
                    backend = self.worker.backend(),
                    error = %e,
                    retry_secs = self.retry_interval.as_secs(),
                    "Motion notification failed; will retry"
                );
                self.last_error = Some(e);
            }
        }
    }

    /// Re-arms the throttle after a motion session ends.
    pub fn reset(&mut self) {
        self.poll();
        if self.state == ThrottleState::Throttled {
            tracing::debug!("Notification throttle re-armed");
        }
        self.state = ThrottleState::Waiting;
        self.generation += 1;
        self.retry_at = None;
    }

    /// Stops the notifier thread, waiting up to `grace` for a delivery in
    /// flight.
    pub fn close(&mut self, grace: Duration) {
        for done in self.worker.shutdown(grace) {
            self.complete(done);
        }
    }

    /// Current throttle state.
    pub fn state(&self) -> ThrottleState {
        self.state
    }

    /// True while a delivery is in progress.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Messages delivered.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Delivery attempts that failed.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Motion events swallowed while throttled.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Most recent delivery failure.
    pub fn last_error(&self) -> Option<&DispatchError> {
        self.last_error.as_ref()
    }
}
