//! Notifier thread.
//!
//! Backends block on the network for up to their request timeout, so
//! delivery runs on its own thread and the processing thread only hands
//! over messages and collects outcomes.

use super::{DispatchError, Notifier};
use crossbeam::channel::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL: Duration = Duration::from_millis(10);

struct Request {
    id: u64,
    message: String,
}

/// Outcome of one delivery attempt.
#[derive(Debug)]
pub(crate) struct Completed {
    pub id: u64,
    pub result: Result<(), DispatchError>,
}

/// Owns the notifier on a dedicated thread.
pub(crate) struct DispatchWorker {
    backend: &'static str,
    requests: Option<Sender<Request>>,
    results: Receiver<Completed>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    /// Moves `notifier` onto a new `notifier` thread.
    pub fn spawn(mut notifier: Box<dyn Notifier>) -> std::io::Result<Self> {
        let backend = notifier.name();
        let (request_tx, request_rx) = channel::bounded::<Request>(1);
        let (result_tx, result_rx) = channel::unbounded();

        let handle = thread::Builder::new()
            .name("notifier".into())
            .spawn(move || {
                for request in request_rx.iter() {
                    let result = notifier.dispatch(&request.message);
                    if result_tx
                        .send(Completed {
                            id: request.id,
                            result,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                notifier.close();
                tracing::debug!(backend = notifier.name(), "Notifier closed");
            })?;

        Ok(Self {
            backend,
            requests: Some(request_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }

    /// Backend name of the wrapped notifier.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Hands a message to the notifier thread without blocking.
    ///
    /// Returns false when a delivery is already queued or the thread is gone.
    pub fn submit(&self, id: u64, message: String) -> bool {
        self.requests
            .as_ref()
            .is_some_and(|tx| tx.try_send(Request { id, message }).is_ok())
    }

    /// Next finished delivery, if any.
    pub fn try_complete(&self) -> Option<Completed> {
        self.results.try_recv().ok()
    }

    /// Waits up to `timeout` for the next finished delivery.
    pub fn wait(&self, timeout: Duration) -> Option<Completed> {
        self.results.recv_timeout(timeout).ok()
    }

    /// Stops accepting messages and waits up to `grace` for the delivery
    /// in progress. Returns the outcomes that arrived.
    pub fn shutdown(&mut self, grace: Duration) -> Vec<Completed> {
        self.requests = None;

        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + grace;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::error!(backend = self.backend, "Notifier thread panicked");
                }
            } else {
                tracing::warn!(
                    backend = self.backend,
                    grace_ms = grace.as_millis() as u64,
                    "Notification still in flight at shutdown; detaching notifier thread"
                );
            }
        }

        self.results.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;

    struct Slow(Duration);

    impl Notifier for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn dispatch(&mut self, _message: &str) -> Result<(), DispatchError> {
            thread::sleep(self.0);
            Ok(())
        }
    }

    #[test]
    fn test_delivers_off_thread() {
        let mut worker = DispatchWorker::spawn(Box::new(LogNotifier)).unwrap();
        assert_eq!(worker.backend(), "log");
        assert!(worker.submit(7, "hello".into()));

        let done = worker.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(done.id, 7);
        assert!(done.result.is_ok());
        assert!(worker.shutdown(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_submit_never_blocks() {
        let mut worker = DispatchWorker::spawn(Box::new(Slow(Duration::from_millis(300)))).unwrap();

        let started = Instant::now();
        let accepted = (0..5)
            .filter(|&id| worker.submit(id, "x".into()))
            .count();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!((1..=2).contains(&accepted), "{accepted}");

        let finished = worker.shutdown(Duration::from_secs(5));
        assert_eq!(finished.len(), accepted);
    }

    #[test]
    fn test_shutdown_detaches_stuck_delivery() {
        let mut worker = DispatchWorker::spawn(Box::new(Slow(Duration::from_secs(5)))).unwrap();
        assert!(worker.submit(0, "x".into()));
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        assert!(worker.shutdown(Duration::from_millis(100)).is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!worker.submit(1, "y".into()));
    }
}
