//! Operator notification.
//!
//! A [`Notifier`] delivers one text message to an operator channel. The
//! backend is chosen once at startup by name ([`NotifierKind::from_name`])
//! and wrapped in a [`NotificationThrottle`] that allows one message per
//! motion session. Delivery runs on a dedicated thread.

mod backends;
mod throttle;
mod worker;

pub use backends::{LineNotifier, LogNotifier, WebhookNotifier};
#[cfg(feature = "email")]
pub use backends::EmailNotifier;
pub use throttle::{motion_message, NotificationThrottle, ThrottleOutcome, ThrottleState};

use crate::config::{ConfigError, NotificationConfig};
use thiserror::Error;

/// Delivery failures. Never fatal; the throttle retries on a later motion
/// event once the retry interval has passed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{backend} request failed: {reason}")]
    Transport { backend: &'static str, reason: String },
    #[error("{backend} rejected the message with status {status}")]
    Rejected { backend: &'static str, status: u16 },
    #[error("could not build {backend} message: {reason}")]
    Message { backend: &'static str, reason: String },
}

/// A notification channel.
pub trait Notifier: Send {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Delivers `message`.
    fn dispatch(&mut self, message: &str) -> Result<(), DispatchError>;

    /// Releases connections held by the backend.
    fn close(&mut self) {}
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn dispatch(&mut self, message: &str) -> Result<(), DispatchError> {
        (**self).dispatch(message)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Notification backends known to the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierKind {
    /// LINE Notify HTTP API.
    Line,
    /// JSON POST to an arbitrary URL.
    Webhook,
    /// SMTP with STARTTLS.
    Email,
    /// Log line only.
    Log,
}

const NOTIFIER_NAMES: &[(&str, NotifierKind)] = &[
    ("line", NotifierKind::Line),
    ("webhook", NotifierKind::Webhook),
    ("email", NotifierKind::Email),
    ("log", NotifierKind::Log),
];

impl NotifierKind {
    /// Resolves a configured backend name (case-insensitive).
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        let wanted = name.trim().to_ascii_lowercase();
        NOTIFIER_NAMES
            .iter()
            .find(|(n, _)| *n == wanted)
            .map(|&(_, kind)| kind)
            .ok_or_else(|| ConfigError::UnknownNotifier(name.to_string()))
    }

    /// Canonical backend name.
    pub fn as_str(self) -> &'static str {
        NOTIFIER_NAMES
            .iter()
            .find(|(_, k)| *k == self)
            .map_or("unknown", |&(n, _)| n)
    }
}

/// Builds the configured notifier.
pub fn build_notifier(config: &NotificationConfig) -> Result<Box<dyn Notifier>, ConfigError> {
    let kind = NotifierKind::from_name(&config.method)?;
    let timeout = std::time::Duration::from_secs(config.timeout_secs.max(1));

    let notifier: Box<dyn Notifier> = match kind {
        NotifierKind::Line => Box::new(LineNotifier::new(&config.line, timeout)?),
        NotifierKind::Webhook => Box::new(WebhookNotifier::new(&config.webhook, timeout)?),
        #[cfg(feature = "email")]
        NotifierKind::Email => Box::new(EmailNotifier::new(&config.email, timeout)?),
        #[cfg(not(feature = "email"))]
        NotifierKind::Email => return Err(ConfigError::NotifierUnavailable("email")),
        NotifierKind::Log => Box::new(LogNotifier),
    };

    tracing::info!(backend = kind.as_str(), "Notifier ready");
    Ok(notifier)
}
