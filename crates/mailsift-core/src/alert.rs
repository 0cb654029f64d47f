//! Operator alerts.
//!
//! Fatal failures (revoked credentials, broken storage) are not retried; they
//! must reach a human instead. Where they go is up to the [`AlertSink`].

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::error;

use crate::error::{Error, ErrorKind};

/// A condition that needs operator attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Mailbox affected.
    pub mailbox: String,
    /// Message being processed when the failure happened, if any.
    pub message_id: Option<String>,
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// Full failure description (never shown to end users).
    pub detail: String,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Builds an alert describing `error` on `mailbox`.
    #[must_use]
    pub fn from_error(mailbox: &str, error: &Error) -> Self {
        Self {
            mailbox: mailbox.to_string(),
            message_id: error.message_id().map(str::to_string),
            kind: error.kind(),
            detail: error.to_string(),
            raised_at: Utc::now(),
        }
    }
}

/// Destination for operator alerts.
pub trait AlertSink: Send + Sync {
    /// Delivers an alert. Must not block for long.
    fn raise(&self, alert: Alert);
}

/// Sink that logs alerts at error level on the `mailsift::alert` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: Alert) {
        error!(
            target: "mailsift::alert",
            mailbox = %alert.mailbox,
            message_id = alert.message_id.as_deref().unwrap_or("-"),
            kind = %alert.kind,
            "Operator attention required: {}",
            alert.detail
        );
    }
}

/// Sink that keeps alerts in memory.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts raised so far.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert);
    }
}
