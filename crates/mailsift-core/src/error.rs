//! Error types for the core library.

use std::fmt;

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an unusable argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attachment exceeds the configured size limit.
    #[error("Attachment {name} is {size} bytes, limit is {limit}")]
    PayloadTooLarge {
        /// Attachment name.
        name: String,
        /// Observed size in bytes (at least `limit + 1` when read incrementally).
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// Mailbox provider call failed.
    #[error("Mailbox provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Another ingestion cycle holds the mailbox lease.
    #[error("Ingestion lease for mailbox {0} is held by another cycle")]
    LeaseUnavailable(String),

    /// Processing of a single message failed.
    #[error("Message {id}: {source}")]
    Message {
        /// Provider message id.
        id: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker task died.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wraps `self` with the id of the message being processed.
    #[must_use]
    pub fn for_message(self, id: impl Into<String>) -> Self {
        Self::Message {
            id: id.into(),
            source: Box::new(self),
        }
    }

    /// Id of the message this error belongs to, if any.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Message { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Classifies the error. Anything not explicitly classified is fatal.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Self::Provider(e) => e.kind(),
            Self::LeaseUnavailable(_) => ErrorKind::Transient,
            Self::Message { source, .. } => source.kind(),
            Self::Database(_)
            | Self::Serde(_)
            | Self::Io(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Returns true if the caller may retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Classification of failures exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller error; not retried.
    InvalidArgument,
    /// Referenced entity vanished upstream or locally.
    NotFound,
    /// Network or rate-limit failure; retry with backoff.
    Transient,
    /// Size policy violation; not retried.
    PayloadTooLarge,
    /// Auth, configuration or unclassified failure; needs an operator.
    Fatal,
}

impl ErrorKind {
    /// User-facing description that leaks no internal detail.
    #[must_use]
    pub const fn public_message(self) -> &'static str {
        match self {
            Self::InvalidArgument => "The request is invalid.",
            Self::NotFound => "The requested message or attachment no longer exists.",
            Self::Transient => "The mail service is temporarily unavailable. Try again later.",
            Self::PayloadTooLarge => "An attachment exceeds the allowed size.",
            Self::Fatal => "The mail service failed. An operator has been notified.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_provider_errors_keep_their_kind() {
        let not_found: Error = ProviderError::NotFound("m1".into()).into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let timeout: Error = ProviderError::Timeout(Duration::from_secs(5)).into();
        assert_eq!(timeout.kind(), ErrorKind::Transient);
        assert!(timeout.is_retryable());

        let fatal: Error = ProviderError::Fatal("token revoked".into()).into();
        assert_eq!(fatal.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_unclassified_errors_are_fatal() {
        assert_eq!(Error::Config("bad".into()).kind(), ErrorKind::Fatal);
        assert_eq!(Error::Internal("panic".into()).kind(), ErrorKind::Fatal);
        assert_eq!(
            Error::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_message_wrapper_delegates_kind() {
        let err = Error::Provider(ProviderError::Transient("429".into())).for_message("m7");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.message_id(), Some("m7"));
        assert!(err.to_string().starts_with("Message m7:"));
    }

    #[test]
    fn test_public_message_hides_detail() {
        let err = Error::Provider(ProviderError::Fatal("secret stack trace".into()));
        assert!(!err.kind().public_message().contains("secret"));
        assert_eq!(err.kind().to_string(), "fatal");
    }
}
