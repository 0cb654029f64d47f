//! Mailbox provider capability.
//!
//! The pipeline never talks to a mail protocol directly. Everything it needs
//! from a remote mailbox goes through [`MailboxProvider`]; authentication and
//! token refresh are internal to each implementation.

mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ErrorKind;
use crate::model::{AttachmentMeta, InboundMessage, OutgoingAttachment, ReplyId};

pub use memory::{MemoryMailbox, SentReply};

/// Errors reported by a mailbox provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The message or attachment no longer exists upstream.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or throttling failure; retryable.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The call did not complete in time; retryable.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Authentication or configuration failure.
    #[error("Fatal failure: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Classification of this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transient(_) | Self::Timeout(_) => ErrorKind::Transient,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Returns true if the call may be retried later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Remote source of messages and actions on them.
///
/// Listing order is provider-defined. Implementations must be safe to call
/// concurrently.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// Name of the mailbox this provider serves; scopes the ingestion lease.
    fn mailbox(&self) -> &str;

    /// Lists all currently unread messages.
    async fn list_unread(&self) -> Result<Vec<InboundMessage>, ProviderError>;

    /// Marks a message read upstream.
    async fn mark_read(&self, message_id: &str) -> Result<(), ProviderError>;

    /// Lists attachment metadata for a message.
    async fn list_attachments(&self, message_id: &str)
    -> Result<Vec<AttachmentMeta>, ProviderError>;

    /// Fetches the content of one attachment.
    async fn fetch_attachment_bytes(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Bytes, ProviderError>;

    /// Sends an HTML reply to a message.
    async fn send_reply(
        &self,
        message_id: &str,
        body_html: &str,
        attachments: &[OutgoingAttachment],
    ) -> Result<ReplyId, ProviderError>;
}

/// Runs a provider call, turning an overrun of `limit` into
/// [`ProviderError::Timeout`].
///
/// # Errors
///
/// Returns the call's own error, or `Timeout` if it did not finish in time.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let ok = with_timeout(Duration::from_secs(1), async { Ok::<_, ProviderError>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err = with_timeout(Duration::from_secs(1), async {
            Err::<(), _>(ProviderError::NotFound("m1".into()))
        })
        .await;
        assert_eq!(err, Err(ProviderError::NotFound("m1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_overrun_is_transient() {
        let limit = Duration::from_millis(50);
        let result = with_timeout(limit, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, ProviderError>(())
        })
        .await;

        assert_eq!(result, Err(ProviderError::Timeout(limit)));
        assert!(result.unwrap_err().is_retryable());
    }
}
