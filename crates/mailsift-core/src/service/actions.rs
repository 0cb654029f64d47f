//! Attachment download and reply.

use std::sync::Arc;

use tracing::{debug, info};

use super::attachment::ReplyAttachment;
use crate::model::{Attachment, AttachmentMeta, ReplyId};
use crate::provider::{MailboxProvider, with_timeout};
use crate::settings::ActionSettings;
use crate::{Error, Result};

/// Attachment and reply operations on messages of one mailbox.
pub struct MailActions {
    provider: Arc<dyn MailboxProvider>,
    settings: ActionSettings,
}

impl MailActions {
    /// Creates the handler.
    #[must_use]
    pub fn new(provider: Arc<dyn MailboxProvider>, settings: ActionSettings) -> Self {
        Self { provider, settings }
    }

    /// Lists attachment metadata of a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty id, otherwise the
    /// provider's failure.
    pub async fn list_attachments(&self, message_id: &str) -> Result<Vec<AttachmentMeta>> {
        require("message id", message_id)?;
        let attachments = with_timeout(
            self.settings.provider_timeout(),
            self.provider.list_attachments(message_id),
        )
        .await?;
        Ok(attachments)
    }

    /// Downloads one attachment with its metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty id, a `NotFound` kind
    /// if either id is stale, otherwise the provider's failure.
    pub async fn download_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Attachment> {
        require("message id", message_id)?;
        require("attachment id", attachment_id)?;

        let meta = self
            .list_attachments(message_id)
            .await?
            .into_iter()
            .find(|a| a.id == attachment_id)
            .ok_or_else(|| Error::NotFound(format!("attachment {attachment_id}")))?;

        let content = with_timeout(
            self.settings.provider_timeout(),
            self.provider
                .fetch_attachment_bytes(message_id, attachment_id),
        )
        .await?;

        debug!(message_id, attachment_id, size = content.len(), "Downloaded attachment");
        Ok(Attachment { meta, content })
    }

    /// Sends an HTML reply, with attachments loaded fully before sending.
    ///
    /// Nothing reaches the provider unless every argument is valid. Provider
    /// failures are returned as they are, without retry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty id, body, or attachment
    /// name, [`Error::PayloadTooLarge`] for an attachment over the configured
    /// limit, otherwise the provider's failure.
    pub async fn reply(
        &self,
        message_id: &str,
        content: &str,
        attachments: Vec<ReplyAttachment>,
    ) -> Result<ReplyId> {
        require("message id", message_id)?;
        require("reply body", content)?;

        let mut outgoing = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            outgoing.push(attachment.load(self.settings.max_attachment_bytes).await?);
        }

        let reply_id = with_timeout(
            self.settings.provider_timeout(),
            self.provider.send_reply(message_id, content, &outgoing),
        )
        .await?;

        info!(message_id, reply_id = %reply_id, attachments = outgoing.len(), "Sent reply");
        Ok(reply_id)
    }
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}
