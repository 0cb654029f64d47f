//! Graph mailbox client.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mailsift_core::{
    AttachmentMeta, InboundMessage, MailboxProvider, OutgoingAttachment, ProviderError, ReplyId,
};
use reqwest::header::{CONTENT_LENGTH, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use crate::token::TokenSource;
use crate::wire::{
    ATTACHMENT_SELECT, Draft, DraftBody, FileAttachment, GraphAttachment, GraphMessage,
    MESSAGE_SELECT, Page, ReadFlag,
};

/// Asks Graph for HTML bodies regardless of how the message was composed.
const PREFER_HTML: &str = "outlook.body-content-type=\"html\"";

/// Mailbox provider backed by the Microsoft Graph mail API.
#[derive(Debug)]
pub struct GraphMailbox {
    http: reqwest::Client,
    tokens: Arc<TokenSource>,
    user_root: Url,
    folder: String,
    page_size: u32,
    name: String,
}

impl GraphMailbox {
    /// Creates a client for the configured user's folder.
    ///
    /// No request is made until the first operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for incomplete settings or an
    /// unusable API base URL.
    pub fn new(config: &GraphConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let mut user_root = Url::parse(&config.api_base)?;
        user_root
            .path_segments_mut()
            .map_err(|()| Error::InvalidConfig(format!("{} is not a base URL", config.api_base)))?
            .pop_if_empty()
            .extend(["users", config.user.as_str()]);

        Ok(Self {
            tokens: Arc::new(TokenSource::new(http.clone(), config)),
            http,
            user_root,
            folder: config.folder.clone(),
            page_size: config.page_size,
            name: format!("{}/{}", config.user, config.folder),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.user_root.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidConfig(format!("{} is not a base URL", self.user_root)))?
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: impl Fn(&str) -> RequestBuilder) -> Result<Response> {
        send_authorized(&self.tokens, request).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let response = self
            .send(|token| {
                self.http
                    .get(url.clone())
                    .bearer_auth(token)
                    .header("Prefer", PREFER_HTML)
            })
            .await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn fetch_unread(&self) -> Result<Vec<InboundMessage>> {
        let mut url = self.url(&["mailFolders", &self.folder, "messages"])?;
        url.query_pairs_mut()
            .append_pair("$filter", "isRead eq false")
            .append_pair("$select", MESSAGE_SELECT)
            .append_pair("$top", &self.page_size.to_string());

        let mut messages = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let page: Page<GraphMessage> = self.get_json(&url).await?;
            messages.extend(page.value.into_iter().map(InboundMessage::from));
            next = page.next_link.as_deref().map(Url::parse).transpose()?;
        }

        debug!(mailbox = %self.name, count = messages.len(), "Fetched unread messages");
        Ok(messages)
    }

    async fn patch_read(&self, message_id: &str) -> Result<()> {
        let url = self.url(&["messages", message_id])?;
        let flag = ReadFlag { is_read: true };
        self.send(|token| self.http.patch(url.clone()).bearer_auth(token).json(&flag))
            .await?;
        Ok(())
    }

    async fn fetch_attachments(&self, message_id: &str) -> Result<Vec<AttachmentMeta>> {
        let mut url = self.url(&["messages", message_id, "attachments"])?;
        url.query_pairs_mut()
            .append_pair("$select", ATTACHMENT_SELECT);

        let page: Page<GraphAttachment> = self.get_json(&url).await?;
        Ok(page.value.into_iter().map(AttachmentMeta::from).collect())
    }

    async fn fetch_content(&self, message_id: &str, attachment_id: &str) -> Result<Bytes> {
        let url = self.url(&["messages", message_id, "attachments", attachment_id, "$value"])?;
        let response = self
            .send(|token| self.http.get(url.clone()).bearer_auth(token))
            .await?;
        Ok(response.bytes().await?)
    }

    async fn create_reply(&self, message_id: &str) -> Result<Draft> {
        let url = self.url(&["messages", message_id, "createReply"])?;
        let empty = serde_json::json!({});
        let response = self
            .send(|token| self.http.post(url.clone()).bearer_auth(token).json(&empty))
            .await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn complete_reply(
        &self,
        draft_id: &str,
        body_html: &str,
        attachments: &[OutgoingAttachment],
    ) -> Result<()> {
        let draft_url = self.url(&["messages", draft_id])?;
        let body = DraftBody::html(body_html);
        self.send(|token| self.http.patch(draft_url.clone()).bearer_auth(token).json(&body))
            .await?;

        let attachments_url = self.url(&["messages", draft_id, "attachments"])?;
        for attachment in attachments {
            let payload = FileAttachment::new(attachment);
            self.send(|token| {
                self.http
                    .post(attachments_url.clone())
                    .bearer_auth(token)
                    .json(&payload)
            })
            .await?;
        }

        let send_url = self.url(&["messages", draft_id, "send"])?;
        self.send(|token| {
            self.http
                .post(send_url.clone())
                .bearer_auth(token)
                .header(CONTENT_LENGTH, "0")
        })
        .await?;
        Ok(())
    }

    fn draft_guard(&self, draft_id: &str) -> Result<DraftGuard> {
        Ok(DraftGuard {
            http: self.http.clone(),
            tokens: Arc::clone(&self.tokens),
            url: Some(self.url(&["messages", draft_id])?),
            draft_id: draft_id.to_string(),
        })
    }
}

/// Sends an authenticated request built by `request`.
///
/// A 401 drops the cached token and retries once with a fresh one.
async fn send_authorized(
    tokens: &TokenSource,
    request: impl Fn(&str) -> RequestBuilder,
) -> Result<Response> {
    let token = tokens.access_token().await?;
    let mut response = request(&token).send().await?;

    if response.status() == StatusCode::UNAUTHORIZED {
        debug!("Access token rejected, requesting a new one");
        tokens.invalidate().await;
        let token = tokens.access_token().await?;
        response = request(&token).send().await?;
    }

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "Graph request failed");
    Err(Error::status(status.as_u16(), &body, retry_after))
}

/// Deletes an unsent reply draft unless the reply went out.
///
/// Dropping an armed guard, as happens when the reply future is cancelled
/// or times out part way, discards the draft from a background task.
struct DraftGuard {
    http: reqwest::Client,
    tokens: Arc<TokenSource>,
    url: Option<Url>,
    draft_id: String,
}

impl DraftGuard {
    fn disarm(mut self) {
        self.url = None;
    }

    async fn discard(mut self) {
        if let Some(url) = self.url.take() {
            discard_draft(&self.http, &self.tokens, &url, &self.draft_id).await;
        }
    }
}

impl Drop for DraftGuard {
    fn drop(&mut self) {
        let Some(url) = self.url.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(draft_id = %self.draft_id, "No runtime left to discard unsent reply draft");
            return;
        };

        let http = self.http.clone();
        let tokens = Arc::clone(&self.tokens);
        let draft_id = std::mem::take(&mut self.draft_id);
        debug!(draft_id, "Reply abandoned, discarding its draft");
        runtime.spawn(async move {
            discard_draft(&http, &tokens, &url, &draft_id).await;
        });
    }
}

async fn discard_draft(http: &reqwest::Client, tokens: &TokenSource, url: &Url, draft_id: &str) {
    let result =
        send_authorized(tokens, |token| http.delete(url.clone()).bearer_auth(token)).await;
    if let Err(e) = result {
        warn!(draft_id, "Failed to discard unsent reply draft: {e}");
    }
}

#[async_trait]
impl MailboxProvider for GraphMailbox {
    fn mailbox(&self) -> &str {
        &self.name
    }

    async fn list_unread(&self) -> std::result::Result<Vec<InboundMessage>, ProviderError> {
        self.fetch_unread()
            .await
            .map_err(|e| e.classify(&format!("folder {}", self.folder)))
    }

    async fn mark_read(&self, message_id: &str) -> std::result::Result<(), ProviderError> {
        self.patch_read(message_id)
            .await
            .map_err(|e| e.classify(&format!("message {message_id}")))
    }

    async fn list_attachments(
        &self,
        message_id: &str,
    ) -> std::result::Result<Vec<AttachmentMeta>, ProviderError> {
        self.fetch_attachments(message_id)
            .await
            .map_err(|e| e.classify(&format!("message {message_id}")))
    }

    async fn fetch_attachment_bytes(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> std::result::Result<Bytes, ProviderError> {
        self.fetch_content(message_id, attachment_id)
            .await
            .map_err(|e| e.classify(&format!("attachment {attachment_id} of message {message_id}")))
    }

    async fn send_reply(
        &self,
        message_id: &str,
        body_html: &str,
        attachments: &[OutgoingAttachment],
    ) -> std::result::Result<ReplyId, ProviderError> {
        let draft = self
            .create_reply(message_id)
            .await
            .map_err(|e| e.classify(&format!("message {message_id}")))?;

        let guard = self
            .draft_guard(&draft.id)
            .map_err(|e| e.classify(&format!("message {message_id}")))?;

        if let Err(e) = self.complete_reply(&draft.id, body_html, attachments).await {
            guard.discard().await;
            return Err(e.classify(&format!("reply draft for message {message_id}")));
        }
        guard.disarm();

        debug!(message_id, draft_id = %draft.id, "Reply sent");
        Ok(ReplyId(draft.id))
    }
}
