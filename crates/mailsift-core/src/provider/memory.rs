//! In-memory mailbox provider.
//!
//! Used as a test double and, loaded from a JSON fixture, for local runs
//! without a real mail account.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use super::{MailboxProvider, ProviderError};
use crate::Result;
use crate::model::{AttachmentMeta, InboundMessage, OutgoingAttachment, ReplyId};

/// A reply captured by [`MemoryMailbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReply {
    /// Id assigned to the reply.
    pub id: ReplyId,
    /// Message replied to.
    pub message_id: String,
    /// HTML body.
    pub body_html: String,
    /// Attachments sent along.
    pub attachments: Vec<OutgoingAttachment>,
}

#[derive(Debug)]
struct StoredEntry {
    message: InboundMessage,
    read: bool,
    attachments: Vec<(AttachmentMeta, Bytes)>,
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<StoredEntry>,
    list_failures: VecDeque<ProviderError>,
    mark_read_failures: HashMap<String, VecDeque<ProviderError>>,
    reply_failures: VecDeque<ProviderError>,
    mark_read_calls: Vec<String>,
    list_calls: usize,
    replies: Vec<SentReply>,
    latency: Option<Duration>,
}

/// Mailbox held entirely in memory.
///
/// Failures can be queued per operation; each queued failure is returned
/// once, in order, before the operation behaves normally again.
#[derive(Debug)]
pub struct MemoryMailbox {
    name: String,
    state: Mutex<State>,
}

impl MemoryMailbox {
    /// Creates an empty mailbox.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Loads a mailbox from a JSON fixture file.
    ///
    /// The fixture is an object with a `mailbox` name and a `messages` array
    /// of messages, each optionally carrying `attachments` with inline text
    /// `content`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn from_fixture_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let fixture: Fixture = serde_json::from_str(&contents)?;

        let mailbox = Self::new(fixture.mailbox);
        for entry in fixture.messages {
            let id = entry.message.id.clone();
            mailbox.push(entry.message);
            for attachment in entry.attachments {
                let content = Bytes::from(attachment.content.into_bytes());
                let meta = AttachmentMeta {
                    id: attachment.id,
                    name: attachment.name,
                    content_type: attachment.content_type,
                    size: content.len() as u64,
                };
                mailbox.add_attachment(&id, meta, content);
            }
        }
        Ok(mailbox)
    }

    /// Builder-style [`push`](Self::push).
    #[must_use]
    pub fn with_message(self, message: InboundMessage) -> Self {
        self.push(message);
        self
    }

    /// Adds an unread message.
    pub fn push(&self, message: InboundMessage) {
        self.lock().entries.push(StoredEntry {
            message,
            read: false,
            attachments: Vec::new(),
        });
    }

    /// Attaches content to the first message with `message_id`.
    pub fn add_attachment(&self, message_id: &str, meta: AttachmentMeta, content: Bytes) {
        if let Some(entry) = self.lock().entries.iter_mut().find(|e| e.message.id == message_id) {
            entry.attachments.push((meta, content));
        }
    }

    /// Deletes every message with `message_id`, as if removed upstream.
    pub fn remove(&self, message_id: &str) {
        self.lock().entries.retain(|e| e.message.id != message_id);
    }

    /// Queues a failure for the next `list_unread` call.
    pub fn fail_next_list(&self, error: ProviderError) {
        self.lock().list_failures.push_back(error);
    }

    /// Queues a failure for the next `mark_read` call on `message_id`.
    pub fn fail_mark_read(&self, message_id: &str, error: ProviderError) {
        self.lock()
            .mark_read_failures
            .entry(message_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Queues a failure for the next `send_reply` call.
    pub fn fail_next_reply(&self, error: ProviderError) {
        self.lock().reply_failures.push_back(error);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Upstream read state of a message, `None` if it does not exist.
    #[must_use]
    pub fn is_read(&self, message_id: &str) -> Option<bool> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.message.id == message_id)
            .map(|e| e.read)
    }

    /// Ids passed to `mark_read`, in call order.
    #[must_use]
    pub fn mark_read_calls(&self) -> Vec<String> {
        self.lock().mark_read_calls.clone()
    }

    /// Number of `list_unread` calls.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Replies sent so far.
    #[must_use]
    pub fn sent_replies(&self) -> Vec<SentReply> {
        self.lock().replies.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn attachments_of(
        state: &State,
        message_id: &str,
    ) -> std::result::Result<Vec<(AttachmentMeta, Bytes)>, ProviderError> {
        state
            .entries
            .iter()
            .find(|e| e.message.id == message_id)
            .map(|e| e.attachments.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("message {message_id}")))
    }
}

#[async_trait]
impl MailboxProvider for MemoryMailbox {
    fn mailbox(&self) -> &str {
        &self.name
    }

    async fn list_unread(&self) -> std::result::Result<Vec<InboundMessage>, ProviderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.list_calls += 1;
        if let Some(error) = state.list_failures.pop_front() {
            return Err(error);
        }
        Ok(state
            .entries
            .iter()
            .filter(|e| !e.read)
            .map(|e| e.message.clone())
            .collect())
    }

    async fn mark_read(&self, message_id: &str) -> std::result::Result<(), ProviderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.mark_read_calls.push(message_id.to_string());
        if let Some(error) = state
            .mark_read_failures
            .get_mut(message_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let mut found = false;
        for entry in state.entries.iter_mut().filter(|e| e.message.id == message_id) {
            entry.read = true;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("message {message_id}")))
        }
    }

    async fn list_attachments(
        &self,
        message_id: &str,
    ) -> std::result::Result<Vec<AttachmentMeta>, ProviderError> {
        self.simulate_latency().await;
        let state = self.lock();
        let attachments = Self::attachments_of(&state, message_id)?;
        Ok(attachments.into_iter().map(|(meta, _)| meta).collect())
    }

    async fn fetch_attachment_bytes(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> std::result::Result<Bytes, ProviderError> {
        self.simulate_latency().await;
        let state = self.lock();
        Self::attachments_of(&state, message_id)?
            .into_iter()
            .find(|(meta, _)| meta.id == attachment_id)
            .map(|(_, content)| content)
            .ok_or_else(|| ProviderError::NotFound(format!("attachment {attachment_id}")))
    }

    async fn send_reply(
        &self,
        message_id: &str,
        body_html: &str,
        attachments: &[OutgoingAttachment],
    ) -> std::result::Result<ReplyId, ProviderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        if let Some(error) = state.reply_failures.pop_front() {
            return Err(error);
        }
        if !state.entries.iter().any(|e| e.message.id == message_id) {
            return Err(ProviderError::NotFound(format!("message {message_id}")));
        }

        let id = ReplyId(format!("reply-{}", state.replies.len() + 1));
        state.replies.push(SentReply {
            id: id.clone(),
            message_id: message_id.to_string(),
            body_html: body_html.to_string(),
            attachments: attachments.to_vec(),
        });
        Ok(id)
    }
}

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default = "default_fixture_mailbox")]
    mailbox: String,
    #[serde(default)]
    messages: Vec<FixtureMessage>,
}

#[derive(Debug, Deserialize)]
struct FixtureMessage {
    #[serde(flatten)]
    message: InboundMessage,
    #[serde(default)]
    attachments: Vec<FixtureAttachment>,
}

#[derive(Debug, Deserialize)]
struct FixtureAttachment {
    id: String,
    name: String,
    #[serde(default = "default_content_type")]
    content_type: String,
    #[serde(default)]
    content: String,
}

fn default_fixture_mailbox() -> String {
    "inbox".to_string()
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use chrono::DateTime;

    use super::*;

    fn message(id: &str) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            sender: "a@x.com".to_string(),
            recipients: Vec::new(),
            subject: String::new(),
            body: String::new(),
            received_at: DateTime::parse_from_rfc3339("2026-01-05T08:00:00Z").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_mark_read_hides_from_listing() {
        let mailbox = MemoryMailbox::new("inbox")
            .with_message(message("m1"))
            .with_message(message("m2"));

        mailbox.mark_read("m1").await.unwrap();

        let unread = mailbox.list_unread().await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, "m2");
        assert_eq!(mailbox.is_read("m1"), Some(true));
    }

    #[tokio::test]
    async fn test_queued_failures_fire_once() {
        let mailbox = MemoryMailbox::new("inbox").with_message(message("m1"));
        mailbox.fail_mark_read("m1", ProviderError::Transient("throttled".into()));

        assert!(matches!(
            mailbox.mark_read("m1").await,
            Err(ProviderError::Transient(_))
        ));
        assert!(mailbox.mark_read("m1").await.is_ok());
        assert_eq!(mailbox.mark_read_calls(), vec!["m1", "m1"]);
    }

    #[tokio::test]
    async fn test_missing_message_is_not_found() {
        let mailbox = MemoryMailbox::new("inbox");
        assert!(matches!(
            mailbox.mark_read("gone").await,
            Err(ProviderError::NotFound(_))
        ));
        assert!(matches!(
            mailbox.fetch_attachment_bytes("gone", "a1").await,
            Err(ProviderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fixture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "mailbox": "reports",
                "messages": [{{
                    "id": "m1",
                    "sender": "a@x.com",
                    "recipients": ["ops@example.com"],
                    "body": "<table><tr><td>1</td></tr></table>",
                    "received_at": "2026-01-05T08:00:00+01:00",
                    "attachments": [{{"id": "a1", "name": "notes.txt", "content": "hello"}}]
                }}]
            }}"#
        )
        .unwrap();

        let mailbox = MemoryMailbox::from_fixture_file(file.path()).await.unwrap();
        assert_eq!(mailbox.mailbox(), "reports");

        let unread = mailbox.list_unread().await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].recipients, vec!["ops@example.com"]);

        let attachments = mailbox.list_attachments("m1").await.unwrap();
        assert_eq!(attachments[0].size, 5);
        assert_eq!(attachments[0].content_type, "application/octet-stream");
        let content = mailbox.fetch_attachment_bytes("m1", "a1").await.unwrap();
        assert_eq!(&content[..], b"hello");
    }
}
