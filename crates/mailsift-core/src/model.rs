//! Domain models.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Utc};
use mailsift_html::TableRow;
use serde::{Deserialize, Serialize};

/// Largest page [`Page::new`] accepts.
pub const MAX_PAGE_SIZE: u32 = 500;

/// A message as reported by the mailbox provider.
///
/// Everything the provider returns from a listing of unread mail; read state
/// is implicitly false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider-assigned id, globally unique.
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Recipient addresses, in header order.
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Raw HTML body.
    #[serde(default)]
    pub body: String,
    /// When the provider received the message.
    pub received_at: DateTime<FixedOffset>,
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Provider-assigned id.
    pub id: String,
    /// Mailbox the message was ingested from.
    pub mailbox: String,
    /// Sender address.
    pub sender: String,
    /// Recipient addresses.
    pub recipients: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Raw HTML body. Never changes once stored.
    pub body: String,
    /// When the provider received the message, with its original offset.
    pub received_at: DateTime<FixedOffset>,
    /// Whether the message has been marked read upstream.
    pub is_read: bool,
    /// When the message was first stored.
    pub stored_at: DateTime<Utc>,
}

impl Message {
    /// Builds the record stored for a freshly fetched message.
    #[must_use]
    pub fn from_inbound(mailbox: impl Into<String>, inbound: InboundMessage) -> Self {
        Self {
            id: inbound.id,
            mailbox: mailbox.into(),
            sender: inbound.sender,
            recipients: inbound.recipients,
            subject: inbound.subject,
            body: inbound.body,
            received_at: inbound.received_at,
            is_read: false,
            stored_at: Utc::now(),
        }
    }

    /// Rows of the first table in the body, recomputed on every call.
    #[must_use]
    pub fn rows(&self) -> Vec<TableRow> {
        mailsift_html::extract_rows(&self.body)
    }

    /// Short plain-text preview of the body.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        mailsift_html::html_to_preview(&self.body, max_chars)
    }
}

/// Attachment metadata, without content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// Attachment id, unique within its message.
    pub id: String,
    /// File name.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Size in bytes as reported by the provider.
    pub size: u64,
}

/// A downloaded attachment. Content is never cached beyond the request.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Metadata.
    pub meta: AttachmentMeta,
    /// Raw content.
    pub content: Bytes,
}

/// An attachment to send with a reply, already loaded into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    /// File name.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Raw content.
    pub content: Bytes,
}

/// Provider id of a sent reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyId(pub String);

impl std::fmt::Display for ReplyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Offset pagination for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Number of messages to skip.
    pub offset: u32,
    /// Maximum number of messages to return.
    pub limit: u32,
}

impl Page {
    /// Creates a page, clamping `limit` to `1..=MAX_PAGE_SIZE`.
    #[must_use]
    pub fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// The page after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            offset: self.offset.saturating_add(self.limit),
            limit: self.limit,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 50)
    }
}
