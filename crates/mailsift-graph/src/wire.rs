//! Graph JSON payloads.

use chrono::{DateTime, FixedOffset};
use mailsift_core::{AttachmentMeta, InboundMessage, OutgoingAttachment};
use serde::{Deserialize, Serialize};

/// Fields requested when listing messages.
pub const MESSAGE_SELECT: &str = "id,subject,from,toRecipients,body,receivedDateTime";

/// Fields requested when listing attachments.
pub const ATTACHMENT_SELECT: &str = "id,name,contentType,size";

#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    #[serde(default)]
    pub body: Option<ItemBody>,
    pub received_date_time: DateTime<FixedOffset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

#[derive(Debug, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct ItemBody {
    #[serde(default)]
    pub content: String,
}

impl From<GraphMessage> for InboundMessage {
    fn from(message: GraphMessage) -> Self {
        Self {
            id: message.id,
            sender: message
                .from
                .map(|r| r.email_address.address)
                .unwrap_or_default(),
            recipients: message
                .to_recipients
                .into_iter()
                .map(|r| r.email_address.address)
                .collect(),
            subject: message.subject.unwrap_or_default(),
            body: message.body.map(|b| b.content).unwrap_or_default(),
            received_at: message.received_date_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphAttachment {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
}

impl From<GraphAttachment> for AttachmentMeta {
    fn from(attachment: GraphAttachment) -> Self {
        Self {
            id: attachment.id,
            name: attachment.name,
            content_type: attachment
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: attachment.size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Draft {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct DraftBody<'a> {
    pub body: HtmlBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlBody<'a> {
    pub content_type: &'static str,
    pub content: &'a str,
}

impl<'a> DraftBody<'a> {
    pub const fn html(content: &'a str) -> Self {
        Self {
            body: HtmlBody {
                content_type: "HTML",
                content,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment<'a> {
    #[serde(rename = "@odata.type")]
    pub odata_type: &'static str,
    pub name: &'a str,
    pub content_type: &'a str,
    pub content_bytes: String,
}

impl<'a> FileAttachment<'a> {
    pub fn new(attachment: &'a OutgoingAttachment) -> Self {
        use base64::Engine;

        Self {
            odata_type: "#microsoft.graph.fileAttachment",
            name: &attachment.name,
            content_type: &attachment.content_type,
            content_bytes: base64::engine::general_purpose::STANDARD.encode(&attachment.content),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFlag {
    pub is_read: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_message_conversion() {
        let json = r#"{
            "id": "AAMk1",
            "subject": "Daily totals",
            "from": {"emailAddress": {"name": "Reports", "address": "reports@x.com"}},
            "toRecipients": [{"emailAddress": {"address": "ops@x.com"}}],
            "body": {"contentType": "html", "content": "<table></table>"},
            "receivedDateTime": "2024-05-01T08:00:00Z"
        }"#;
        let message: InboundMessage = serde_json::from_str::<GraphMessage>(json).unwrap().into();

        assert_eq!(message.id, "AAMk1");
        assert_eq!(message.sender, "reports@x.com");
        assert_eq!(message.recipients, vec!["ops@x.com"]);
        assert_eq!(message.body, "<table></table>");
        assert_eq!(message.received_at.to_rfc3339(), "2024-05-01T08:00:00+00:00");
    }

    #[test]
    fn test_sparse_message() {
        let json = r#"{"id": "AAMk2", "receivedDateTime": "2024-05-01T08:00:00Z"}"#;
        let message: InboundMessage = serde_json::from_str::<GraphMessage>(json).unwrap().into();
        assert!(message.sender.is_empty());
        assert!(message.body.is_empty());
    }

    #[test]
    fn test_file_attachment_payload() {
        let outgoing = OutgoingAttachment {
            name: "a.txt".into(),
            content_type: "text/plain".into(),
            content: Bytes::from_static(b"hi"),
        };
        let json = serde_json::to_value(FileAttachment::new(&outgoing)).unwrap();
        assert_eq!(json["@odata.type"], "#microsoft.graph.fileAttachment");
        assert_eq!(json["contentType"], "text/plain");
        assert_eq!(json["contentBytes"], "aGk=");
    }
}
