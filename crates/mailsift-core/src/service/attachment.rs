//! Reply attachments and size-bounded loading.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use crate::model::OutgoingAttachment;
use crate::{Error, Result};

/// Content type used when a reply attachment does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Where a reply attachment's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// Content already in memory.
    Bytes(Bytes),
    /// A file read when the reply is sent.
    File(PathBuf),
}

/// An attachment to send with a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyAttachment {
    /// File name shown to the recipient. Must not be empty.
    pub name: String,
    /// MIME type; [`DEFAULT_CONTENT_TYPE`] when absent.
    pub content_type: Option<String>,
    /// Content.
    pub source: AttachmentSource,
}

impl ReplyAttachment {
    /// Attachment from in-memory content.
    #[must_use]
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: Some(content_type.into()),
            source: AttachmentSource::Bytes(content.into()),
        }
    }

    /// Attachment read from `path`, named after the file.
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>, content_type: Option<String>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            content_type,
            source: AttachmentSource::File(path),
        }
    }

    /// Loads the content fully into memory, refusing anything over `limit`
    /// bytes.
    ///
    /// Files are checked against their metadata first and then read through
    /// a reader that stops one byte past the limit, so a file that grows
    /// while being read is still caught.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty name or an unreadable
    /// path, and [`Error::PayloadTooLarge`] when the content exceeds `limit`.
    pub async fn load(self, limit: u64) -> Result<OutgoingAttachment> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "attachment name must not be empty".into(),
            ));
        }

        let content = match self.source {
            AttachmentSource::Bytes(content) => {
                check_size(&self.name, content.len() as u64, limit)?;
                content
            }
            AttachmentSource::File(path) => read_bounded(&self.name, &path, limit).await?,
        };

        Ok(OutgoingAttachment {
            name: self.name,
            content_type: self
                .content_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            content,
        })
    }
}

fn check_size(name: &str, size: u64, limit: u64) -> Result<()> {
    if size > limit {
        return Err(Error::PayloadTooLarge {
            name: name.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

async fn read_bounded(name: &str, path: &std::path::Path, limit: u64) -> Result<Bytes> {
    let unreadable =
        |e: std::io::Error| Error::InvalidArgument(format!("cannot read {}: {e}", path.display()));

    let metadata = tokio::fs::metadata(path).await.map_err(unreadable)?;
    if !metadata.is_file() {
        return Err(Error::InvalidArgument(format!(
            "{} is not a file",
            path.display()
        )));
    }
    check_size(name, metadata.len(), limit)?;

    let file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    let mut content = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut content)
        .await?;
    check_size(name, content.len() as u64, limit)?;

    Ok(Bytes::from(content))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_bytes_within_limit() {
        let loaded = ReplyAttachment::from_bytes("a.csv", "text/csv", "x,y\n")
            .load(16)
            .await
            .unwrap();
        assert_eq!(loaded.name, "a.csv");
        assert_eq!(loaded.content_type, "text/csv");
        assert_eq!(loaded.content, Bytes::from_static(b"x,y\n"));
    }

    #[tokio::test]
    async fn test_limit_is_inclusive() {
        let exact = ReplyAttachment::from_bytes("a.bin", "", vec![0u8; 8]);
        let loaded = exact.load(8).await.unwrap();
        assert_eq!(loaded.content_type, DEFAULT_CONTENT_TYPE);

        let over = ReplyAttachment::from_bytes("a.bin", "", vec![0u8; 9]);
        let err = over.load(8).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let err = ReplyAttachment::from_bytes(" ", "text/plain", "x")
            .load(8)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.html");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"<p>ok</p>")
            .unwrap();

        let loaded = ReplyAttachment::from_file(&path, Some("text/html".into()))
            .load(1024)
            .await
            .unwrap();
        assert_eq!(loaded.name, "report.html");
        assert_eq!(loaded.content.len(), 9);

        let err = ReplyAttachment::from_file(&path, None)
            .load(4)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PayloadTooLarge {
                size: 9,
                limit: 4,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_caller_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReplyAttachment::from_file(dir.path().join("gone.pdf"), None)
            .load(1024)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = ReplyAttachment::from_file(dir.path(), None)
            .load(1024)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
