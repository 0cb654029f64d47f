//! # mailsift-core
//!
//! Mailbox ingestion pipeline for `MailSift`.
//!
//! This crate provides:
//! - Domain models and the error taxonomy shared by every surface
//! - The [`MailboxProvider`] capability and an in-memory implementation
//! - Deduplicating `SQLite` storage of ingested messages
//! - Leased ingestion cycles that store before marking read
//! - Attachment download and replies
//! - Operator alerts for fatal failures

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod alert;
mod error;
pub mod ingest;
pub mod model;
pub mod provider;
pub mod service;
pub mod settings;
pub mod store;

pub use alert::{Alert, AlertSink, LogAlertSink, RecordingAlertSink};
pub use error::{Error, ErrorKind, Result};
pub use ingest::{CancelHandle, Coordinator, CycleReport, MessageReport, ReadMark, StoreOutcome};
pub use model::{
    Attachment, AttachmentMeta, InboundMessage, MAX_PAGE_SIZE, Message, OutgoingAttachment, Page,
    ReplyId,
};
pub use provider::{MailboxProvider, MemoryMailbox, ProviderError};
pub use service::{AttachmentSource, MailActions, ReplyAttachment};
pub use settings::{ActionSettings, IngestSettings};
pub use store::{Lease, LeaseRepository, MessageRepository, PendingRead, UpsertOutcome};

pub use mailsift_html::TableRow;
