//! On-demand actions on a single message.
//!
//! Unlike ingestion, these run at a caller's request and never retry:
//! a reply is not idempotent, so retrying is the caller's decision.

mod actions;
mod attachment;

pub use actions::MailActions;
pub use attachment::{AttachmentSource, DEFAULT_CONTENT_TYPE, ReplyAttachment};
