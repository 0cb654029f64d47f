//! Ingestion cycles.
//!
//! A cycle lists unread mail, stores each message, and only then marks it
//! read upstream. A crash anywhere in between leaves the message unread, so
//! the next cycle fetches it again; storing is idempotent, so that is safe.

mod cancel;
mod coordinator;
mod report;

pub use cancel::CancelHandle;
pub use coordinator::Coordinator;
pub use report::{CycleReport, MessageReport, ReadMark, StoreOutcome};
