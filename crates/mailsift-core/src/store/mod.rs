//! Persistent storage.
//!
//! Messages are keyed by provider id. Inserting is a single conditional
//! statement, so concurrent ingestion runs can never store the same id twice.

mod lease;
mod repository;

pub use lease::{Lease, LeaseRepository};
pub use repository::{MessageRepository, PendingRead, UpsertOutcome};
