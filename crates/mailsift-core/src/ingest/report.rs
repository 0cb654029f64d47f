//! Cycle outcome reporting.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What storing a message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOutcome {
    /// First time this id was seen.
    Inserted,
    /// The id was already stored; nothing was written.
    AlreadyKnown,
}

/// What happened to the upstream read flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ReadMark {
    /// Marked read upstream and locally.
    Marked,
    /// The message disappeared upstream before it could be marked.
    Vanished,
    /// Marking failed; retried on the next cycle.
    Pending {
        /// Failure that deferred the mark.
        reason: String,
    },
}

/// Outcome for one message of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReport {
    /// Provider message id.
    pub id: String,
    /// Storage outcome.
    pub stored: StoreOutcome,
    /// Read-mark outcome.
    pub read: ReadMark,
    /// Table rows found in the body of a newly stored message.
    pub rows: usize,
}

/// Outcome of one ingestion cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Mailbox ingested.
    pub mailbox: String,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// When the cycle finished.
    pub finished_at: DateTime<Utc>,
    /// Per-message outcomes, in listing order.
    pub messages: Vec<MessageReport>,
    /// Read-marks carried over from earlier cycles and retried.
    pub pending_retried: usize,
    /// Carried-over read-marks that are now settled.
    pub pending_cleared: usize,
    /// Whether the cycle stopped early on request.
    pub cancelled: bool,
}

impl CycleReport {
    pub(crate) fn new(mailbox: &str) -> Self {
        let now = Utc::now();
        Self {
            mailbox: mailbox.to_string(),
            started_at: now,
            finished_at: now,
            messages: Vec::new(),
            pending_retried: 0,
            pending_cleared: 0,
            cancelled: false,
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// Messages stored for the first time.
    #[must_use]
    pub fn inserted(&self) -> usize {
        self.count(|m| m.stored == StoreOutcome::Inserted)
    }

    /// Messages that were already stored.
    #[must_use]
    pub fn already_known(&self) -> usize {
        self.count(|m| m.stored == StoreOutcome::AlreadyKnown)
    }

    /// Messages marked read.
    #[must_use]
    pub fn marked(&self) -> usize {
        self.count(|m| m.read == ReadMark::Marked)
    }

    /// Messages whose read-mark is deferred to a later cycle.
    #[must_use]
    pub fn read_pending(&self) -> usize {
        self.count(|m| matches!(m.read, ReadMark::Pending { .. }))
    }

    fn count(&self, predicate: impl Fn(&MessageReport) -> bool) -> usize {
        self.messages.iter().filter(|m| predicate(m)).count()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} listed, {} new, {} known, {} marked read, {} pending",
            self.mailbox,
            self.messages.len(),
            self.inserted(),
            self.already_known(),
            self.marked(),
            self.read_pending()
        )?;
        if self.pending_retried > 0 {
            write!(
                f,
                ", {}/{} carried-over marks settled",
                self.pending_cleared, self.pending_retried
            )?;
        }
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}
