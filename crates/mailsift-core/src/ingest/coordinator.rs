//! Ingestion coordinator.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::cancel::CancelHandle;
use super::report::{CycleReport, MessageReport, ReadMark, StoreOutcome};
use crate::alert::{Alert, AlertSink};
use crate::error::ErrorKind;
use crate::model::{InboundMessage, Message};
use crate::provider::{MailboxProvider, ProviderError, with_timeout};
use crate::settings::IngestSettings;
use crate::store::{Lease, LeaseRepository, MessageRepository};
use crate::{Error, Result};

/// Runs ingestion cycles for one mailbox.
///
/// At most one cycle per mailbox runs at a time: within a process through a
/// local lock, across processes through a lease in the database. A cycle
/// that cannot get both fails with [`Error::LeaseUnavailable`] without
/// touching the mailbox.
pub struct Coordinator {
    provider: Arc<dyn MailboxProvider>,
    store: MessageRepository,
    leases: LeaseRepository,
    alerts: Arc<dyn AlertSink>,
    settings: IngestSettings,
    running: Mutex<()>,
    cycles: AtomicU64,
}

impl Coordinator {
    /// Creates a coordinator for the provider's mailbox.
    #[must_use]
    pub fn new(
        provider: Arc<dyn MailboxProvider>,
        store: MessageRepository,
        leases: LeaseRepository,
        alerts: Arc<dyn AlertSink>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            provider,
            store,
            leases,
            alerts,
            settings,
            running: Mutex::new(()),
            cycles: AtomicU64::new(0),
        }
    }

    /// Mailbox this coordinator ingests.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        self.provider.mailbox()
    }

    /// Runs one ingestion cycle.
    ///
    /// Every unread message is stored before it is marked read. Read-marks
    /// that failed in earlier cycles are retried first. Fatal failures are
    /// raised as alerts before being returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseUnavailable`] if another cycle holds the mailbox,
    /// a transient provider error if listing failed, or the first fatal
    /// failure of a message (wrapped with its id).
    pub async fn run_cycle(&self, cancel: &CancelHandle) -> Result<CycleReport> {
        let mailbox = self.mailbox().to_string();
        let result = self.guarded_cycle(&mailbox, cancel).await;

        match &result {
            Ok(report) => info!("Ingestion cycle finished: {report}"),
            Err(e) if e.kind() == ErrorKind::Fatal => {
                error!(mailbox = %mailbox, "Ingestion cycle failed: {e}");
                self.alerts.raise(Alert::from_error(&mailbox, e));
            }
            Err(e) => warn!(mailbox = %mailbox, kind = %e.kind(), "Ingestion cycle failed: {e}"),
        }
        result
    }

    async fn guarded_cycle(&self, mailbox: &str, cancel: &CancelHandle) -> Result<CycleReport> {
        let Ok(_running) = self.running.try_lock() else {
            debug!(mailbox, "A cycle is already running in this process");
            return Err(Error::LeaseUnavailable(mailbox.to_string()));
        };

        let holder = self.next_holder();
        let Some(mut lease) = self
            .leases
            .try_acquire(mailbox, &holder, self.settings.lease_ttl())
            .await?
        else {
            return Err(Error::LeaseUnavailable(mailbox.to_string()));
        };

        let result = self.leased_cycle(&mut lease, cancel).await;

        if let Err(e) = self.leases.release(lease).await {
            warn!(mailbox, "Failed to release ingestion lease: {e}");
        }
        result
    }

    async fn leased_cycle(&self, lease: &mut Lease, cancel: &CancelHandle) -> Result<CycleReport> {
        let mut report = CycleReport::new(&lease.mailbox);
        let mut renewal = Renewal::new(self.settings.lease_ttl());
        let worker = Worker {
            provider: Arc::clone(&self.provider),
            store: self.store.clone(),
            mailbox: lease.mailbox.clone(),
            timeout: self.settings.provider_timeout(),
        };

        self.retry_pending(&worker, lease, &mut renewal, cancel, &mut report)
            .await?;
        if report.cancelled {
            return Ok(report.finish());
        }

        let listed = with_timeout(worker.timeout, self.provider.list_unread()).await?;
        let listed = dedupe(listed);
        debug!(mailbox = %lease.mailbox, count = listed.len(), "Listed unread messages");

        self.ingest_listed(&worker, listed, lease, &mut renewal, cancel, &mut report)
            .await?;
        Ok(report.finish())
    }

    async fn retry_pending(
        &self,
        worker: &Worker,
        lease: &mut Lease,
        renewal: &mut Renewal,
        cancel: &CancelHandle,
        report: &mut CycleReport,
    ) -> Result<()> {
        let pending = self.store.pending_reads(&lease.mailbox).await?;
        if !pending.is_empty() {
            info!(mailbox = %lease.mailbox, count = pending.len(), "Retrying deferred read-marks");
        }

        for entry in pending {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }
            renewal.keep(&self.leases, lease).await?;

            report.pending_retried += 1;
            let mark = worker
                .mark_read(&entry.message_id)
                .await
                .map_err(|e| e.for_message(&entry.message_id))?;
            if !matches!(mark, ReadMark::Pending { .. }) {
                report.pending_cleared += 1;
            }
        }
        Ok(())
    }

    async fn ingest_listed(
        &self,
        worker: &Worker,
        listed: Vec<InboundMessage>,
        lease: &mut Lease,
        renewal: &mut Renewal,
        cancel: &CancelHandle,
        report: &mut CycleReport,
    ) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<Option<MessageReport>> = vec![None; listed.len()];
        let mut failure: Option<Error> = None;

        for (index, inbound) in listed.into_iter().enumerate() {
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    failure = Some(Error::Internal(e.to_string()));
                    break;
                }
            };

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = settle(joined, &mut outcomes) {
                    failure.get_or_insert(e);
                }
            }
            if failure.is_some() {
                break;
            }
            if cancel.is_cancelled() {
                info!(mailbox = %lease.mailbox, "Ingestion cycle cancelled");
                report.cancelled = true;
                break;
            }
            if let Err(e) = renewal.keep(&self.leases, lease).await {
                failure = Some(e);
                break;
            }

            let worker = worker.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (index, worker.process(inbound).await)
            });
        }

        // Messages already started always run to completion
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = settle(joined, &mut outcomes) {
                failure.get_or_insert(e);
            }
        }

        report.messages = outcomes.into_iter().flatten().collect();
        failure.map_or(Ok(()), Err)
    }

    fn next_holder(&self) -> String {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}:{cycle}:{}",
            std::process::id(),
            Utc::now().timestamp_millis()
        )
    }
}

/// Per-message work, cloned into each task.
#[derive(Clone)]
struct Worker {
    provider: Arc<dyn MailboxProvider>,
    store: MessageRepository,
    mailbox: String,
    timeout: Duration,
}

impl Worker {
    async fn process(self, inbound: InboundMessage) -> Result<MessageReport> {
        let id = inbound.id.clone();
        self.ingest(inbound).await.map_err(|e| e.for_message(id))
    }

    async fn ingest(&self, inbound: InboundMessage) -> Result<MessageReport> {
        let message = Message::from_inbound(&self.mailbox, inbound);
        let outcome = self.store.upsert_if_absent(&message).await?;

        let (stored, rows) = if outcome.inserted {
            let rows = message.rows().len();
            debug!(id = %message.id, rows, "Stored new message");
            (StoreOutcome::Inserted, rows)
        } else {
            debug!(id = %message.id, "Message already stored");
            (StoreOutcome::AlreadyKnown, 0)
        };

        let read = self.mark_read(&message.id).await?;
        Ok(MessageReport {
            id: message.id,
            stored,
            read,
            rows,
        })
    }

    /// Marks a stored message read upstream, then locally.
    ///
    /// The read-mark is recorded as pending before the upstream call and
    /// cleared only once the local flag is set, so an interrupted mark is
    /// finished by a later cycle. Retryable failures are reported as
    /// pending. A fatal failure stays recorded and is returned.
    async fn mark_read(&self, id: &str) -> Result<ReadMark> {
        self.store.begin_pending_read(&self.mailbox, id).await?;

        match with_timeout(self.timeout, self.provider.mark_read(id)).await {
            Ok(()) => {
                self.store.set_read(id).await?;
                self.store.clear_pending_read(id).await?;
                Ok(ReadMark::Marked)
            }
            Err(ProviderError::NotFound(_)) => {
                warn!(id, "Message vanished before it could be marked read");
                self.store.clear_pending_read(id).await?;
                Ok(ReadMark::Vanished)
            }
            Err(e) if e.is_retryable() => {
                let reason = e.to_string();
                warn!(id, "Deferring read-mark: {reason}");
                self.store
                    .record_pending_read(&self.mailbox, id, &reason)
                    .await?;
                Ok(ReadMark::Pending { reason })
            }
            Err(e) => {
                self.store
                    .record_pending_read(&self.mailbox, id, &e.to_string())
                    .await?;
                Err(e.into())
            }
        }
    }
}

/// Tracks when the lease needs extending: after half its period.
struct Renewal {
    every: Duration,
    last: Instant,
}

impl Renewal {
    fn new(ttl: Duration) -> Self {
        Self {
            every: ttl / 2,
            last: Instant::now(),
        }
    }

    async fn keep(&mut self, leases: &LeaseRepository, lease: &mut Lease) -> Result<()> {
        if self.last.elapsed() < self.every {
            return Ok(());
        }
        leases.renew(lease).await?;
        self.last = Instant::now();
        debug!(mailbox = %lease.mailbox, expires_at = %lease.expires_at, "Renewed lease");
        Ok(())
    }
}

fn dedupe(listed: Vec<InboundMessage>) -> Vec<InboundMessage> {
    let mut seen = HashSet::new();
    listed
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}

fn settle(
    joined: std::result::Result<(usize, Result<MessageReport>), JoinError>,
    outcomes: &mut [Option<MessageReport>],
) -> Result<()> {
    match joined {
        Ok((index, Ok(report))) => {
            if let Some(slot) = outcomes.get_mut(index) {
                *slot = Some(report);
            }
            Ok(())
        }
        Ok((_, Err(e))) => Err(e),
        Err(e) => Err(Error::Internal(format!("message worker failed: {e}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::alert::RecordingAlertSink;
    use crate::model::Page;
    use crate::provider::MemoryMailbox;

    fn inbound(id: &str, body: &str) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            sender: "alerts@example.com".to_string(),
            recipients: vec!["ops@example.com".to_string()],
            subject: format!("Report {id}"),
            body: body.to_string(),
            received_at: DateTime::parse_from_rfc3339("2024-03-01T09:30:00+02:00").unwrap(),
        }
    }

    struct Fixture {
        mailbox: Arc<MemoryMailbox>,
        store: MessageRepository,
        leases: LeaseRepository,
        alerts: Arc<RecordingAlertSink>,
        coordinator: Coordinator,
    }

    async fn fixture(mailbox: MemoryMailbox, settings: IngestSettings) -> Fixture {
        let mailbox = Arc::new(mailbox);
        let store = MessageRepository::in_memory().await.unwrap();
        let leases = LeaseRepository::in_memory().await.unwrap();
        let alerts = Arc::new(RecordingAlertSink::new());
        let coordinator = Coordinator::new(
            mailbox.clone(),
            store.clone(),
            leases.clone(),
            alerts.clone(),
            settings,
        );
        Fixture {
            mailbox,
            store,
            leases,
            alerts,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_stores_then_marks_read() {
        let body = "<table><tr><td>a</td></tr><tr><td>b</td></tr></table>";
        let f = fixture(
            MemoryMailbox::new("inbox")
                .with_message(inbound("m1", body))
                .with_message(inbound("m2", "<p>hi</p>")),
            IngestSettings::default(),
        )
        .await;

        let report = f.coordinator.run_cycle(&CancelHandle::new()).await.unwrap();

        assert_eq!(report.inserted(), 2);
        assert_eq!(report.marked(), 2);
        assert_eq!(report.messages[0].id, "m1");
        assert_eq!(report.messages[0].rows, 2);
        assert_eq!(report.messages[1].rows, 0);
        assert!(f.store.get("m1").await.unwrap().unwrap().is_read);
        assert_eq!(f.mailbox.is_read("m2"), Some(true));
    }

    #[tokio::test]
    async fn test_second_cycle_finds_nothing() {
        let f = fixture(
            MemoryMailbox::new("inbox").with_message(inbound("m1", "")),
            IngestSettings::default(),
        )
        .await;

        f.coordinator.run_cycle(&CancelHandle::new()).await.unwrap();
        let report = f.coordinator.run_cycle(&CancelHandle::new()).await.unwrap();

        assert!(report.messages.is_empty());
        assert_eq!(f.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transient_mark_read_is_retried_next_cycle() {
        let f = fixture(
            MemoryMailbox::new("inbox").with_message(inbound("m1", "")),
            IngestSettings::default(),
        )
        .await;
        f.mailbox
            .fail_mark_read("m1", ProviderError::Transient("throttled".into()));

        let first = f.coordinator.run_cycle(&CancelHandle::new()).await.unwrap();
        assert_eq!(first.read_pending(), 1);
        assert_eq!(first.inserted(), 1);
        assert!(!f.store.get("m1").await.unwrap().unwrap().is_read);
        assert_eq!(f.store.pending_reads("inbox").await.unwrap().len(), 1);

        let second = f.coordinator.run_cycle(&CancelHandle::new()).await.unwrap();
        assert_eq!(second.pending_retried, 1);
        assert_eq!(second.pending_cleared, 1);
        assert!(second.messages.is_empty());
        assert!(f.store.get("m1").await.unwrap().unwrap().is_read);
        assert!(f.store.pending_reads("inbox").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_message_stays_unread_locally() {
        let f = fixture(
            MemoryMailbox::new("inbox").with_message(inbound("m1", "")),
            IngestSettings::default(),
        )
        .await;
        f.mailbox
            .fail_mark_read("m1", ProviderError::NotFound("m1".into()));

        let report = f.coordinator.run_cycle(&CancelHandle::new()).await.unwrap();

        assert_eq!(report.messages[0].read, ReadMark::Vanished);
        assert!(!f.store.get("m1").await.unwrap().unwrap().is_read);
        assert!(f.store.pending_reads("inbox").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_mark_read_fails_cycle_and_alerts() {
        let settings = IngestSettings {
            max_concurrency: 1,
            ..IngestSettings::default()
        };
        let f = fixture(
            MemoryMailbox::new("inbox")
                .with_message(inbound("m1", ""))
                .with_message(inbound("m2", "")),
            settings,
        )
        .await;
        f.mailbox
            .fail_mark_read("m1", ProviderError::Fatal("token revoked".into()));

        let err = f
            .coordinator
            .run_cycle(&CancelHandle::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(err.message_id(), Some("m1"));
        // Stored and remembered, but nothing after it was scheduled
        assert!(f.store.get("m1").await.unwrap().is_some());
        assert!(f.store.get("m2").await.unwrap().is_none());
        assert_eq!(f.store.pending_reads("inbox").await.unwrap().len(), 1);

        let alerts = f.alerts.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_list_failure_is_transient_and_not_alerted() {
        let f = fixture(
            MemoryMailbox::new("inbox").with_message(inbound("m1", "")),
            IngestSettings::default(),
        )
        .await;
        f.mailbox
            .fail_next_list(ProviderError::Transient("503".into()));

        let err = f
            .coordinator
            .run_cycle(&CancelHandle::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(f.alerts.alerts().is_empty());
        assert_eq!(f.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_held_lease_blocks_cycle() {
        let f = fixture(
            MemoryMailbox::new("inbox").with_message(inbound("m1", "")),
            IngestSettings::default(),
        )
        .await;
        let other = f
            .leases
            .try_acquire("inbox", "elsewhere", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let err = f
            .coordinator
            .run_cycle(&CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LeaseUnavailable(_)));
        assert_eq!(f.mailbox.list_calls(), 0);

        f.leases.release(other).await.unwrap();
        assert!(f.coordinator.run_cycle(&CancelHandle::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_lease_released_after_cycle() {
        let f = fixture(MemoryMailbox::new("inbox"), IngestSettings::default()).await;

        f.coordinator.run_cycle(&CancelHandle::new()).await.unwrap();

        let lease = f
            .leases
            .try_acquire("inbox", "next", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(lease.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_listing_processed_once() {
        let f = fixture(
            MemoryMailbox::new("inbox")
                .with_message(inbound("m1", ""))
                .with_message(inbound("m1", "")),
            IngestSettings::default(),
        )
        .await;

        let report = f.coordinator.run_cycle(&CancelHandle::new()).await.unwrap();

        assert_eq!(report.messages.len(), 1);
        assert_eq!(f.mailbox.mark_read_calls(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_touches_nothing() {
        let f = fixture(
            MemoryMailbox::new("inbox").with_message(inbound("m1", "")),
            IngestSettings::default(),
        )
        .await;
        let cancel = CancelHandle::new();
        cancel.cancel();

        let report = f.coordinator.run_cycle(&cancel).await.unwrap();

        assert!(report.cancelled);
        assert!(report.messages.is_empty());
        assert_eq!(f.mailbox.is_read("m1"), Some(false));
        assert_eq!(f.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_slow_listing_times_out() {
        let settings = IngestSettings {
            provider_timeout_secs: 1,
            ..IngestSettings::default()
        };
        let f = fixture(
            MemoryMailbox::new("inbox").with_message(inbound("m1", "")),
            settings,
        )
        .await;
        f.mailbox.set_latency(Duration::from_secs(2));

        let err = f
            .coordinator
            .run_cycle(&CancelHandle::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_cycles_in_process_are_exclusive() {
        let mailbox = MemoryMailbox::new("inbox").with_message(inbound("m1", ""));
        mailbox.set_latency(Duration::from_millis(50));
        let f = fixture(mailbox, IngestSettings::default()).await;

        let cancel = CancelHandle::new();
        let (a, b) = tokio::join!(
            f.coordinator.run_cycle(&cancel),
            f.coordinator.run_cycle(&cancel)
        );

        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
        assert_eq!(f.store.list_all(Page::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bounded_concurrency_keeps_listing_order() {
        let mut mailbox = MemoryMailbox::new("inbox");
        for i in 0..10 {
            mailbox = mailbox.with_message(inbound(&format!("m{i}"), ""));
        }
        let settings = IngestSettings {
            max_concurrency: 3,
            ..IngestSettings::default()
        };
        let f = fixture(mailbox, settings).await;

        let report = f.coordinator.run_cycle(&CancelHandle::new()).await.unwrap();

        let ids: Vec<_> = report.messages.iter().map(|m| m.id.as_str()).collect();
        let expected: Vec<_> = (0..10).map(|i| format!("m{i}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(report.marked(), 10);
    }
}
