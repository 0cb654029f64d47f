//! Ingestion lease storage.
//!
//! One row per mailbox names the cycle currently allowed to ingest it. A row
//! whose expiry has passed may be taken over, so a crashed holder blocks the
//! mailbox for at most one lease period.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::{Error, Result};

/// An exclusive, time-bounded claim on a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Mailbox the lease covers.
    pub mailbox: String,
    /// Unique holder token.
    pub holder: String,
    /// When the lease lapses unless renewed.
    pub expires_at: DateTime<Utc>,
    /// Lease period used for renewals.
    pub ttl: Duration,
}

/// Repository for ingestion leases.
#[derive(Debug, Clone)]
pub struct LeaseRepository {
    pool: SqlitePool,
}

impl LeaseRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS ingest_leases (
                mailbox TEXT PRIMARY KEY NOT NULL,
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_ms INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Claims `mailbox` for `holder` if it is free or its lease has expired.
    ///
    /// Returns `None` while another holder's lease is live, including a
    /// previous lease of the same holder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn try_acquire(
        &self,
        mailbox: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>> {
        let now = Utc::now();
        let expires_at = expiry(now, ttl);

        let result = sqlx::query(
            r"
            INSERT INTO ingest_leases (mailbox, holder, acquired_at, expires_ms)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(mailbox) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_ms = excluded.expires_ms
            WHERE ingest_leases.expires_ms <= ?
            ",
        )
        .bind(mailbox)
        .bind(holder)
        .bind(now.to_rfc3339())
        .bind(expires_at.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(mailbox, holder, "Lease is held elsewhere");
            return Ok(None);
        }

        debug!(mailbox, holder, %expires_at, "Acquired lease");
        Ok(Some(Lease {
            mailbox: mailbox.to_string(),
            holder: holder.to_string(),
            expires_at,
            ttl,
        }))
    }

    /// Extends a live lease by its period.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseUnavailable`] if the lease was lost (expired and
    /// taken over), or an error if the database query fails.
    pub async fn renew(&self, lease: &mut Lease) -> Result<()> {
        let now = Utc::now();
        let expires_at = expiry(now, lease.ttl);

        let result = sqlx::query(
            r"
            UPDATE ingest_leases SET expires_ms = ?
            WHERE mailbox = ? AND holder = ?
            ",
        )
        .bind(expires_at.timestamp_millis())
        .bind(&lease.mailbox)
        .bind(&lease.holder)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::LeaseUnavailable(lease.mailbox.clone()));
        }
        lease.expires_at = expires_at;
        Ok(())
    }

    /// Gives up a lease. Does nothing if it was already taken over.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn release(&self, lease: Lease) -> Result<()> {
        sqlx::query(r"DELETE FROM ingest_leases WHERE mailbox = ? AND holder = ?")
            .bind(&lease.mailbox)
            .bind(&lease.holder)
            .execute(&self.pool)
            .await?;

        debug!(mailbox = %lease.mailbox, holder = %lease.holder, "Released lease");
        Ok(())
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
