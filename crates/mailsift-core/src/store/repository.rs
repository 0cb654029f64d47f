//! Message storage repository.

use chrono::{DateTime, FixedOffset, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::debug;

use crate::Result;
use crate::model::{Message, Page};

/// Result of [`MessageRepository::upsert_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Whether a new row was written.
    pub inserted: bool,
}

/// A read-mark that could not be delivered upstream yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRead {
    /// Message id.
    pub message_id: String,
    /// Mailbox the message belongs to.
    pub mailbox: String,
    /// Number of failed attempts so far.
    pub attempts: u32,
    /// Last failure reason.
    pub last_error: String,
    /// When the last attempt failed.
    pub updated_at: DateTime<Utc>,
}

/// Repository for ingested messages.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
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
            .max_connections(5)
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
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY NOT NULL,
                mailbox TEXT NOT NULL,
                sender TEXT NOT NULL DEFAULT '',
                recipients TEXT NOT NULL DEFAULT '[]',
                subject TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                received_at TEXT NOT NULL,
                received_ms INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                stored_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Newest-first listing
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_messages_received
            ON messages(received_ms DESC, id)
            ",
        )
        .execute(&self.pool)
        .await?;

        // Read-marks waiting for the next cycle
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS pending_reads (
                message_id TEXT PRIMARY KEY NOT NULL,
                mailbox TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 1,
                last_error TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stores `message` unless a message with the same id exists.
    ///
    /// Existing rows are never modified. The message is always stored unread.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn upsert_if_absent(&self, message: &Message) -> Result<UpsertOutcome> {
        let recipients = serde_json::to_string(&message.recipients)?;

        let result = sqlx::query(
            r"
            INSERT INTO messages
                (id, mailbox, sender, recipients, subject, body,
                 received_at, received_ms, is_read, stored_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(&message.id)
        .bind(&message.mailbox)
        .bind(&message.sender)
        .bind(recipients)
        .bind(&message.subject)
        .bind(&message.body)
        .bind(message.received_at.to_rfc3339())
        .bind(message.received_at.timestamp_millis())
        .bind(message.stored_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(id = %message.id, inserted, "Upserted message");
        Ok(UpsertOutcome { inserted })
    }

    /// Marks a stored message read. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_read(&self, id: &str) -> Result<()> {
        let result = sqlx::query(r"UPDATE messages SET is_read = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            debug!(id, "Ignoring read-mark for unknown message");
        }
        Ok(())
    }

    /// Get a message by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(
            r"
            SELECT id, mailbox, sender, recipients, subject, body,
                   received_at, is_read, stored_at
            FROM messages
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_message).transpose()
    }

    /// Lists stored messages, most recently received first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_all(&self, page: Page) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r"
            SELECT id, mailbox, sender, recipients, subject, body,
                   received_at, is_read, stored_at
            FROM messages
            ORDER BY received_ms DESC, id ASC
            LIMIT ? OFFSET ?
            ",
        )
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    /// Number of stored messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM messages")
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.get("count");
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Records that a read-mark is about to be sent upstream.
    ///
    /// The entry stays until [`clear_pending_read`](Self::clear_pending_read)
    /// runs after the local flag is set, so an interrupted read-mark is
    /// retried by the next cycle. An existing entry is left as it is.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn begin_pending_read(&self, mailbox: &str, id: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO pending_reads (message_id, mailbox, attempts, last_error, updated_at)
            VALUES (?, ?, 0, 'read-mark in flight', ?)
            ON CONFLICT(message_id) DO NOTHING
            ",
        )
        .bind(id)
        .bind(mailbox)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed read-mark, counting attempts per message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_pending_read(&self, mailbox: &str, id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO pending_reads (message_id, mailbox, attempts, last_error, updated_at)
            VALUES (?, ?, 1, ?, ?)
            ON CONFLICT(message_id) DO UPDATE SET
                attempts = pending_reads.attempts + 1,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            ",
        )
        .bind(id)
        .bind(mailbox)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Pending read-marks for a mailbox, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn pending_reads(&self, mailbox: &str) -> Result<Vec<PendingRead>> {
        let rows = sqlx::query(
            r"
            SELECT message_id, mailbox, attempts, last_error, updated_at
            FROM pending_reads
            WHERE mailbox = ?
            ORDER BY updated_at ASC, message_id ASC
            ",
        )
        .bind(mailbox)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingRead {
                    message_id: row.get("message_id"),
                    mailbox: row.get("mailbox"),
                    attempts: u32::try_from(row.get::<i64, _>("attempts")).unwrap_or(u32::MAX),
                    last_error: row.get("last_error"),
                    updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    /// Forgets a pending read-mark.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn clear_pending_read(&self, id: &str) -> Result<()> {
        sqlx::query(r"DELETE FROM pending_reads WHERE message_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let recipients: String = row.get("recipients");

    Ok(Message {
        id: row.get("id"),
        mailbox: row.get("mailbox"),
        sender: row.get("sender"),
        recipients: serde_json::from_str(&recipients)?,
        subject: row.get("subject"),
        body: row.get("body"),
        received_at: parse_timestamp(&row.get::<String, _>("received_at"))?,
        is_read: row.get::<bool, _>("is_read"),
        stored_at: parse_timestamp(&row.get::<String, _>("stored_at"))?.with_timezone(&Utc),
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).map_err(|e| sqlx::Error::Decode(Box::new(e)).into())
}
