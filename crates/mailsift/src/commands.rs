//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use mailsift_core::{
    Coordinator, CycleReport, Error, LeaseRepository, LogAlertSink, MailActions,
    MailboxProvider, MemoryMailbox, Message, MessageRepository, Page, ReadMark, ReplyAttachment,
    StoreOutcome, TableRow,
};
use mailsift_graph::GraphMailbox;
use tracing::info;

use crate::config::{AppConfig, MailboxConfig};
use crate::watch::{self, Shutdown};

/// Characters of body text shown per message in listings.
const PREVIEW_CHARS: usize = 80;

/// Builds the configured mailbox provider.
pub async fn open_provider(config: &AppConfig) -> Result<Arc<dyn MailboxProvider>> {
    match config.mailbox()? {
        MailboxConfig::Graph(graph) => {
            let mailbox = GraphMailbox::new(graph).context("configure Graph mailbox")?;
            Ok(Arc::new(mailbox))
        }
        MailboxConfig::Fixture { path } => {
            let mailbox = MemoryMailbox::from_fixture_file(path)
                .await
                .with_context(|| format!("load fixture {}", path.display()))?;
            Ok(Arc::new(mailbox))
        }
    }
}

async fn open_store(config: &AppConfig) -> Result<(MessageRepository, LeaseRepository)> {
    let path = config.database_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let path = path.to_string_lossy();
    let store = MessageRepository::new(&path).await?;
    let leases = LeaseRepository::new(&path).await?;
    Ok((store, leases))
}

async fn coordinator(config: &AppConfig) -> Result<Coordinator> {
    let provider = open_provider(config).await?;
    let (store, leases) = open_store(config).await?;
    Ok(Coordinator::new(
        provider,
        store,
        leases,
        Arc::new(LogAlertSink),
        config.ingest.clone(),
    ))
}

async fn actions(config: &AppConfig) -> Result<MailActions> {
    let provider = open_provider(config).await?;
    Ok(MailActions::new(provider, config.reply.clone()))
}

/// `mailsift ingest`
pub async fn ingest(config: &AppConfig, json: bool) -> Result<()> {
    let coordinator = coordinator(config).await?;
    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let report = coordinator.run_cycle(shutdown.cancel_handle()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

/// `mailsift watch`
pub async fn watch(config: &AppConfig) -> Result<()> {
    let coordinator = coordinator(config).await?;
    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();
    watch::run(&coordinator, &config.schedule, &shutdown).await
}

/// `mailsift list`
pub async fn list(config: &AppConfig, offset: u32, limit: u32, rows: bool) -> Result<()> {
    let (store, _) = open_store(config).await?;
    let messages = store.list_all(Page::new(offset, limit)).await?;
    let total = store.count().await?;

    let mut out = String::new();
    for message in &messages {
        out.push_str(&render_summary(message));
        if rows {
            out.push_str(&render_rows(&message.rows(), "    "));
        }
    }
    out.push_str(&format!("{} of {total} messages\n", messages.len()));
    print!("{out}");
    Ok(())
}

/// `mailsift show`
pub async fn show(config: &AppConfig, id: &str) -> Result<()> {
    let (store, _) = open_store(config).await?;
    let message = store
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("message {id}")))?;

    let rows = message.rows();
    print!(
        "Id:         {}\n\
         Mailbox:    {}\n\
         From:       {}\n\
         To:         {}\n\
         Subject:    {}\n\
         Received:   {}\n\
         Read:       {}\n\
         Table rows: {}\n{}",
        message.id,
        message.mailbox,
        message.sender,
        message.recipients.join(", "),
        message.subject,
        message.received_at.to_rfc3339(),
        if message.is_read { "yes" } else { "no" },
        rows.len(),
        render_rows(&rows, "  "),
    );
    Ok(())
}

/// `mailsift attachments`
pub async fn attachments(config: &AppConfig, message_id: &str) -> Result<()> {
    let attachments = actions(config).await?.list_attachments(message_id).await?;
    if attachments.is_empty() {
        println!("No attachments");
    }
    for attachment in attachments {
        println!(
            "{}\t{}\t{}\t{} bytes",
            attachment.id, attachment.name, attachment.content_type, attachment.size
        );
    }
    Ok(())
}

/// `mailsift download`
pub async fn download(
    config: &AppConfig,
    message_id: &str,
    attachment_id: &str,
    out: Option<PathBuf>,
) -> Result<()> {
    let attachment = actions(config)
        .await?
        .download_attachment(message_id, attachment_id)
        .await?;

    let path = out.unwrap_or_else(|| safe_file_name(&attachment.meta.name));
    tokio::fs::write(&path, &attachment.content)
        .await
        .with_context(|| format!("write {}", path.display()))?;

    info!(path = %path.display(), size = attachment.content.len(), "Saved attachment");
    println!("{} ({} bytes)", path.display(), attachment.content.len());
    Ok(())
}

/// `mailsift reply`
pub async fn reply(
    config: &AppConfig,
    message_id: &str,
    body: String,
    attach: Vec<PathBuf>,
) -> Result<()> {
    let attachments = attach
        .into_iter()
        .map(|path| {
            let content_type = mime_guess::from_path(&path)
                .first_raw()
                .map(str::to_string);
            ReplyAttachment::from_file(path, content_type)
        })
        .collect();

    let id = actions(config)
        .await?
        .reply(message_id, &body, attachments)
        .await?;
    println!("Sent reply {id}");
    Ok(())
}

/// Reads the reply body from the flag or a file.
pub async fn reply_body(body: Option<String>, body_file: Option<PathBuf>) -> Result<String> {
    match (body, body_file) {
        (Some(body), _) => Ok(body),
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read {}", path.display())),
        (None, None) => Ok(String::new()),
    }
}

/// Keeps only the final path component of an attachment name.
fn safe_file_name(name: &str) -> PathBuf {
    Path::new(name)
        .file_name()
        .map_or_else(|| PathBuf::from("attachment.bin"), PathBuf::from)
}

fn render_report(report: &CycleReport) -> String {
    let mut out = String::new();
    for message in &report.messages {
        let stored = match message.stored {
            StoreOutcome::Inserted => "new",
            StoreOutcome::AlreadyKnown => "known",
        };
        let read = match &message.read {
            ReadMark::Marked => "marked read".to_string(),
            ReadMark::Vanished => "gone upstream".to_string(),
            ReadMark::Pending { reason } => format!("read-mark pending ({reason})"),
        };
        out.push_str(&format!(
            "{}\t{stored}\t{read}\t{} rows\n",
            message.id, message.rows
        ));
    }
    out.push_str(&format!("{report}\n"));
    out
}

fn render_summary(message: &Message) -> String {
    format!(
        "{}  {}  {:<30}  {}{}\n    {}\n",
        message.received_at.format("%Y-%m-%d %H:%M"),
        message.id,
        message.sender,
        message.subject,
        if message.is_read { "" } else { "  [unread]" },
        message.preview(PREVIEW_CHARS)
    )
}

fn render_rows(rows: &[TableRow], indent: &str) -> String {
    rows.iter()
        .map(|row| format!("{indent}| {} |\n", row.cells().join(" | ")))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mailsift_core::{CancelHandle, MessageReport};

    use super::*;

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("report.csv"), PathBuf::from("report.csv"));
        assert_eq!(safe_file_name("../../etc/passwd"), PathBuf::from("passwd"));
        assert_eq!(safe_file_name(".."), PathBuf::from("attachment.bin"));
    }

    #[test]
    fn test_render_rows() {
        let rows = vec![
            ["a", "b"].into_iter().map(String::from).collect::<TableRow>(),
            TableRow::default(),
        ];
        assert_eq!(render_rows(&rows, ""), "| a | b |\n|  |\n");
    }

    #[test]
    fn test_render_report_lines() {
        let report = CycleReport {
            mailbox: "inbox".into(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            messages: vec![MessageReport {
                id: "m1".into(),
                stored: StoreOutcome::Inserted,
                read: ReadMark::Marked,
                rows: 3,
            }],
            pending_retried: 0,
            pending_cleared: 0,
            cancelled: false,
        };
        let text = render_report(&report);
        assert!(text.starts_with("m1\tnew\tmarked read\t3 rows\n"));
        assert!(text.contains("inbox: 1 listed, 1 new"));
    }

    #[tokio::test]
    async fn test_fixture_ingest_then_show() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("fixture.json");
        std::fs::write(
            &fixture,
            r#"{"mailbox": "demo", "messages": [{
                "id": "m1",
                "sender": "a@x.com",
                "body": "<table><tr><td>x</td></tr></table>",
                "received_at": "2024-01-01T00:00:00Z"
            }]}"#,
        )
        .unwrap();
        let config = AppConfig {
            database: Some(dir.path().join("db").join("mailsift.db")),
            mailbox: Some(MailboxConfig::Fixture { path: fixture }),
            ..AppConfig::default()
        };

        let report = coordinator(&config)
            .await
            .unwrap()
            .run_cycle(&CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.inserted(), 1);

        let (store, _) = open_store(&config).await.unwrap();
        let message = store.get("m1").await.unwrap().unwrap();
        assert!(message.is_read);
        assert_eq!(message.mailbox, "demo");
        show(&config, "m1").await.unwrap();
        assert!(show(&config, "m9").await.is_err());
    }

    #[tokio::test]
    async fn test_reply_body_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.html");
        std::fs::write(&path, "<p>file</p>").unwrap();

        assert_eq!(reply_body(Some("<p>x</p>".into()), None).await.unwrap(), "<p>x</p>");
        assert_eq!(reply_body(None, Some(path)).await.unwrap(), "<p>file</p>");
        assert_eq!(reply_body(None, None).await.unwrap(), "");
    }
}
