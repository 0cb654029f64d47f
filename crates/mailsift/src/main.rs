//! `MailSift` - mailbox ingestion from the command line
//!
//! Polls a mailbox, stores every unread message exactly once, marks it read
//! only after it is stored, and extracts the first HTML table of each body.
//!
//! # Commands
//!
//! - `mailsift ingest` - run one ingestion cycle
//! - `mailsift watch` - run cycles on a schedule until interrupted
//! - `mailsift list` / `mailsift show` - browse stored messages
//! - `mailsift attachments` / `mailsift download` - fetch attachments
//! - `mailsift reply` - send an HTML reply with attachments

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod commands;
mod config;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mailsift_core::{ErrorKind, MAX_PAGE_SIZE};
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;

/// Mailbox ingestion pipeline
#[derive(Parser)]
#[command(name = "mailsift", version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/mailsift/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion cycle
    Ingest {
        /// Print the cycle report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run ingestion cycles on a schedule until interrupted
    Watch,

    /// List stored messages, newest first
    List {
        /// Messages to skip
        #[arg(long, default_value_t = 0)]
        offset: u32,

        /// Messages to show
        #[arg(
            long,
            default_value_t = 50,
            value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_PAGE_SIZE))
        )]
        limit: u32,

        /// Print the extracted table rows of each message
        #[arg(long, default_value_t = false)]
        rows: bool,
    },

    /// Show one stored message with its table rows
    Show {
        /// Message id
        id: String,
    },

    /// List the attachments of a message
    Attachments {
        /// Message id
        message_id: String,
    },

    /// Download one attachment
    Download {
        /// Message id
        message_id: String,

        /// Attachment id
        attachment_id: String,

        /// Output file (default: the attachment's name)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Reply to a message
    Reply {
        /// Message id
        message_id: String,

        /// HTML body
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,

        /// File holding the HTML body
        #[arg(long)]
        body_file: Option<PathBuf>,

        /// File to attach (repeatable)
        #[arg(long = "attach")]
        attach: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(&e),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "mailsift=debug,mailsift_core=debug,mailsift_graph=debug"
    } else {
        "mailsift=info,mailsift_core=info,mailsift_graph=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).await?;
    debug!(database = %config.database_path().display(), "Configuration ready");

    match cli.command {
        Commands::Ingest { json } => commands::ingest(&config, json).await,
        Commands::Watch => commands::watch(&config).await,
        Commands::List {
            offset,
            limit,
            rows,
        } => commands::list(&config, offset, limit, rows).await,
        Commands::Show { id } => commands::show(&config, &id).await,
        Commands::Attachments { message_id } => {
            commands::attachments(&config, &message_id).await
        }
        Commands::Download {
            message_id,
            attachment_id,
            out,
        } => commands::download(&config, &message_id, &attachment_id, out).await,
        Commands::Reply {
            message_id,
            body,
            body_file,
            attach,
        } => {
            let body = commands::reply_body(body, body_file).await?;
            commands::reply(&config, &message_id, body, attach).await
        }
    }
}

/// Prints a failure without internal detail and picks the exit code.
///
/// Pipeline failures print only their classified, user-facing message; the
/// full error goes to the log.
fn report_failure(error: &anyhow::Error) -> ExitCode {
    let Some(kind) = error
        .downcast_ref::<mailsift_core::Error>()
        .map(mailsift_core::Error::kind)
    else {
        eprintln!("error: {error:#}");
        return ExitCode::FAILURE;
    };

    error!("{error:#}");
    eprintln!("error: {}", kind.public_message());
    ExitCode::from(exit_code(kind))
}

const fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Fatal => 1,
        ErrorKind::InvalidArgument => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::PayloadTooLarge => 4,
        // EX_TEMPFAIL
        ErrorKind::Transient => 75,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_reply_arguments() {
        let cli = Cli::try_parse_from([
            "mailsift", "reply", "m1", "--body", "<p>x</p>", "--attach", "a.csv", "--attach",
            "b.pdf",
        ])
        .unwrap_or_else(|e| panic!("{e}"));
        let Commands::Reply { attach, .. } = cli.command else {
            panic!("expected reply");
        };
        assert_eq!(attach.len(), 2);

        assert!(
            Cli::try_parse_from([
                "mailsift", "reply", "m1", "--body", "x", "--body-file", "b.html"
            ])
            .is_err()
        );
        assert!(Cli::try_parse_from(["mailsift", "list", "--limit", "0"]).is_err());
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::Fatal,
            ErrorKind::InvalidArgument,
            ErrorKind::NotFound,
            ErrorKind::PayloadTooLarge,
            ErrorKind::Transient,
        ];
        let mut codes: Vec<u8> = kinds.into_iter().map(exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }
}
