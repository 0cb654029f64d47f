//! Application configuration.
//!
//! Loaded from `config.json` in the user's config directory (or `--config`),
//! then overridden from the environment for values that should not live in
//! a file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use mailsift_core::{ActionSettings, IngestSettings};
use mailsift_graph::GraphConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::watch::ScheduleSettings;

/// Overrides `graph.client_secret`.
pub const ENV_CLIENT_SECRET: &str = "MAILSIFT_GRAPH_CLIENT_SECRET";
/// Overrides `database`.
pub const ENV_DATABASE: &str = "MAILSIFT_DATABASE";

/// Which mailbox to ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum MailboxConfig {
    /// A Microsoft Graph mailbox.
    Graph(GraphConfig),
    /// Messages loaded from a JSON fixture file, for local runs.
    Fixture {
        /// Fixture file.
        path: PathBuf,
    },
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `SQLite` database file. Defaults to the user's data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Mailbox to ingest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailbox: Option<MailboxConfig>,
    /// Ingestion cycle settings.
    pub ingest: IngestSettings,
    /// Attachment and reply settings.
    pub reply: ActionSettings,
    /// Watch loop settings.
    pub schedule: ScheduleSettings,
}

impl AppConfig {
    /// Loads the configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location yields defaults; a missing
    /// file given explicitly is an error.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::read(path).await?,
            None => {
                let path = default_config_path();
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    Self::read(&path).await?
                } else {
                    debug!("No configuration at {}, using defaults", path.display());
                    Self::default()
                }
            }
        };
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    async fn read(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read configuration {}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("parse configuration {}", path.display()))?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Applies environment overrides looked up through `var`.
    #[must_use]
    pub fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(secret) = non_empty(ENV_CLIENT_SECRET) {
            if let Some(MailboxConfig::Graph(graph)) = self.mailbox.as_mut() {
                graph.client_secret = secret;
            }
        }
        if let Some(database) = non_empty(ENV_DATABASE) {
            self.database = Some(PathBuf::from(database));
        }
        self
    }

    /// Database file to use.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mailsift")
                .join("mailsift.db")
        })
    }

    /// The configured mailbox.
    pub fn mailbox(&self) -> Result<&MailboxConfig> {
        match &self.mailbox {
            Some(mailbox) => Ok(mailbox),
            None => bail!(
                "no mailbox configured; add a \"mailbox\" section to {}",
                default_config_path().display()
            ),
        }
    }
}

/// Default configuration file location.
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailsift")
        .join("config.json")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_config_with_secret_override() {
        let json = r#"{
            "database": "/tmp/a.db",
            "mailbox": {
                "provider": "graph",
                "tenant_id": "t",
                "client_id": "c",
                "user": "ops@x.com"
            },
            "ingest": {"max_concurrency": 2}
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        let config = config.with_overrides(|key| {
            (key == ENV_CLIENT_SECRET).then(|| "from-env".to_string())
        });

        let Some(MailboxConfig::Graph(graph)) = &config.mailbox else {
            panic!("expected graph mailbox");
        };
        assert_eq!(graph.client_secret, "from-env");
        assert_eq!(graph.folder, "inbox");
        assert_eq!(config.ingest.max_concurrency, 2);
        assert_eq!(config.ingest.lease_ttl_secs, 300);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/a.db"));
    }

    #[test]
    fn test_database_override_and_defaults() {
        let config = AppConfig::default()
            .with_overrides(|key| (key == ENV_DATABASE).then(|| "/srv/mail.db".to_string()));
        assert_eq!(config.database_path(), PathBuf::from("/srv/mail.db"));
        assert!(config.mailbox().is_err());
        assert_eq!(config.schedule, ScheduleSettings::default());
    }

    #[test]
    fn test_fixture_mailbox() {
        let config: AppConfig = serde_json::from_str(
            r#"{"mailbox": {"provider": "fixture", "path": "demo.json"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.mailbox().unwrap(),
            &MailboxConfig::Fixture {
                path: PathBuf::from("demo.json")
            }
        );
    }

    #[tokio::test]
    async fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("none.json"))).await.is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load(Some(&path)).await.is_err());
    }
}
