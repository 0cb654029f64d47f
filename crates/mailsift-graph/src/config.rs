//! Graph connection settings.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default Graph API root.
pub const DEFAULT_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Scope requested with the client-credentials grant.
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Settings for one Graph mailbox.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Entra ID tenant.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret. Usually supplied through the environment.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    /// Mailbox owner (user id or principal name).
    pub user: String,
    /// Mail folder to ingest.
    pub folder: String,
    /// Graph API root.
    pub api_base: String,
    /// Token endpoint. Derived from the tenant when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// `OAuth2` scope.
    pub scope: String,
    /// Per-request timeout, in seconds.
    pub timeout_secs: u64,
    /// Messages requested per listing page.
    pub page_size: u32,
}

impl GraphConfig {
    /// Creates settings with defaults for everything but the credentials.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user: user.into(),
            ..Self::default()
        }
    }

    /// Checks that the required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("user", &self.user),
            ("folder", &self.folder),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("graph.{name} is required")));
            }
        }
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("graph.page_size must be positive".into()));
        }
        Ok(())
    }

    /// Token endpoint to use.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        self.token_url.clone().unwrap_or_else(|| {
            format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                self.tenant_id
            )
        })
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            user: String::new(),
            folder: "inbox".to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: None,
            scope: DEFAULT_SCOPE.to_string(),
            timeout_secs: 30,
            page_size: 50,
        }
    }
}

impl fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("user", &self.user)
            .field("folder", &self.folder)
            .field("api_base", &self.api_base)
            .field("token_url", &self.token_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
