//! Tunables for ingestion and message actions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Graph's limit for attachments posted in a single request.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 3 * 1024 * 1024;

/// Ingestion cycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Upper bound for every provider call, in seconds.
    pub provider_timeout_secs: u64,
    /// Lease period, in seconds. Renewed while a cycle is running.
    pub lease_ttl_secs: u64,
    /// Messages processed at the same time within one cycle.
    pub max_concurrency: usize,
}

impl IngestSettings {
    /// Provider call timeout.
    #[must_use]
    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Lease period.
    #[must_use]
    pub const fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 30,
            lease_ttl_secs: 300,
            max_concurrency: 4,
        }
    }
}

/// Attachment download and reply settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionSettings {
    /// Upper bound for every provider call, in seconds.
    pub provider_timeout_secs: u64,
    /// Largest attachment accepted for a reply, in bytes.
    pub max_attachment_bytes: u64,
}

impl ActionSettings {
    /// Provider call timeout.
    #[must_use]
    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 30,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: IngestSettings = serde_json::from_str(r#"{"max_concurrency": 8}"#).unwrap();
        assert_eq!(settings.max_concurrency, 8);
        assert_eq!(settings.provider_timeout(), Duration::from_secs(30));
        assert_eq!(settings.lease_ttl(), Duration::from_secs(300));
    }
}
