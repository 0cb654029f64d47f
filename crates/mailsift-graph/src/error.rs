//! Error types for Graph operations.

use mailsift_core::ProviderError;

/// Result type alias for Graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Longest response body kept in an error message.
const MAX_BODY_LEN: usize = 256;

/// Graph error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `OAuth2` error from the token endpoint.
    #[error("OAuth2 error: {error} - {description}")]
    OAuth {
        /// Error code (e.g., `invalid_client`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP status {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Truncated response body.
        body: String,
        /// `Retry-After` header, in seconds.
        retry_after: Option<u64>,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Creates an OAuth error from error code and description.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Creates a status error, truncating the body.
    #[must_use]
    pub fn status(status: u16, body: &str, retry_after: Option<u64>) -> Self {
        Self::Status {
            status,
            body: truncate_body(body),
            retry_after,
        }
    }

    /// Classifies the failure for the pipeline. `what` names the entity the
    /// request was about, for `NotFound`.
    #[must_use]
    pub fn classify(self, what: &str) -> ProviderError {
        match self {
            Self::Status { status: 404, .. } => ProviderError::NotFound(what.to_string()),
            Self::Status {
                status: status @ (408 | 429 | 500 | 502 | 503 | 504),
                ref body,
                retry_after,
            } => {
                let mut detail = format!("{what}: HTTP {status}");
                if let Some(secs) = retry_after {
                    detail.push_str(&format!(", retry after {secs}s"));
                }
                if !body.is_empty() {
                    detail.push_str(&format!(": {body}"));
                }
                ProviderError::Transient(detail)
            }
            Self::Http(ref e)
                if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() =>
            {
                ProviderError::Transient(format!("{what}: {self}"))
            }
            Self::OAuth { ref error, .. } if error == "temporarily_unavailable" => {
                ProviderError::Transient(format!("{what}: {self}"))
            }
            other => ProviderError::Fatal(format!("{what}: {other}")),
        }
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= MAX_BODY_LEN {
        return trimmed.to_string();
    }
    let mut end = MAX_BODY_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated {} bytes]", &trimmed[..end], trimmed.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            Error::status(404, "", None).classify("message m1"),
            ProviderError::NotFound("message m1".into())
        );
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(Error::status(status, "", None).classify("x").is_retryable());
        }
        for status in [400, 401, 403, 409, 501] {
            assert!(matches!(
                Error::status(status, "", None).classify("x"),
                ProviderError::Fatal(_)
            ));
        }
    }

    #[test]
    fn test_retry_after_is_kept() {
        let err = Error::status(429, "slow down", Some(7)).classify("message m1");
        assert_eq!(
            err,
            ProviderError::Transient("message m1: HTTP 429, retry after 7s: slow down".into())
        );
    }

    #[test]
    fn test_oauth_classification() {
        assert!(matches!(
            Error::oauth_error("invalid_client", "bad secret").classify("token"),
            ProviderError::Fatal(_)
        ));
        assert!(
            Error::oauth_error("temporarily_unavailable", "")
                .classify("token")
                .is_retryable()
        );
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "é".repeat(400);
        let Error::Status { body, .. } = Error::status(500, &body, None) else {
            unreachable!()
        };
        assert!(body.contains("[truncated 800 bytes]"));
    }
}
