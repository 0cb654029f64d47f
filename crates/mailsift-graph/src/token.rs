//! `OAuth2` client-credentials tokens.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::GraphConfig;
use crate::error::{Error, Result};

/// Seconds before expiry at which a token is treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// `OAuth2` access token with metadata.
pub struct Token {
    /// Access token string.
    pub access_token: String,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// Expiration time.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Creates a token from a token endpoint response.
    #[must_use]
    pub fn from_response(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(i64::from(secs)));

        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_at,
        }
    }

    /// Checks if the token is expired (with 60 second buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= exp)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Token response from the `OAuth2` server.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    pub expires_in: Option<u32>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error response from the `OAuth2` server.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an Error.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::oauth_error(self.error, self.error_description)
    }
}

/// Source of access tokens for one application registration.
///
/// Tokens are cached and fetched again shortly before they expire, or after
/// [`invalidate`](Self::invalidate).
pub struct TokenSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<Token>>,
}

impl TokenSource {
    /// Creates a token source for `config`'s credentials.
    #[must_use]
    pub fn new(http: reqwest::Client, config: &GraphConfig) -> Self {
        Self {
            http,
            token_url: config.token_endpoint(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid access token, requesting a new one if needed.
    ///
    /// Concurrent callers share one token request.
    ///
    /// # Errors
    ///
    /// Returns an error if the token request fails or is rejected.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.access_token.clone());
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drops the cached token so the next call requests a fresh one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn request_token(&self) -> Result<Token> {
        debug!(token_url = %self.token_url, "Requesting access token");
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            if status.is_client_error() {
                if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                    return Err(error.into_error());
                }
            }
            return Err(Error::status(status.as_u16(), &body, None));
        }

        let response: TokenResponse = serde_json::from_str(&body)?;
        Ok(Token::from_response(response))
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn expiring_in(expires_in: Option<u32>) -> Token {
        Token::from_response(TokenResponse {
            access_token: "t".to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
        })
    }

    #[test]
    fn test_expiry_has_buffer() {
        assert!(!expiring_in(None).is_expired());
        assert!(expiring_in(Some(30)).is_expired());
        assert!(!expiring_in(Some(3600)).is_expired());
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"access_token": "abc", "token_type": "Bearer", "expires_in": 3599}"#;
        let token = Token::from_response(serde_json::from_str(json).unwrap());
        assert_eq!(token.access_token, "abc");
        assert!(token.expires_at.is_some());
        assert!(!format!("{token:?}").contains("abc"));
    }

    fn source(server: &MockServer) -> TokenSource {
        let mut config = GraphConfig::new("t", "client", "secret", "u@x.com");
        config.token_url = Some(format!("{}/token", server.uri()));
        TokenSource::new(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn test_token_is_cached_until_invalidated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "t1",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;

        let tokens = source(&server);
        assert_eq!(tokens.access_token().await.unwrap(), "t1");
        assert_eq!(tokens.access_token().await.unwrap(), "t1");
        tokens.invalidate().await;
        assert_eq!(tokens.access_token().await.unwrap(), "t1");
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })))
            .mount(&server)
            .await;

        let err = source(&server).access_token().await.unwrap_err();
        assert!(matches!(err, Error::OAuth { ref error, .. } if error == "invalid_client"));
    }
}
