//! Bearer token providers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::time::Clock;
use chrono::{DateTime, Duration, Utc};
use core_async::sync::Mutex;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{AuthError, Result};

/// Tokens are refreshed this long before they expire, or after three
/// quarters of their lifetime when that comes sooner.
const EXPIRY_BUFFER_SECS: i64 = 60;
/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 300;

/// Supplies the bearer token attached to data requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A fixed, pre-issued token.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        if self.token.is_empty() {
            return Err(AuthError::MissingCredentials(
                "access token is empty".to_string(),
            ));
        }
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    access_token: String,
    refresh_at: DateTime<Utc>,
}

impl CachedToken {
    fn issued(access_token: String, issued_at: DateTime<Utc>, expires_in: i64) -> Self {
        let expires_in = expires_in.max(0);
        let buffer = EXPIRY_BUFFER_SECS.min(expires_in / 4);
        Self {
            access_token,
            refresh_at: issued_at + Duration::seconds(expires_in - buffer),
        }
    }

    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_at
    }
}

/// OAuth2 client-credentials grant with an in-memory cache.
///
/// The token is requested with
/// `POST {token_url}?grant_type=client_credentials` and HTTP Basic
/// `client_id:client_secret`. It is reused until shortly before
/// `expires_in` elapses according to the injected [`Clock`].
pub struct ClientCredentialsProvider {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsProvider {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            clock,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cached: Mutex::new(None),
        }
    }

    fn request_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.token_url).map_err(|e| {
            AuthError::MissingCredentials(format!("invalid token endpoint: {}", e))
        })?;
        url.query_pairs_mut()
            .append_pair("grant_type", "client_credentials");
        Ok(url.into())
    }

    fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", STANDARD.encode(raw))
    }

    #[instrument(skip(self), fields(client_id = %self.client_id))]
    async fn request_token(&self) -> Result<CachedToken> {
        if self.token_url.is_empty() || self.client_id.is_empty() || self.client_secret.is_empty()
        {
            return Err(AuthError::MissingCredentials(
                "token endpoint, client id and client secret are all required".to_string(),
            ));
        }

        let request = HttpRequest::new(HttpMethod::Post, self.request_url()?)
            .header("Authorization", self.basic_auth())
            .header("Content-Type", "application/x-www-form-urlencoded");

        let response = self.http_client.execute(request).await?;

        if !response.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = response.status, "Token endpoint rejected request");
            return Err(AuthError::TokenRequestFailed(format!(
                "Token endpoint returned {}: {}",
                response.status, body
            )));
        }

        let token: TokenResponse = response.json().map_err(|e| {
            AuthError::TokenRequestFailed(format!("Failed to parse token response: {}", e))
        })?;

        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        info!(expires_in, "Obtained access token");

        Ok(CachedToken::issued(
            token.access_token,
            self.clock.now(),
            expires_in,
        ))
    }
}

impl fmt::Debug for ClientCredentialsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh(self.clock.now()) {
                return Ok(token.access_token.clone());
            }
            debug!("Cached access token expired");
        }

        let fresh = self.request_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }
}
