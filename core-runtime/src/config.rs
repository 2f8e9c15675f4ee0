//! # Mirror Configuration
//!
//! Builder-based configuration for a mirror run.
//!
//! ## Overview
//!
//! `MirrorConfig` holds everything a run needs: where the schema lives, how
//! the data endpoint is found, which credentials to present, where the local
//! database is and how pagination is paced. The builder validates fail-fast so
//! misconfiguration is reported before any network or database work starts.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{Credentials, EndpointSource, MirrorConfig, RunMode};
//! use std::time::Duration;
//!
//! let config = MirrorConfig::builder()
//!     .schema_url("https://api.example.com/schema.graphql")
//!     .endpoint(EndpointSource::Static("https://api.example.com/graphql".into()))
//!     .credentials(Credentials::Static("token".into()))
//!     .database_path("mirror.db")
//!     .mode(RunMode::Continuous { interval: Duration::from_secs(300) })
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::logging::redact_if_sensitive;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_LOCK_TTL_SECS: i64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MIN_RESET_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_COLLECTION_SUFFIX: &str = "Collection";
pub const DEFAULT_DATABASE_PATH: &str = "mirror.db";

/// How the data endpoint URL is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSource {
    /// A fixed URL.
    Static(String),
    /// Looked up by account name in a directory service.
    Directory { url: String, account: String },
}

/// How bearer tokens are obtained.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A pre-issued bearer token.
    Static(String),
    /// OAuth2 client-credentials grant.
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Static(token) => f
                .debug_tuple("Static")
                .field(&redact_if_sensitive("access_token", token))
                .finish(),
            Credentials::ClientCredentials {
                token_url,
                client_id,
                client_secret,
            } => f
                .debug_struct("ClientCredentials")
                .field("token_url", token_url)
                .field("client_id", client_id)
                .field(
                    "client_secret",
                    &redact_if_sensitive("client_secret", client_secret),
                )
                .finish(),
        }
    }
}

/// Whether the orchestrator runs one cycle or repeats forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    OneShot,
    Continuous {
        interval: Duration,
    },
}

/// Validated configuration for a mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub schema_url: String,
    pub endpoint: EndpointSource,
    pub credentials: Credentials,
    pub database_path: PathBuf,
    /// Items requested per page (`limit` variable).
    pub page_size: u32,
    /// Pause between consecutive page requests of one collection.
    pub page_delay: Duration,
    pub lock_ttl_secs: i64,
    pub max_attempts: u32,
    /// Multiplied by the attempt number on 502/504.
    pub retry_base_delay: Duration,
    /// Floor for rate-limit reset sleeps.
    pub min_reset_delay: Duration,
    pub mode: RunMode,
    /// When non-empty, only these collections are mirrored.
    pub collections: Vec<String>,
    pub collection_suffix: String,
}

impl MirrorConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> MirrorConfigBuilder {
        MirrorConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.schema_url.trim().is_empty() {
            return Err(Error::Config("Schema URL cannot be empty".to_string()));
        }

        match &self.endpoint {
            EndpointSource::Static(url) if url.trim().is_empty() => {
                return Err(Error::Config("Data endpoint cannot be empty".to_string()));
            }
            EndpointSource::Directory { url, account }
                if url.trim().is_empty() || account.trim().is_empty() =>
            {
                return Err(Error::Config(
                    "Directory lookup requires both a directory URL and an account name"
                        .to_string(),
                ));
            }
            _ => {}
        }

        match &self.credentials {
            Credentials::Static(token) if token.is_empty() => {
                return Err(Error::Config("Access token cannot be empty".to_string()));
            }
            Credentials::ClientCredentials {
                token_url,
                client_id,
                client_secret,
            } if token_url.is_empty() || client_id.is_empty() || client_secret.is_empty() => {
                return Err(Error::Config(
                    "Client credentials require a token endpoint, client id and client secret"
                        .to_string(),
                ));
            }
            _ => {}
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.page_size == 0 {
            return Err(Error::Config(
                "Page size must be greater than 0".to_string(),
            ));
        }

        if self.lock_ttl_secs <= 0 {
            return Err(Error::Config(
                "Lock TTL must be greater than 0 seconds".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Max attempts must be at least 1".to_string(),
            ));
        }

        if let RunMode::Continuous { interval } = self.mode {
            if interval.is_zero() {
                return Err(Error::Config(
                    "Continuous mode requires a non-zero interval".to_string(),
                ));
            }
        }

        if self.collection_suffix.is_empty() {
            return Err(Error::Config(
                "Collection suffix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`MirrorConfig`].
#[derive(Default)]
pub struct MirrorConfigBuilder {
    schema_url: Option<String>,
    endpoint: Option<EndpointSource>,
    credentials: Option<Credentials>,
    database_path: Option<PathBuf>,
    page_size: Option<u32>,
    page_delay: Option<Duration>,
    lock_ttl_secs: Option<i64>,
    max_attempts: Option<u32>,
    retry_base_delay: Option<Duration>,
    min_reset_delay: Option<Duration>,
    mode: Option<RunMode>,
    collections: Vec<String>,
    collection_suffix: Option<String>,
}

impl MirrorConfigBuilder {
    pub fn schema_url(mut self, url: impl Into<String>) -> Self {
        self.schema_url = Some(url.into());
        self
    }

    pub fn endpoint(mut self, endpoint: EndpointSource) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    pub fn lock_ttl_secs(mut self, ttl: i64) -> Self {
        self.lock_ttl_secs = Some(ttl);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    pub fn min_reset_delay(mut self, delay: Duration) -> Self {
        self.min_reset_delay = Some(delay);
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Restrict the run to the named collections.
    pub fn collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn collection_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.collection_suffix = Some(suffix.into());
        self
    }

    /// Builds the configuration, applying defaults and validating.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a required value is missing or a value is
    /// out of range.
    pub fn build(self) -> Result<MirrorConfig> {
        let schema_url = self.schema_url.ok_or_else(|| {
            Error::Config("Schema URL is required. Use .schema_url() to set it.".to_string())
        })?;

        let endpoint = self.endpoint.ok_or_else(|| {
            Error::Config(
                "A data endpoint or a directory URL with an account name is required".to_string(),
            )
        })?;

        let credentials = self.credentials.ok_or_else(|| {
            Error::Config(
                "Credentials are required: an access token or client credentials".to_string(),
            )
        })?;

        let config = MirrorConfig {
            schema_url,
            endpoint,
            credentials,
            database_path: self
                .database_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            page_delay: self.page_delay.unwrap_or(DEFAULT_PAGE_DELAY),
            lock_ttl_secs: self.lock_ttl_secs.unwrap_or(DEFAULT_LOCK_TTL_SECS),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            retry_base_delay: self.retry_base_delay.unwrap_or(DEFAULT_RETRY_BASE_DELAY),
            min_reset_delay: self.min_reset_delay.unwrap_or(DEFAULT_MIN_RESET_DELAY),
            mode: self.mode.unwrap_or_default(),
            collections: self.collections,
            collection_suffix: self
                .collection_suffix
                .unwrap_or_else(|| DEFAULT_COLLECTION_SUFFIX.to_string()),
        };

        config.validate()?;
        Ok(config)
    }
}
