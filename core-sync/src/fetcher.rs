//! # Rate-Limited Fetcher
//!
//! Requests one page of a collection from the data endpoint.
//!
//! ## Failure Policy
//!
//! Each call makes at most `max_attempts` requests:
//!
//! - `429`: wait for the `x-ratelimit-reset` header (seconds, parsed
//!   defensively and clamped), then retry
//! - `502` / `504`: wait `retry_base_delay × attempt`, then retry
//! - any other non-2xx status or transport error: fail immediately
//!
//! Running out of attempts is a [`SyncError::TransientNetwork`]. A successful
//! response whose quota headers show 10% or less remaining is held back for
//! the reset delay before the page is returned.

use std::sync::Arc;

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_async::time::{sleep, Duration};
use core_auth::TokenProvider;
use core_runtime::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_RESET_DELAY, DEFAULT_RETRY_BASE_DELAY};
use core_runtime::events::{EventBus, SyncEvent};
use core_schema::{CollectionDescriptor, QueryBuilder};
use core_store::Page;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::error::{Result, SyncError};

pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Reset headers longer than this are treated as garbage.
pub const MAX_RESET_DIGITS: usize = 5;

/// Retry and pacing knobs for [`RateLimitedFetcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    /// Gateway errors wait this long times the attempt number.
    pub retry_base_delay: Duration,
    /// Floor for any reset-derived wait.
    pub min_reset_delay: Duration,
    /// Ceiling for any reset-derived wait.
    pub max_reset_delay: Duration,
    /// Used when the reset header is missing or unreadable.
    pub default_reset_delay: Duration,
    /// Remaining/limit ratio at or below which the fetcher slows down.
    pub quota_threshold: f64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            min_reset_delay: DEFAULT_MIN_RESET_DELAY,
            max_reset_delay: Duration::from_secs(300),
            default_reset_delay: Duration::from_secs(60),
            quota_threshold: 0.10,
        }
    }
}

/// Turns a reset header into a wait.
///
/// Anything that is not a short run of ASCII digits falls back to the
/// policy default. The result always lies between the policy floor and
/// ceiling.
pub fn parse_reset_header(value: Option<&str>, policy: &FetchPolicy) -> Duration {
    let parsed = value
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_RESET_DIGITS)
        .filter(|v| v.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);

    let ceiling = policy.max_reset_delay.max(policy.min_reset_delay);
    parsed
        .unwrap_or(policy.default_reset_delay)
        .clamp(policy.min_reset_delay, ceiling)
}

/// A rendered page query plus the field its result lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub collection: String,
    pub field_name: String,
    pub document: String,
}

impl PageQuery {
    pub fn for_collection(descriptor: &CollectionDescriptor) -> Self {
        Self {
            collection: descriptor.collection_name.clone(),
            field_name: QueryBuilder::field_name(&descriptor.element_type_name),
            document: QueryBuilder::build(descriptor),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageVariables {
    pub after: Option<String>,
    pub limit: u32,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    query: &'a str,
    variables: &'a PageVariables,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(default)]
    errors: Option<Vec<ResponseError>>,
}

#[derive(Deserialize)]
struct ResponseError {
    #[serde(default)]
    message: String,
}

/// Issues page requests with bounded retry and quota pacing.
pub struct RateLimitedFetcher {
    http_client: Arc<dyn HttpClient>,
    tokens: Arc<dyn TokenProvider>,
    policy: FetchPolicy,
    events: EventBus,
}

impl RateLimitedFetcher {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        tokens: Arc<dyn TokenProvider>,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            http_client,
            tokens,
            policy,
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetch one page. Either the whole page comes back or the call fails.
    #[instrument(skip(self, query, variables), fields(collection = %query.collection, after = ?variables.after))]
    pub async fn fetch(
        &self,
        endpoint: &str,
        query: &PageQuery,
        variables: &PageVariables,
    ) -> Result<Page> {
        let body = RequestBody {
            query: &query.document,
            variables,
        };
        let mut last_status = 0;

        for attempt in 1..=self.policy.max_attempts {
            let token = self.tokens.access_token().await?;
            let request = HttpRequest::new(HttpMethod::Post, endpoint)
                .bearer_token(token)
                .json(&body)
                .map_err(|e| SyncError::DataShape(e.to_string()))?;

            let response = self
                .http_client
                .execute(request)
                .await
                .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;

            if response.is_success() {
                let page = parse_page(&response, &query.field_name)?;
                self.throttle_if_quota_low(&query.collection, &response).await;
                debug!(
                    attempt,
                    items = page.items.len(),
                    has_more = page.has_more,
                    "Page received"
                );
                return Ok(page);
            }

            last_status = response.status;
            let delay = match response.status {
                429 => parse_reset_header(response.header(RATE_LIMIT_RESET_HEADER), &self.policy),
                502 | 504 => self.policy.retry_base_delay * attempt,
                status => {
                    let body = response.text().unwrap_or_default();
                    warn!(status, "Data endpoint rejected request");
                    return Err(SyncError::TransientNetwork(format!(
                        "HTTP {}: {}",
                        status, body
                    )));
                }
            };

            if attempt == self.policy.max_attempts {
                break;
            }

            warn!(
                status = response.status,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retryable response, backing off"
            );
            self.events
                .emit(SyncEvent::RetryScheduled {
                    collection: query.collection.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    status: response.status,
                })
                .ok();
            sleep(delay).await;
        }

        Err(SyncError::TransientNetwork(format!(
            "gave up after {} attempts, last status {}",
            self.policy.max_attempts, last_status
        )))
    }

    async fn throttle_if_quota_low(&self, collection: &str, response: &HttpResponse) {
        let remaining = header_u64(response, RATE_LIMIT_REMAINING_HEADER);
        let limit = header_u64(response, RATE_LIMIT_LIMIT_HEADER);

        let (Some(remaining), Some(limit)) = (remaining, limit) else {
            return;
        };
        if limit == 0 || remaining as f64 / limit as f64 > self.policy.quota_threshold {
            return;
        }

        let delay = parse_reset_header(response.header(RATE_LIMIT_RESET_HEADER), &self.policy);
        warn!(
            remaining,
            limit,
            delay_ms = delay.as_millis() as u64,
            "Quota nearly exhausted, pausing"
        );
        self.events
            .emit(SyncEvent::QuotaThrottled {
                collection: collection.to_string(),
                remaining,
                limit,
                delay_ms: delay.as_millis() as u64,
            })
            .ok();
        sleep(delay).await;
    }
}

fn header_u64(response: &HttpResponse, name: &str) -> Option<u64> {
    response.header(name)?.trim().parse().ok()
}

fn parse_page(response: &HttpResponse, field_name: &str) -> Result<Page> {
    let envelope: ResponseEnvelope = response
        .json()
        .map_err(|e| SyncError::DataShape(e.to_string()))?;

    let errors = envelope.errors.unwrap_or_default();
    let Some(mut data) = envelope.data else {
        if errors.is_empty() {
            return Err(SyncError::DataShape("response has no data".to_string()));
        }
        let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
        return Err(SyncError::DataShape(format!(
            "GraphQL errors: {}",
            messages.join("; ")
        )));
    };

    if !errors.is_empty() {
        warn!(count = errors.len(), "Response carried errors alongside data");
    }

    match data.remove(field_name) {
        Some(Value::Null) | None => Err(SyncError::DataShape(format!(
            "response data has no `{}` field",
            field_name
        ))),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| SyncError::DataShape(format!("malformed `{}` page: {}", field_name, e))),
    }
}
