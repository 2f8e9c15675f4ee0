//! Data endpoint resolution.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::error::{AuthError, Result};
use crate::token::TokenProvider;

/// Yields the URL that data queries are posted to.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self) -> Result<String>;
}

/// A fixed endpoint URL.
#[derive(Debug, Clone)]
pub struct StaticEndpoint(String);

impl StaticEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }
}

#[async_trait]
impl EndpointResolver for StaticEndpoint {
    async fn resolve(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    agency_name: String,
    url: String,
}

/// Looks up an account's endpoint in a directory service.
///
/// The directory answers a bearer-authenticated `GET` with a JSON array of
/// `{ "agency_name", "url" }` entries; the entry whose name equals the
/// configured account wins.
pub struct DirectoryEndpointResolver {
    http_client: Arc<dyn HttpClient>,
    tokens: Arc<dyn TokenProvider>,
    directory_url: String,
    account: String,
}

impl DirectoryEndpointResolver {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        tokens: Arc<dyn TokenProvider>,
        directory_url: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            tokens,
            directory_url: directory_url.into(),
            account: account.into(),
        }
    }
}

#[async_trait]
impl EndpointResolver for DirectoryEndpointResolver {
    #[instrument(skip(self), fields(account = %self.account))]
    async fn resolve(&self) -> Result<String> {
        let token = self.tokens.access_token().await?;
        let request = HttpRequest::new(HttpMethod::Get, self.directory_url.clone())
            .bearer_token(token)
            .header("Content-Type", "application/json");

        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            return Err(AuthError::DirectoryLookupFailed(format!(
                "Directory returned {}",
                response.status
            )));
        }

        let entries: Vec<DirectoryEntry> = response
            .json()
            .map_err(|e| AuthError::DirectoryLookupFailed(e.to_string()))?;

        let entry = entries
            .into_iter()
            .find(|entry| entry.agency_name == self.account)
            .ok_or_else(|| AuthError::EndpointNotFound(self.account.clone()))?;

        info!(endpoint = %entry.url, "Resolved data endpoint");
        Ok(entry.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticTokenProvider;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::HttpResponse;
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    const DIRECTORY: &str = r#"[
        {"agency_name": "north", "url": "https://north.example.com/graphql"},
        {"agency_name": "south", "url": "https://south.example.com/graphql"}
    ]"#;

    fn resolver(http: MockHttpClient, account: &str) -> DirectoryEndpointResolver {
        DirectoryEndpointResolver::new(
            Arc::new(http),
            Arc::new(StaticTokenProvider::new("tok")),
            "https://directory.example.com/agencies",
            account,
        )
    }

    fn ok(body: &'static str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from(body),
        }
    }

    #[core_async::test]
    async fn test_static_endpoint() {
        let endpoint = StaticEndpoint::new("https://api.example.com/graphql");
        assert_eq!(
            endpoint.resolve().await.unwrap(),
            "https://api.example.com/graphql"
        );
    }

    #[core_async::test]
    async fn test_directory_selects_account() {
        let mut http = MockHttpClient::new();
        http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Get);
            assert_eq!(
                req.headers.get("Authorization").map(String::as_str),
                Some("Bearer tok")
            );
            Ok(ok(DIRECTORY))
        });

        let url = resolver(http, "south").resolve().await.unwrap();
        assert_eq!(url, "https://south.example.com/graphql");
    }

    #[core_async::test]
    async fn test_unknown_account_is_not_found() {
        let mut http = MockHttpClient::new();
        http.expect_execute().returning(|_| Ok(ok(DIRECTORY)));

        let err = resolver(http, "west").resolve().await.unwrap_err();
        assert!(matches!(err, AuthError::EndpointNotFound(ref name) if name == "west"));
    }

    #[core_async::test]
    async fn test_directory_error_status() {
        let mut http = MockHttpClient::new();
        http.expect_execute().returning(|_| {
            Ok(HttpResponse {
                status: 403,
                headers: HashMap::new(),
                body: Bytes::new(),
            })
        });

        assert!(matches!(
            resolver(http, "north").resolve().await,
            Err(AuthError::DirectoryLookupFailed(_))
        ));
    }
}
