//! # Client-Credentials Token Source
//!
//! Issues OAuth 2.0 `client_credentials` grant requests against a token
//! endpoint through the host [`HttpClient`].

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AuthError, Result};
use crate::types::{AccessToken, ClientCredentials};

/// Per-request timeout for token endpoint calls
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upstream token acquisition capability
///
/// Implementations issue exactly one upstream request per call and never
/// retry.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self, endpoint: &str, credentials: &ClientCredentials)
        -> Result<AccessToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// [`TokenSource`] for the client-credentials grant
pub struct ClientCredentialsSource {
    http_client: Arc<dyn HttpClient>,
}

impl ClientCredentialsSource {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    async fn acquire(
        &self,
        endpoint: &str,
        credentials: &ClientCredentials,
    ) -> Result<AccessToken> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ];
        let encoded_body = serde_urlencoded::to_string(params)
            .map_err(|e| AuthError::InvalidConfig(format!("Failed to encode token request: {}", e)))?;

        debug!(endpoint = endpoint, client_id = %credentials.client_id, "Requesting access token");

        let request = HttpRequest::new(HttpMethod::Post, endpoint)
            .header("Accept", "application/json")
            .form(encoded_body)
            .timeout(TOKEN_REQUEST_TIMEOUT);

        let response = self.http_client.execute(request).await.map_err(|e| {
            AuthError::TokenAcquisitionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.is_success() {
            let error_body = response
                .text()
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            warn!(
                endpoint = endpoint,
                status = response.status,
                "Token endpoint rejected request"
            );
            return Err(AuthError::TokenAcquisitionFailed {
                endpoint: endpoint.to_string(),
                reason: format!("Token endpoint returned {}: {}", response.status, error_body),
            });
        }

        let token: TokenResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "Token response carried an empty access_token".to_string(),
            ));
        }

        Ok(AccessToken::new(token.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
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

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn test_acquire_posts_client_credentials_form() {
        let mut mock_client = MockHttpClient::new();
        mock_client
            .expect_execute()
            .withf(|request| {
                let body = request
                    .body
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).to_string())
                    .unwrap_or_default();
                request.method == HttpMethod::Post
                    && request.url == "https://auth.example.com/token"
                    && body.contains("grant_type=client_credentials")
                    && body.contains("client_id=client-1")
                    && body.contains("client_secret=s%26cret")
            })
            .times(1)
            .returning(|_| Ok(response(200, r#"{"access_token":"tok-1","expires_in":3600}"#)));

        let source = ClientCredentialsSource::new(Arc::new(mock_client));
        let token = source
            .acquire(
                "https://auth.example.com/token",
                &ClientCredentials::new("client-1", "s&cret"),
            )
            .await
            .unwrap();

        assert_eq!(token.as_str(), "tok-1");
    }

    #[tokio::test]
    async fn test_acquire_rejected_credentials() {
        let mut mock_client = MockHttpClient::new();
        mock_client
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(401, r#"{"error":"invalid_client"}"#)));

        let source = ClientCredentialsSource::new(Arc::new(mock_client));
        let result = source
            .acquire("https://auth.example.com/token", &ClientCredentials::new("c", "s"))
            .await;

        assert!(matches!(
            result,
            Err(AuthError::TokenAcquisitionFailed { ref reason, .. }) if reason.contains("401")
        ));
    }

    #[tokio::test]
    async fn test_acquire_transport_failure_not_retried() {
        let mut mock_client = MockHttpClient::new();
        mock_client
            .expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::Transient("connection reset".to_string())));

        let source = ClientCredentialsSource::new(Arc::new(mock_client));
        let result = source
            .acquire("https://auth.example.com/token", &ClientCredentials::new("c", "s"))
            .await;

        assert!(matches!(result, Err(AuthError::TokenAcquisitionFailed { .. })));
    }

    #[tokio::test]
    async fn test_acquire_malformed_response() {
        let mut mock_client = MockHttpClient::new();
        mock_client
            .expect_execute()
            .returning(|_| Ok(response(200, r#"{"token_type":"bearer"}"#)));

        let source = ClientCredentialsSource::new(Arc::new(mock_client));
        let result = source
            .acquire("https://auth.example.com/token", &ClientCredentials::new("c", "s"))
            .await;

        assert!(matches!(result, Err(AuthError::InvalidResponse(_))));
    }
}
