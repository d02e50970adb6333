//! Shared HTTP plumbing for connectors.
//!
//! Wraps `reqwest` with retry/backoff, rate limiting, and OAuth2
//! client-credentials token management so individual connectors only
//! deal with their API's paths and payloads.

use crate::secure_string::SecureString;
use crate::traits::{AuthConfig, ConnectorConfig, ConnectorError, ConnectorResult};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

type RateLimiterType = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// HTTP client with retry, rate limiting, and OAuth2 support.
pub struct HttpClient {
    client: Client,
    config: ConnectorConfig,
    /// Cached OAuth2 token when using client-credentials auth.
    oauth_token: Arc<RwLock<Option<OAuthToken>>>,
    rate_limiter: Option<Arc<RateLimiterType>>,
}

/// OAuth2 token with expiration; the token itself is zeroized on drop.
#[derive(Clone)]
struct OAuthToken {
    access_token: SecureString,
    expires_at: std::time::Instant,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per period.
    pub max_requests: u32,
    /// Period duration.
    pub period: Duration,
    /// Maximum burst size.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            period: Duration::from_secs(60),
            burst_size: 10,
        }
    }
}

impl HttpClient {
    /// Creates a new HTTP client from connector configuration.
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        Self::with_rate_limit(config, None)
    }

    /// Creates a new HTTP client with rate limiting.
    pub fn with_rate_limit(
        config: ConnectorConfig,
        rate_limit: Option<RateLimitConfig>,
    ) -> ConnectorResult<Self> {
        // TLS verification cannot be disabled in release builds
        let verify_tls = if !config.verify_tls {
            #[cfg(debug_assertions)]
            {
                warn!(
                    base_url = %config.base_url,
                    connector_name = %config.name,
                    "TLS certificate verification DISABLED in development mode"
                );
                false
            }
            #[cfg(not(debug_assertions))]
            {
                warn!(
                    base_url = %config.base_url,
                    connector_name = %config.name,
                    "Attempted to disable TLS verification in production - request IGNORED"
                );
                true
            }
        } else {
            true
        };

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!verify_tls)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            if let (Ok(name), Ok(val)) = (
                reqwest::header::HeaderName::try_from(key.as_str()),
                reqwest::header::HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, val);
            }
        }
        builder = builder.default_headers(headers);

        let client = builder
            .build()
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        let rate_limiter = rate_limit.map(|rl| {
            let quota = Quota::with_period(rl.period / rl.max_requests)
                .expect("Invalid rate limit period")
                .allow_burst(NonZeroU32::new(rl.burst_size).unwrap_or(NonZeroU32::MIN));
            Arc::new(GovernorRateLimiter::direct(quota))
        });

        Ok(Self {
            client,
            config,
            oauth_token: Arc::new(RwLock::new(None)),
            rate_limiter,
        })
    }

    /// Builds a URL from a path. Absolute URLs pass through unchanged,
    /// which pagination links (`@odata.nextLink`) rely on.
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Gets the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Executes a GET request with retry logic.
    pub async fn get(&self, path: &str) -> ConnectorResult<Response> {
        let url = self.build_url(path);
        let request = self.client.get(&url);
        self.execute_with_retry(request).await
    }

    /// Executes a GET request and deserializes the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ConnectorResult<T> {
        let response = self.get(path).await?;
        self.parse_json_response(response).await
    }

    /// Executes a POST request with retry logic.
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> ConnectorResult<Response> {
        let url = self.build_url(path);
        let request = self.client.post(&url).json(body);
        self.execute_with_retry(request).await
    }

    /// Executes a POST request and deserializes the JSON response.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> ConnectorResult<R> {
        let response = self.post(path, body).await?;
        self.parse_json_response(response).await
    }

    /// Executes a form-encoded POST without connector auth (used for
    /// token endpoints, which authenticate via the form body).
    pub async fn post_form_unauthenticated<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        form: &T,
    ) -> ConnectorResult<R> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| ConnectorError::AuthenticationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::AuthenticationFailed(format!(
                "token request failed: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))
    }

    /// Parses a JSON response body.
    async fn parse_json_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> ConnectorResult<T> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| {
            ConnectorError::InvalidResponse(format!(
                "Failed to parse response (status {}): {} - Body: {}",
                status,
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Executes a request with authentication, rate limiting, retries,
    /// and error mapping.
    async fn execute_with_retry(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> ConnectorResult<Response> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        request = self.add_auth(request).await?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(100);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!("Retry attempt {} after {:?}", attempt, delay);
                sleep(delay).await;
                let jitter = rand_jitter();
                delay = std::cmp::min(delay * 2 + jitter, Duration::from_secs(30));
            }

            let request_clone = request
                .try_clone()
                .ok_or_else(|| ConnectorError::Internal("Failed to clone request".to_string()))?;

            match request_clone.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);

                        warn!("Rate limited, waiting {} seconds", retry_after);

                        if attempt < self.config.max_retries {
                            sleep(Duration::from_secs(retry_after)).await;
                            continue;
                        }

                        return Err(ConnectorError::RateLimited(retry_after));
                    }

                    if status.is_server_error() && attempt < self.config.max_retries {
                        warn!("Server error {}, retrying...", status);
                        last_error = Some(ConnectorError::RequestFailed(format!(
                            "Server error: {}",
                            status
                        )));
                        continue;
                    }

                    if status.is_client_error() {
                        return match status {
                            StatusCode::UNAUTHORIZED => {
                                Err(ConnectorError::AuthenticationFailed("Unauthorized".into()))
                            }
                            StatusCode::FORBIDDEN => {
                                Err(ConnectorError::AuthorizationDenied("Forbidden".into()))
                            }
                            StatusCode::NOT_FOUND => {
                                Err(ConnectorError::NotFound("Resource not found".into()))
                            }
                            StatusCode::BAD_REQUEST => {
                                let body = response.text().await.unwrap_or_default();
                                Err(ConnectorError::RequestFailed(format!(
                                    "Bad request: {}",
                                    body
                                )))
                            }
                            _ => Err(ConnectorError::RequestFailed(format!(
                                "Client error: {}",
                                status
                            ))),
                        };
                    }

                    return Ok(response);
                }
                Err(e) => {
                    if e.is_timeout() {
                        last_error = Some(ConnectorError::Timeout(e.to_string()));
                    } else if e.is_connect() {
                        last_error = Some(ConnectorError::ConnectionFailed(e.to_string()));
                    } else {
                        last_error = Some(ConnectorError::RequestFailed(e.to_string()));
                    }

                    if attempt >= self.config.max_retries {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ConnectorError::Internal("Unknown error".to_string())))
    }

    /// Adds authentication to a request.
    async fn add_auth(
        &self,
        request: reqwest::RequestBuilder,
    ) -> ConnectorResult<reqwest::RequestBuilder> {
        match &self.config.auth {
            AuthConfig::None => Ok(request),

            AuthConfig::ApiKey { key, header_name } => {
                Ok(request.header(header_name, key.expose_secret()))
            }

            AuthConfig::BearerToken { token } => {
                Ok(request.header("Authorization", format!("Bearer {}", token.expose_secret())))
            }

            AuthConfig::Basic { username, password } => {
                Ok(request.basic_auth(username, Some(password.expose_secret())))
            }

            AuthConfig::OAuth2 {
                client_id,
                client_secret,
                token_url,
                scopes,
            } => {
                let token = self
                    .get_oauth_token(client_id, client_secret, token_url, scopes)
                    .await?;
                Ok(request.header("Authorization", format!("Bearer {}", token.expose_secret())))
            }
        }
    }

    /// Gets or refreshes a client-credentials OAuth2 token.
    async fn get_oauth_token(
        &self,
        client_id: &str,
        client_secret: &SecureString,
        token_url: &str,
        scopes: &[String],
    ) -> ConnectorResult<SecureString> {
        {
            let token = self.oauth_token.read().await;
            if let Some(t) = &*token {
                if t.expires_at > std::time::Instant::now() + Duration::from_secs(60) {
                    return Ok(t.access_token.clone());
                }
            }
        }

        info!("Fetching new OAuth2 token");

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("scope", &scopes.join(" ")),
        ];

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let token_response: TokenResponse =
            self.post_form_unauthenticated(token_url, &params).await?;

        let secure_access_token = SecureString::new(token_response.access_token);

        let oauth_token = OAuthToken {
            access_token: secure_access_token.clone(),
            expires_at: std::time::Instant::now() + Duration::from_secs(token_response.expires_in),
        };

        {
            let mut token = self.oauth_token.write().await;
            *token = Some(oauth_token);
        }

        Ok(secure_access_token)
    }
}

/// Small random jitter for exponential backoff.
fn rand_jitter() -> Duration {
    use rand::Rng;
    Duration::from_millis(rand::thread_rng().gen_range(0..100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::AuthConfig;

    fn test_config() -> ConnectorConfig {
        ConnectorConfig::new("test", "https://api.example.com/v1/", AuthConfig::None)
    }

    #[test]
    fn test_build_url_joins_path() {
        let client = HttpClient::new(test_config()).unwrap();
        assert_eq!(
            client.build_url("/devices"),
            "https://api.example.com/v1/devices"
        );
        assert_eq!(
            client.build_url("devices"),
            "https://api.example.com/v1/devices"
        );
    }

    #[test]
    fn test_build_url_passes_absolute_through() {
        let client = HttpClient::new(test_config()).unwrap();
        assert_eq!(
            client.build_url("https://other.example.com/page2"),
            "https://other.example.com/page2"
        );
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.burst_size, 10);
    }
}
