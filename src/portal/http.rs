//! HTTP client shared by the portal implementations.
//!
//! Wraps `reqwest` with the adaptive rate limiter, a fixed per-request
//! courtesy delay, JSON decoding, and HTTP status classification into
//! [`PortalError`] variants.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::rate_limit::RateLimiter;
use super::PortalError;

pub const USER_AGENT: &str = "govharvest/0.3 (government data ingestion)";

/// HTTP client with rate limiting and typed JSON responses.
#[derive(Debug, Clone)]
pub struct PortalClient {
    client: Client,
    rate_limiter: RateLimiter,
    request_delay: Duration,
}

impl PortalClient {
    /// Create a new portal client.
    pub fn new(timeout: Duration, request_delay: Duration) -> Self {
        Self::with_default_headers(timeout, request_delay, HeaderMap::new())
    }

    /// Create a new portal client with extra headers sent on every request.
    pub fn with_default_headers(
        timeout: Duration,
        request_delay: Duration,
        headers: HeaderMap,
    ) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .default_headers(headers)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            rate_limiter: RateLimiter::new(),
            request_delay,
        }
    }

    /// Get the rate limiter for this client.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Make a GET request and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, PortalError> {
        let domain = self.rate_limiter.acquire(url).await;
        let response = self.client.get(url).send().await?;
        self.finish(domain.as_deref(), url, response).await
    }

    /// Make a POST request with a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, PortalError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let domain = self.rate_limiter.acquire(url).await;
        let response = self.client.post(url).json(body).send().await?;
        self.finish(domain.as_deref(), url, response).await
    }

    /// Report the response status to the rate limiter, apply the courtesy
    /// delay, and decode the body.
    async fn finish<T: DeserializeOwned>(
        &self,
        domain: Option<&str>,
        url: &str,
        response: reqwest::Response,
    ) -> Result<T, PortalError> {
        let status = response.status();
        let code = status.as_u16();

        if let Some(domain) = domain {
            if code == 429 || code == 503 {
                self.rate_limiter.report_rate_limit(domain, code).await;
            } else if status.is_server_error() {
                self.rate_limiter.report_server_error(domain).await;
            } else if status.is_client_error() {
                self.rate_limiter.report_client_error(domain).await;
            } else if status.is_success() {
                self.rate_limiter.report_success(domain).await;
            }
        }

        // Every request pays the courtesy delay, including failed ones
        tokio::time::sleep(self.request_delay).await;

        if !status.is_success() {
            return Err(classify_error_status(status, url));
        }

        response.json::<T>().await.map_err(|err| {
            if err.is_decode() {
                PortalError::Parse(format!("decoding {url}: {err}"))
            } else {
                PortalError::Network(err.to_string())
            }
        })
    }
}

/// Map an unsuccessful HTTP status to its error classification.
///
/// 429/503 are upstream throttling; 404 is absence; everything else is a
/// network-class failure of this request.
fn classify_error_status(status: StatusCode, url: &str) -> PortalError {
    match status.as_u16() {
        404 => PortalError::NotFound(url.to_string()),
        429 | 503 => PortalError::RateLimit {
            status: status.as_u16(),
        },
        code => PortalError::Network(format!("HTTP {code} from {url}")),
    }
}
