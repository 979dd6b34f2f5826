//! Shared HTTP plumbing for all backends.
//!
//! Every request waits on one process-wide rate limiter so that builds for
//! many identities cannot flood the media server together.

use crate::provider::errors::ProviderError;
use crate::provider::json::parse_json_with_context;
use crate::utils::log_if_slow;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;
use url::Url;

const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(5);

/// Connection settings shared by every backend client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub requests_per_second: u32,
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 8,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A rate-limited JSON client bound to one base URL and auth header.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    limiter: Arc<DefaultDirectRateLimiter>,
    base_url: Url,
    auth_header: HeaderName,
    token: HeaderValue,
}

impl UpstreamClient {
    pub fn new(
        base_url: Url,
        auth_header: &'static str,
        token: &str,
        settings: &ClientSettings,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .user_agent(concat!("reelpick/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let rps = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            http,
            limiter,
            base_url: normalize_base(base_url),
            auth_header: HeaderName::from_static(auth_header),
            token: Self::token_value(token)?,
        })
    }

    /// A client for the same server that authenticates with a different token.
    ///
    /// The connection pool and rate limiter are shared with `self`.
    pub fn with_token(&self, token: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            token: Self::token_value(token)?,
            ..self.clone()
        })
    }

    /// A client for another host, sharing the connection pool and rate limiter.
    pub fn with_base_url(&self, base_url: Url) -> Self {
        Self {
            base_url: normalize_base(base_url),
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn token_value(token: &str) -> Result<HeaderValue, ProviderError> {
        let mut value = HeaderValue::from_str(token)
            .map_err(|e| ProviderError::Other(anyhow::anyhow!("invalid token header: {e}")))?;
        value.set_sensitive(true);
        Ok(value)
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ProviderError::Other(anyhow::anyhow!("invalid request path {path}: {e}")))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = self.url(path)?;
        let request = self.http.get(url.clone()).query(query);
        self.send_json(request, url).await
    }

    pub async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = self.url(path)?;
        let request = self.http.post(url.clone());
        self.send_json(request, url).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: Url,
    ) -> Result<T, ProviderError> {
        self.limiter.until_ready().await;

        let start = Instant::now();
        let response = request
            .header(self.auth_header.clone(), self.token.clone())
            .send()
            .await?;
        let status = response.status();
        log_if_slow(start, SLOW_REQUEST_THRESHOLD, url.path());
        trace!(url = %url.path(), status = status.as_u16(), "upstream response");

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                url: url.path().to_string(),
            });
        }

        let body = response.text().await?;
        parse_json_with_context(&body).map_err(|source| ProviderError::ParseFailed {
            status: status.as_u16(),
            url: url.path().to_string(),
            source,
        })
    }
}

/// Ensure the base path ends in `/` so relative joins append instead of replace.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
