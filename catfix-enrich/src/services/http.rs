//! Shared plumbing for the HTTP service adapters
//!
//! Each adapter owns one [`HttpEndpoint`]: a reqwest client with the service's
//! timeout, its base URL, an optional bearer token and an optional client-side
//! rate limiter. Request paths are given as segments and percent-encoded onto
//! the base URL.

use crate::error::{EnrichError, ServiceError};
use catfix_common::ServiceConfig;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use reqwest::Url;
use std::time::Duration;

const USER_AGENT: &str = concat!("catfix/", env!("CARGO_PKG_VERSION"));

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub(crate) struct HttpEndpoint {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    rate_limiter: Option<DirectRateLimiter>,
}

impl HttpEndpoint {
    /// # Errors
    /// `Validation` when the service has no usable base URL or timeout;
    /// `Service` when the HTTP client cannot be built
    pub(crate) fn from_config(service: &str, config: &ServiceConfig) -> Result<Self, EnrichError> {
        let raw_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                EnrichError::Validation(format!("{}: base_url is not configured", service))
            })?;
        let base_url = Url::parse(raw_url).map_err(|e| {
            EnrichError::Validation(format!("{}: invalid base_url {}: {}", service, raw_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(EnrichError::Validation(format!(
                "{}: base_url cannot take a path: {}",
                service, raw_url
            )));
        }

        let timeout = Duration::try_from_secs_f64(config.timeout_seconds).map_err(|e| {
            EnrichError::Validation(format!(
                "{}: invalid timeout_seconds {}: {}",
                service, config.timeout_seconds, e
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(ServiceError::from)?;

        let rate_limiter = config
            .rate_limit_per_second
            .and_then(NonZeroU32::new)
            .map(|per_second| RateLimiter::direct(Quota::per_second(per_second)));

        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        Ok(Self {
            client,
            base_url,
            api_key,
            rate_limiter,
        })
    }

    /// Base URL with `segments` appended, each percent-encoded
    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ServiceError::Connection(format!("base url cannot take a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Wait for a rate-limit permit, then start a request with auth applied
    pub(crate) async fn request(
        &self,
        method: reqwest::Method,
        segments: &[&str],
    ) -> Result<reqwest::RequestBuilder, ServiceError> {
        let url = self.url(segments)?;
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let builder = self.client.request(method, url);
        Ok(match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        })
    }
}

/// Turn a non-success response into [`ServiceError::Status`]
pub(crate) async fn status_error(response: reqwest::Response) -> ServiceError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ServiceError::Status {
        status,
        body: truncate(&body, 200),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
