//! Rate-limited request execution.
//!
//! [`RequestExecutor`] owns the HTTP client shared by all workers. Each
//! send is admitted by the calling worker's own [`RateLimiter`] first, and
//! carries the fixed per-request timeout. The executor itself never
//! retries: transport errors surface immediately, and status-based retry
//! policy belongs to [`send_with_retry`], which sleeps a fixed backoff and
//! re-checks cancellation between attempts.
//!
//! Gzip-encoded response bodies are decompressed transparently by the
//! client.

use anyhow::{anyhow, Result};
use reqwest::{RequestBuilder, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::PlatformConfig;
use crate::limiter::RateLimiter;

#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    retry_backoff: Duration,
}

impl RequestExecutor {
    pub fn new(platform: &PlatformConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(platform.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            retry_backoff: Duration::from_secs(platform.retry_backoff_secs),
        })
    }

    /// A GET request carrying the platform auth and accept headers.
    pub fn get(&self, url: &str, token: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header("Authorization", format!("token {}", token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("Accept-Encoding", "deflate, gzip;q=1.0, *;q=0.5")
    }

    /// Send one request after rate-limiter admission.
    ///
    /// Returns `Ok(None)` when cancellation fired before admission; a
    /// transport failure is fatal for this request and surfaces as `Err`.
    pub async fn execute(
        &self,
        request: RequestBuilder,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
    ) -> Result<Option<Response>> {
        if !limiter.acquire(cancel).await {
            return Ok(None);
        }
        let response = request.send().await?;
        Ok(Some(response))
    }

    /// Send a request, retrying on any non-success status with a fixed
    /// backoff until success or cancellation. There is no retry cap.
    ///
    /// Returns `Ok(None)` on cancellation.
    pub async fn send_with_retry(
        &self,
        request: RequestBuilder,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
    ) -> Result<Option<Response>> {
        loop {
            let attempt = request
                .try_clone()
                .ok_or_else(|| anyhow!("Request body is not cloneable"))?;

            let Some(response) = self.execute(attempt, limiter, cancel).await? else {
                return Ok(None);
            };

            if response.status().is_success() {
                return Ok(Some(response));
            }

            tracing::debug!(status = %response.status(), "non-success response, backing off");

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.retry_backoff) => {}
            }
        }
    }
}

/// Build a search query string from a keyword and optional language
/// qualifier.
pub fn build_search_query(keyword: &str, lang: &str, infile: bool) -> String {
    let mut query = keyword.to_string();
    if infile {
        query.push_str("+in:file");
    }
    if !lang.is_empty() {
        query.push_str("+language:");
        query.push_str(lang);
    }
    query
}

/// Expand the configured search URL template for one query and page.
pub fn build_search_url(template: &str, query: &str, page: usize) -> String {
    template
        .replace("{query}", query)
        .replace("{page}", &page.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_search_query() {
        assert_eq!(build_search_query("PASSWORD", "", false), "PASSWORD");
        assert_eq!(
            build_search_query("PASSWORD", "go", false),
            "PASSWORD+language:go"
        );
        assert_eq!(
            build_search_query("PASSWORD", "go", true),
            "PASSWORD+in:file+language:go"
        );
    }

    #[test]
    fn test_build_search_url() {
        let template = "https://api.example.com/search/code?q={query}&page={page}&per_page=100";
        assert_eq!(
            build_search_url(template, "PASSWORD+language:go", 3),
            "https://api.example.com/search/code?q=PASSWORD+language:go&page=3&per_page=100"
        );
    }
}
