//! Bing IndexNow client: site URL normalization, chunked submission under a
//! concurrency limit, and the retry/backoff ladder for transient failures.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::types::{BingBatchResult, BingBatchUrlResult, BingResultStatus, UrlItem};

const BING_ENDPOINT: &str = "https://ssl.bing.com/webmaster/api.svc/json/SubmitUrlbatch";
const CHUNK_SIZE: usize = 225;
const BING_CHUNK_CAP: usize = 250;
const DEFAULT_MAX_CONCURRENT: usize = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAYS_SECS: [u64; 3] = [1, 12, 24];

#[derive(Serialize)]
struct SubmitRequest<'a> {
    #[serde(rename = "siteUrl")]
    site_url: &'a str,
    #[serde(rename = "urlList")]
    url_list: &'a [String],
}

pub struct BingIndexingClient {
    http: Client,
    api_key: String,
    site_url: String,
    max_concurrent: usize,
    endpoint: String,
}

impl BingIndexingClient {
    pub fn new(api_key: String, shop: &str) -> Self {
        Self {
            http: Client::new(),
            api_key,
            site_url: normalize_site_url(shop),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            endpoint: BING_ENDPOINT.to_string(),
        }
    }

    /// Test hook: points submissions at a local mock server instead of
    /// Bing's production endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Submits `index` items (DELETE is unsupported by Bing and dropped,
    /// logged only), capped to `⌈1.10 × bing_limit⌉` and chunked into
    /// batches of [`CHUNK_SIZE`] submitted concurrently under a semaphore.
    pub async fn submit_batch(
        &self,
        index: &[UrlItem],
        delete_count: usize,
        bing_limit: i64,
        retry_limit: u32,
    ) -> BingBatchResult {
        if delete_count > 0 {
            warn!(
                delete_count,
                "Bing does not support URL deletion; dropping DELETE actions"
            );
        }

        let effective_limit = effective_limit(bing_limit);
        let urls: Vec<String> = index
            .iter()
            .take(effective_limit)
            .map(|i| i.web_url.clone())
            .collect();

        let mut result = BingBatchResult {
            total_urls: urls.len(),
            ..Default::default()
        };
        if urls.is_empty() {
            return result;
        }

        let chunks: Vec<Vec<String>> = urls
            .chunks(CHUNK_SIZE.min(BING_CHUNK_CAP))
            .map(|c| c.to_vec())
            .collect();
        result.total_batches = chunks.len();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = Vec::with_capacity(chunks.len());
        for (batch_number, batch_urls) in chunks.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let http = self.http.clone();
            let api_key = self.api_key.clone();
            let site_url = self.site_url.clone();
            let endpoint = self.endpoint.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                submit_chunk_with_retry(
                    &http, &endpoint, &api_key, &site_url, batch_urls, batch_number, retry_limit,
                )
                .await
            }));
        }

        for task in tasks {
            match task.await {
                Ok(chunk_result) => result.add(chunk_result),
                Err(e) => warn!(error = %e, "bing submit task panicked"),
            }
        }

        result
    }
}

async fn submit_chunk_with_retry(
    http: &Client,
    endpoint: &str,
    api_key: &str,
    site_url: &str,
    batch_urls: Vec<String>,
    batch_number: usize,
    retry_limit: u32,
) -> BingBatchUrlResult {
    let mut attempt = 1u32;
    loop {
        let outcome = submit_once(http, endpoint, api_key, site_url, &batch_urls, batch_number, attempt).await;
        match outcome {
            ChunkOutcome::Terminal(result) => return result,
            ChunkOutcome::Retryable(result) => {
                if attempt >= retry_limit {
                    return result;
                }
                let delay = retry_delay_secs(attempt);
                debug!(batch_number, delay, attempt, "retrying bing batch");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                attempt += 1;
            }
        }
    }
}

/// `attempt` is 1-based (the attempt that just failed); `RETRY_DELAYS_SECS[0]`
/// (1s) is never reached since the first retry already indexes at 1 (12s),
/// matching the source's observed 12s-then-24s ladder under the default
/// `retry_limit` of 3.
fn retry_delay_secs(attempt: u32) -> u64 {
    RETRY_DELAYS_SECS[(attempt as usize).min(RETRY_DELAYS_SECS.len() - 1)]
}

enum ChunkOutcome {
    Terminal(BingBatchUrlResult),
    Retryable(BingBatchUrlResult),
}

async fn submit_once(
    http: &Client,
    endpoint: &str,
    api_key: &str,
    site_url: &str,
    batch_urls: &[String],
    batch_number: usize,
    attempt: u32,
) -> ChunkOutcome {
    let url = format!("{endpoint}?apikey={api_key}");
    let payload = SubmitRequest {
        site_url,
        url_list: batch_urls,
    };

    let response = http
        .post(&url)
        .timeout(REQUEST_TIMEOUT)
        .json(&payload)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            let result = BingBatchUrlResult {
                batch_number,
                urls: batch_urls.to_vec(),
                url_count: batch_urls.len(),
                status: BingResultStatus::Failed,
                attempts: attempt,
                error_message: Some(if e.is_timeout() {
                    "request timeout".to_string()
                } else {
                    e.to_string()
                }),
                http_status: None,
            };
            return ChunkOutcome::Retryable(result);
        }
    };

    let status = response.status();
    let body_text = response.text().await.unwrap_or_default();

    let result = BingBatchUrlResult {
        batch_number,
        urls: batch_urls.to_vec(),
        url_count: batch_urls.len(),
        status: match status.as_u16() {
            200 => BingResultStatus::Success,
            403 => BingResultStatus::QuotaExceeded,
            429 => BingResultStatus::RateLimited,
            _ => BingResultStatus::Failed,
        },
        attempts: attempt,
        error_message: if status.as_u16() == 200 {
            None
        } else {
            Some(body_text)
        },
        http_status: Some(status.as_u16()),
    };

    match status.as_u16() {
        200 => ChunkOutcome::Terminal(result),
        403 => ChunkOutcome::Terminal(result),
        429 => ChunkOutcome::Retryable(result),
        code if code >= 500 => ChunkOutcome::Retryable(result),
        _ => ChunkOutcome::Terminal(result),
    }
}

fn effective_limit(limit: i64) -> usize {
    (((limit.max(0) as f64) * 1.10).ceil() as i64).max(0) as usize
}

/// Strips the scheme, trims a trailing slash, and prepends `www.`/`http://`
/// as Bing expects. A known simplification for `.myshopify.com` domains,
/// carried over unchanged from the source system.
fn normalize_site_url(shop: &str) -> String {
    let mut url = shop.replace("https://", "").replace("http://", "");
    while url.ends_with('/') {
        url.pop();
    }
    if !url.starts_with("www.") {
        url = format!("www.{url}");
    }
    format!("http://{url}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_domain() {
        assert_eq!(normalize_site_url("shop.example.com"), "http://www.shop.example.com");
    }

    #[test]
    fn normalizes_strips_scheme_and_trailing_slash() {
        assert_eq!(
            normalize_site_url("https://www.shop.example.com/"),
            "http://www.shop.example.com"
        );
    }

    #[test]
    fn normalizes_myshopify_domain_unchanged_by_special_casing() {
        assert_eq!(
            normalize_site_url("a.myshopify.com"),
            "http://www.a.myshopify.com"
        );
    }

    #[test]
    fn effective_limit_applies_ten_percent_headroom() {
        assert_eq!(effective_limit(200), 220);
    }

    #[test]
    fn retry_delay_follows_twelve_then_twenty_four_ladder() {
        assert_eq!(retry_delay_secs(1), 12);
        assert_eq!(retry_delay_secs(2), 24);
        assert_eq!(retry_delay_secs(3), 24);
    }
}
