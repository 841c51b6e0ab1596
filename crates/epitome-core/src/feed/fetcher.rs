use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Proxy, StatusCode};
use url::Url;

use super::models::FetchedFeed;
use super::parser::parse_feed;
use crate::config::AppConfig;
use crate::{Error, Result};

const MAX_FEED_BYTES: usize = 5 * 1024 * 1024;
const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 500;

// Rotating User-Agent pool; some feed hosts reject unknown clients
static USER_AGENT_INDEX: AtomicUsize = AtomicUsize::new(0);
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

fn next_user_agent() -> &'static str {
    let index = USER_AGENT_INDEX.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len();
    USER_AGENTS[index]
}

/// Anything that can turn a feed URL into normalized items
#[async_trait]
pub trait FeedProvider: Send + Sync {
    /// Fetch and parse one feed. Fails with [`Error::Fetch`] or [`Error::Http`].
    async fn fetch(&self, url: &str) -> Result<FetchedFeed>;
}

/// Check that a URL is an absolute http(s) URL
pub fn validate_feed_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(Error::Validation(format!("Not a web feed URL: {}", url))),
    }
}

/// HTTP feed fetcher
pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Self::build_client(config.sync.request_timeout_secs, &config.sync.proxy_url)?;
        Ok(Self { client })
    }

    /// Build HTTP client with optional proxy
    fn build_client(timeout_secs: u64, proxy_url: &Option<String>) -> Result<Client> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(ref proxy) = proxy_url {
            let proxy = Proxy::all(proxy)
                .map_err(|e| Error::Config(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
            tracing::info!("Using HTTP proxy for feed fetching");
        }

        builder.build().map_err(Error::Http)
    }

    fn build_headers(user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "application/rss+xml,application/atom+xml,application/feed+json,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("fr-FR,fr;q=0.9,en;q=0.8"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        headers
    }

    /// Fetch with retry and exponential backoff
    async fn fetch_with_retry(&self, url: &str) -> Result<(StatusCode, Bytes)> {
        let mut last_error = None;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        for attempt in 0..MAX_RETRIES {
            let user_agent = next_user_agent();
            tracing::debug!(url, attempt = attempt + 1, "Fetching feed");

            match self.client.get(url).headers(Self::build_headers(user_agent)).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE
                        || (status == StatusCode::FORBIDDEN && attempt < MAX_RETRIES - 1)
                    {
                        tracing::warn!("Received {} for {}, retrying after {}ms", status, url, delay_ms);
                        last_error = Some(Error::Fetch(format!("HTTP {} for URL: {}", status, url)));
                    } else {
                        match response.bytes().await {
                            Ok(bytes) => return Ok((status, bytes)),
                            Err(e) => {
                                tracing::warn!("Failed to read response body: {}", e);
                                last_error = Some(Error::Http(e));
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Request failed for {} (attempt {}): {}", url, attempt + 1, e);
                    last_error = Some(Error::Http(e));
                }
            }

            if attempt < MAX_RETRIES - 1 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Fetch(format!("Failed to fetch URL after {} retries: {}", MAX_RETRIES, url))
        }))
    }

    /// Check if content is a Cloudflare challenge page
    fn is_cloudflare_challenge(content: &[u8]) -> bool {
        let check_len = content.len().min(2048);
        let preview = String::from_utf8_lossy(&content[..check_len]);

        preview.contains("Just a moment...")
            || preview.contains("cf-browser-verification")
            || preview.contains("_cf_chl_opt")
            || preview.contains("challenge-platform")
    }
}

#[async_trait]
impl FeedProvider for FeedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
        validate_feed_url(url)?;

        let (status, content) = self.fetch_with_retry(url).await?;

        if content.len() > MAX_FEED_BYTES {
            return Err(Error::Fetch(format!(
                "Feed too large ({} bytes) for URL: {}",
                content.len(),
                url
            )));
        }
        if !status.is_success() {
            return Err(Error::Fetch(format!("HTTP {} for URL: {}", status, url)));
        }
        if Self::is_cloudflare_challenge(&content) {
            return Err(Error::Fetch(format!(
                "Cloudflare JavaScript challenge detected for URL: {}",
                url
            )));
        }

        parse_feed(&content)
    }
}
