use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::telegram::ScrapeError;

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that make a single feed produce no posts.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Public channel page could not be fetched or read
    #[error("Channel scrape failed: {0}")]
    Scrape(#[from] ScrapeError),
}

/// One entry of a parsed RSS/Atom document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub title: String,
    /// Resolved entry link, empty when the entry has none
    pub link: String,
    /// Published time, else updated time
    pub published: Option<DateTime<Utc>>,
}

/// A parsed RSS/Atom document.
#[derive(Debug, Clone, Default)]
pub struct SourceFeed {
    pub title: String,
    pub entries: Vec<SourceEntry>,
}

/// Download and parse an RSS/Atom feed.
pub async fn fetch_source(client: &reqwest::Client, url: &str) -> Result<SourceFeed, FeedError> {
    let bytes = fetch_feed_bytes(client, url).await?;
    parse_source(&bytes)
}

/// Parse raw RSS/Atom bytes.
pub fn parse_source(bytes: &[u8]) -> Result<SourceFeed, FeedError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FeedError::Parse(e.to_string()))?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Prefer the alternate (HTML) link, Atom feeds often list `self` first
            let link = entry
                .links
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| entry.links.first())
                .map(|l| l.href.trim().to_string())
                .unwrap_or_default();

            SourceEntry {
                title: entry
                    .title
                    .map(|t| t.content.trim().to_string())
                    .unwrap_or_default(),
                link,
                published: entry.published.or(entry.updated),
            }
        })
        .collect();

    Ok(SourceFeed {
        title: feed
            .title
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default(),
        entries,
    })
}

/// GET a feed body with retries on 429, 5xx and truncated downloads.
async fn fetch_feed_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FeedError> {
    fetch_feed_bytes_within(client, url, REQUEST_TIMEOUT).await
}

/// Like [`fetch_feed_bytes`], with `timeout` bounding each attempt from
/// request to the last body byte.
async fn fetch_feed_bytes_within(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FeedError> {
    let mut retry_count = 0;

    loop {
        let outcome = tokio::time::timeout(timeout, fetch_attempt(client, url))
            .await
            .map_err(|_| FeedError::Timeout)?;

        match outcome {
            Ok(bytes) => return Ok(bytes),
            Err(e @ (FeedError::RateLimited(_)
            | FeedError::HttpStatus(500..=599)
            | FeedError::IncompleteResponse { .. })) => {
                if retry_count >= MAX_RETRIES {
                    return Err(e);
                }

                let delay_secs = 1u64 << retry_count; // 1s, 2s, 4s
                tracing::warn!(
                    feed = %url,
                    error = %e,
                    retry = retry_count + 1,
                    delay_secs = delay_secs,
                    "Transient feed error, retrying after delay"
                );

                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_attempt(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FeedError> {
    let response = client.get(url).send().await?;
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(FeedError::RateLimited(MAX_RETRIES));
    }
    if !status.is_success() {
        // 4xx fails immediately, 5xx is retried by the caller
        return Err(FeedError::HttpStatus(status.as_u16()));
    }

    read_limited_bytes(response, MAX_FEED_SIZE).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FeedError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FeedError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FeedError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FeedError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
