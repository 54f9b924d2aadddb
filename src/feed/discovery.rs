use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

use super::fetcher::BatchError;
use super::source::{fetch_source, FeedError};
use super::telegram::{channel_slug, is_valid_slug, telegram_channel_url, ScrapeError, TelegramScraper};
use crate::storage::Feed;
use crate::util::{validate_feed_url, UrlValidationError};

/// Links pasted into chat; trailing punctuation is trimmed afterwards
const HTTPS_URL_PATTERN: &str = r#"https://[^\s<>"'`]+"#;
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"'];

/// Candidates validated at the same time
const VALIDATION_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: UrlValidationError,
    },
    #[error("invalid link pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("not a feed: {0}")]
    Feed(#[from] FeedError),
    #[error("channel unavailable: {0}")]
    Channel(#[from] ScrapeError),
}

/// Subscribable feeds found in a message, in the order they appeared.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub feeds: Vec<Feed>,
    /// Links and mentions that could not be validated
    pub error: Option<BatchError>,
}

/// Subscription targets mentioned in free text.
#[derive(Debug, Default)]
pub struct Candidates {
    /// `https://` links that passed screening, then `@channel` URLs
    pub urls: Vec<String>,
    pub rejected: Vec<DiscoveryError>,
}

/// Pull `https://` links and `@channel` mentions out of `text`.
///
/// Links pointing at localhost or private networks are rejected here,
/// before anything is fetched.
pub fn extract_candidates(text: &str) -> Result<Candidates, DiscoveryError> {
    let re = Regex::new(HTTPS_URL_PATTERN)?;
    let mut candidates = Candidates::default();

    for m in re.find_iter(text) {
        let raw = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        match validate_feed_url(raw) {
            Ok(_) => candidates.urls.push(raw.to_string()),
            Err(source) => candidates.rejected.push(DiscoveryError::InvalidUrl {
                url: raw.to_string(),
                source,
            }),
        }
    }

    candidates.urls.extend(
        text.split_whitespace()
            .filter_map(|token| token.strip_prefix('@'))
            .filter(|slug| is_valid_slug(slug))
            .map(telegram_channel_url),
    );

    Ok(candidates)
}

/// Find and validate every feed mentioned in `text`.
///
/// Each candidate is fetched once; results are deduplicated by their
/// canonical URL.
pub async fn find_valid_feeds(
    client: &reqwest::Client,
    scraper: &TelegramScraper,
    text: &str,
) -> DiscoveryOutcome {
    let mut errors = BatchError::default();

    let candidates = match extract_candidates(text.trim()) {
        Ok(candidates) => candidates,
        Err(e) => {
            errors.push(e.to_string());
            return DiscoveryOutcome {
                feeds: Vec::new(),
                error: Some(errors),
            };
        }
    };

    for rejected in &candidates.rejected {
        errors.push(rejected.to_string());
    }

    let mut outcome = resolve_candidates(client, scraper, candidates.urls).await;
    if let Some(resolve_errors) = outcome.error.take() {
        for failure in resolve_errors.failures() {
            errors.push(failure.clone());
        }
    }
    outcome.error = (!errors.is_empty()).then_some(errors);
    outcome
}

/// Validate already-screened URLs by fetching them.
pub(crate) async fn resolve_candidates(
    client: &reqwest::Client,
    scraper: &TelegramScraper,
    urls: Vec<String>,
) -> DiscoveryOutcome {
    let mut outcome = DiscoveryOutcome::default();
    let mut errors = BatchError::default();
    let mut seen = HashSet::new();

    let mut results = stream::iter(urls)
        .map(|url| async move {
            let result = validate_feed(client, scraper, &url).await;
            (url, result)
        })
        .buffered(VALIDATION_CONCURRENCY);

    while let Some((url, result)) = results.next().await {
        match result {
            Ok(feed) => {
                if seen.insert(feed.url.clone()) {
                    outcome.feeds.push(feed);
                }
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Candidate feed rejected");
                errors.push(format!("validate feed {}: {}", url, e));
            }
        }
    }

    outcome.error = (!errors.is_empty()).then_some(errors);
    outcome
}

async fn validate_feed(
    client: &reqwest::Client,
    scraper: &TelegramScraper,
    url: &str,
) -> Result<Feed, DiscoveryError> {
    let url = url.trim();

    if let Some(slug) = channel_slug(url) {
        let canonical_url = telegram_channel_url(&slug);
        let title = scraper.fetch_channel_title(&slug).await?;
        let title = match title.trim() {
            "" => {
                tracing::warn!(url = %canonical_url, "Empty channel title");
                canonical_url.clone()
            }
            t => t.to_string(),
        };
        return Ok(Feed {
            url: canonical_url,
            title,
        });
    }

    let source = fetch_source(client, url).await?;
    let title = match source.title.trim() {
        "" => {
            tracing::warn!(url = %url, "Empty feed title, using URL");
            url.to_string()
        }
        t => t.to_string(),
    };

    Ok(Feed {
        url: url.to_string(),
        title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Example Blog</title></channel></rss>"#;

    #[test]
    fn test_extract_links_and_mentions() {
        let text = "Try https://example.com/feed.xml, and @example_channel or @tiny.\n\
                    Also (https://blog.example.org/rss) plus @second_channel";
        let candidates = extract_candidates(text).unwrap();

        assert_eq!(
            candidates.urls,
            vec![
                "https://example.com/feed.xml".to_string(),
                "https://blog.example.org/rss".to_string(),
                "https://t.me/s/example_channel".to_string(),
                "https://t.me/s/second_channel".to_string(),
            ]
        );
        assert!(candidates.rejected.is_empty());
    }

    #[test]
    fn test_extract_ignores_plain_http_and_rejects_private_hosts() {
        let text = "http://example.com/feed https://192.168.0.10/feed https://localhost/rss";
        let candidates = extract_candidates(text).unwrap();

        assert!(candidates.urls.is_empty());
        assert_eq!(candidates.rejected.len(), 2);
    }

    #[test]
    fn test_extract_mentions_need_valid_slug() {
        let candidates = extract_candidates("@abc @this-is-bad email@example_host @fine_name").unwrap();
        assert_eq!(candidates.urls, vec!["https://t.me/s/fine_name".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_candidates_validates_and_dedups() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/s/example_channel"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><head><meta property="og:title" content="Channel"></head></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let scraper = TelegramScraper::new().unwrap().with_base_url(server.uri());
        let feed_url = format!("{}/feed.xml", server.uri());

        let outcome = resolve_candidates(
            &client,
            &scraper,
            vec![
                feed_url.clone(),
                "https://t.me/example_channel".to_string(),
                format!("{}/missing.xml", server.uri()),
                "https://t.me/s/example_channel".to_string(),
                feed_url.clone(),
            ],
        )
        .await;

        assert_eq!(
            outcome.feeds,
            vec![
                Feed {
                    url: feed_url,
                    title: "Example Blog".into()
                },
                Feed {
                    url: "https://t.me/s/example_channel".into(),
                    title: "Channel".into()
                },
            ]
        );
        let error = outcome.error.unwrap();
        assert_eq!(error.len(), 1);
        assert!(error.to_string().contains("missing.xml"));
    }

    #[tokio::test]
    async fn test_channel_without_title_uses_canonical_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let scraper = TelegramScraper::new().unwrap().with_base_url(server.uri());
        let outcome = resolve_candidates(
            &reqwest::Client::new(),
            &scraper,
            vec!["https://t.me/s/untitled".to_string()],
        )
        .await;

        assert_eq!(outcome.feeds[0].title, "https://t.me/s/untitled");
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_find_valid_feeds_reports_rejected_links() {
        let outcome = find_valid_feeds(
            &reqwest::Client::new(),
            &TelegramScraper::new().unwrap(),
            "nothing to see at https://10.0.0.1/feed",
        )
        .await;

        assert!(outcome.feeds.is_empty());
        assert!(outcome.error.unwrap().to_string().contains("10.0.0.1"));
    }
}
