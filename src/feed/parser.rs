use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use super::source::{fetch_source, FeedError, SourceEntry};
use super::summary_cache::{summary_cache_key, SummaryCache, DEFAULT_CAPACITY};
use super::telegram::{channel_slug, telegram_channel_url, ChannelItem, TelegramScraper};
use crate::storage::{FeedStore, Post, UserFeed};
use crate::summarizer::{Summarizer, SummaryInput};
use crate::util::{collapse_whitespace, truncate_chars};

/// Items older than this (plus [`GRACE_PERIOD`]) are not delivered
pub const RECENCY_WINDOW: Duration = Duration::hours(24);
/// Slack for scheduler jitter so items right at the window edge are kept
pub const GRACE_PERIOD: Duration = Duration::minutes(10);

const SUMMARY_WORKERS: usize = 4;
const FALLBACK_SUMMARY_MAX_CHARS: usize = 200;

/// Oldest publish time (exclusive) that still makes it into a digest.
pub fn recency_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - RECENCY_WINDOW - GRACE_PERIOD
}

/// Posts of one feed plus the non-fatal problems hit while producing them.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub posts: Vec<Post>,
    pub warnings: Vec<String>,
}

/// Turns one subscription into deliverable posts.
///
/// RSS/Atom feeds are downloaded and parsed; `t.me` channel URLs go through
/// the preview page scraper and get their posts summarized.
pub struct Parser {
    store: Arc<dyn FeedStore>,
    summarizer: Option<Arc<dyn Summarizer>>,
    cache: Option<SummaryCache>,
    client: reqwest::Client,
    scraper: TelegramScraper,
}

impl Parser {
    pub fn new(
        store: Arc<dyn FeedStore>,
        summarizer: Option<Arc<dyn Summarizer>>,
        client: reqwest::Client,
        scraper: TelegramScraper,
    ) -> Self {
        Self {
            store,
            summarizer,
            cache: Some(SummaryCache::new(DEFAULT_CAPACITY)),
            client,
            scraper,
        }
    }

    /// Resize the summary cache; `0` disables caching.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = (capacity > 0).then(|| SummaryCache::new(capacity));
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn scraper(&self) -> &TelegramScraper {
        &self.scraper
    }

    /// Parse a feed against the current time.
    pub async fn parse(&self, feed: &UserFeed) -> Result<ParsedFeed, FeedError> {
        self.parse_at(feed, Utc::now()).await
    }

    /// Parse a feed, keeping items published after `recency_cutoff(now)`.
    ///
    /// Only a failure to fetch or read the source is an error. Title
    /// persistence problems and bad item timestamps end up in `warnings`.
    pub async fn parse_at(
        &self,
        feed: &UserFeed,
        now: DateTime<Utc>,
    ) -> Result<ParsedFeed, FeedError> {
        match channel_slug(&feed.url) {
            Some(slug) => self.parse_channel(feed, &slug, now).await,
            None => self.parse_rss(feed, now).await,
        }
    }

    async fn parse_rss(&self, feed: &UserFeed, now: DateTime<Utc>) -> Result<ParsedFeed, FeedError> {
        let feed_url = feed.url.trim();
        let source = fetch_source(&self.client, feed_url).await?;

        let mut parsed = ParsedFeed::default();
        let stored_title = self
            .refresh_title(feed, &source.title, &mut parsed.warnings)
            .await;

        let feed_title = [stored_title.as_str(), source.title.as_str(), feed_url]
            .into_iter()
            .find(|t| !t.is_empty())
            .unwrap_or_default()
            .to_string();

        let cutoff = recency_cutoff(now);
        for SourceEntry {
            title,
            link,
            published,
        } in source.entries
        {
            if published.unwrap_or(now) <= cutoff {
                continue;
            }

            if link.is_empty() {
                tracing::warn!(
                    feed_id = feed.id,
                    feed = %feed_url,
                    item_title = %title,
                    "Skipping feed item with empty URL"
                );
                continue;
            }

            parsed.posts.push(Post {
                title,
                url: link,
                feed_id: feed.id,
                feed_title: feed_title.clone(),
                feed_url: feed_url.to_string(),
            });
        }

        Ok(parsed)
    }

    async fn parse_channel(
        &self,
        feed: &UserFeed,
        slug: &str,
        now: DateTime<Utc>,
    ) -> Result<ParsedFeed, FeedError> {
        let page = self.scraper.fetch_channel(slug).await?;
        let canonical_url = telegram_channel_url(slug);

        let mut parsed = ParsedFeed::default();
        parsed.warnings.extend(
            page.item_errors
                .iter()
                .map(|e| format!("feed {} ({}): {}", feed.id, canonical_url, e)),
        );

        let stored_title = self
            .refresh_title(feed, &page.title, &mut parsed.warnings)
            .await;

        let feed_title = [page.title.trim(), stored_title.as_str(), canonical_url.as_str()]
            .into_iter()
            .find(|t| !t.is_empty())
            .unwrap_or_default()
            .to_string();

        let cutoff = recency_cutoff(now);
        let candidates: Vec<ChannelItem> = page
            .items
            .into_iter()
            .filter(|item| item.published_at > cutoff)
            .filter(|item| {
                if item.url.trim().is_empty() {
                    tracing::warn!(
                        feed_id = feed.id,
                        feed = %canonical_url,
                        "Skipping channel post with empty URL"
                    );
                    return false;
                }
                true
            })
            .collect();

        let summaries = self.summarize_many(&candidates).await;

        parsed.posts = candidates
            .into_iter()
            .zip(summaries)
            .map(|(item, summary)| Post {
                title: summary.trim().to_string(),
                url: item.url.trim().to_string(),
                feed_id: feed.id,
                feed_title: feed_title.clone(),
                feed_url: canonical_url.clone(),
            })
            .collect();

        Ok(parsed)
    }

    /// Persist a changed source title, returning the title now on record.
    ///
    /// A failed update keeps the stored title and adds a warning.
    async fn refresh_title(
        &self,
        feed: &UserFeed,
        observed: &str,
        warnings: &mut Vec<String>,
    ) -> String {
        let stored = feed.title.trim();
        let observed = observed.trim();

        if observed.is_empty() || observed == stored {
            return stored.to_string();
        }

        match self.store.update_feed_title(feed.id, observed).await {
            Ok(()) => {
                tracing::debug!(feed_id = feed.id, title = %observed, "Feed title updated");
                observed.to_string()
            }
            Err(e) => {
                tracing::warn!(feed_id = feed.id, error = %e, "Failed to update feed title");
                warnings.push(format!("feed {} ({}): update feed title: {}", feed.id, feed.url.trim(), e));
                stored.to_string()
            }
        }
    }

    /// Summaries for `items`, in input order.
    ///
    /// At most four summaries are produced concurrently; each result lands in
    /// the slot of its item regardless of completion order.
    pub async fn summarize_many(&self, items: &[ChannelItem]) -> Vec<String> {
        let mut slots = vec![String::new(); items.len()];
        if items.is_empty() {
            return slots;
        }

        let mut results = stream::iter(0..items.len())
            .map(|idx| async move { (idx, self.summarize_one(&items[idx]).await) })
            .buffer_unordered(SUMMARY_WORKERS.min(items.len()));

        while let Some((idx, summary)) = results.next().await {
            slots[idx] = summary;
        }

        slots
    }

    /// Summary of a single message. Never fails: any problem degrades to
    /// [`fallback_summary`].
    pub async fn summarize_one(&self, item: &ChannelItem) -> String {
        let text = item.text.trim();
        if text.is_empty() {
            return item.url.clone();
        }

        let now = Utc::now();
        let cache_key = summary_cache_key(&item.url, text);

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(summary) = cache.get(key, now) {
                return summary;
            }
        }

        let Some(summarizer) = &self.summarizer else {
            return fallback_summary(text, &item.url);
        };

        let summary = match summarizer
            .summarize(SummaryInput {
                text: text.to_string(),
                source_url: item.url.clone(),
            })
            .await
        {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    url = %item.url,
                    fallback = true,
                    text_len = text.len(),
                    "Failed to summarize channel post"
                );
                return fallback_summary(text, &item.url);
            }
        };

        if summary.is_empty() {
            return fallback_summary(text, &item.url);
        }

        let expires_at = item.published_at + RECENCY_WINDOW + GRACE_PERIOD;
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            cache.set(key, &summary, expires_at, now);
        }

        summary
    }

    #[cfg(test)]
    fn cached_summaries(&self) -> usize {
        self.cache.as_ref().map_or(0, SummaryCache::len)
    }
}

/// Whitespace-collapsed text cut to 200 characters, or `url` for blank text.
pub fn fallback_summary(text: &str, url: &str) -> String {
    let normalized = collapse_whitespace(text);
    if normalized.is_empty() {
        return url.to_string();
    }
    truncate_chars(&normalized, FALLBACK_SUMMARY_MAX_CHARS).into_owned()
}
