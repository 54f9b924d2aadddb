//! Feed ingestion: turning subscriptions into deliverable posts.
//!
//! - [`telegram`] - public channel preview page scraping and URL canonicalization
//! - [`source`] - RSS/Atom download with retries and parsing via `feed-rs`
//! - [`summary_cache`] - LRU + TTL cache of channel post summaries
//! - [`parser`] - per-feed parsing, recency filtering and summarization
//! - [`fetcher`] - bounded concurrent fan-out over many feeds
//! - [`discovery`] - finding subscribable feeds in chat messages
//!
//! # Example
//!
//! ```ignore
//! let parser = Arc::new(Parser::new(store.clone(), summarizer, client, TelegramScraper::new()?));
//! let fetcher = Fetcher::new(store, parser);
//!
//! let outcome = fetcher.fetch_hour_feeds(9, SCHEDULED_BATCH_BUDGET).await?;
//! if let Some(err) = &outcome.error {
//!     tracing::warn!(error = %err, "Some feeds failed");
//! }
//! ```

mod discovery;
mod fetcher;
mod parser;
mod source;
mod summary_cache;
mod telegram;

pub use discovery::{
    extract_candidates, find_valid_feeds, Candidates, DiscoveryError, DiscoveryOutcome,
};
pub use fetcher::{
    BatchError, FetchOutcome, Fetcher, INTERACTIVE_BATCH_BUDGET, SCHEDULED_BATCH_BUDGET,
};
pub use parser::{fallback_summary, recency_cutoff, ParsedFeed, Parser, GRACE_PERIOD, RECENCY_WINDOW};
pub use source::{parse_source, FeedError, SourceEntry, SourceFeed};
pub use summary_cache::{
    summary_cache_key, SummaryCache, DEFAULT_CAPACITY as DEFAULT_SUMMARY_CACHE_CAPACITY,
};
pub use telegram::{
    channel_slug, parse_channel_page, telegram_channel_url, telegram_message_canonical_url,
    ChannelItem, ChannelPage, ScrapeError, TelegramScraper, TELEGRAM_HOST,
};

impl Fetcher {
    /// Feeds mentioned in `text`, validated with this fetcher's clients.
    pub async fn find_valid_feeds(&self, text: &str) -> DiscoveryOutcome {
        let parser = self.parser();
        find_valid_feeds(parser.client(), parser.scraper(), text).await
    }
}
