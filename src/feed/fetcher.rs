use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use super::parser::Parser;
use crate::storage::{FeedStore, Post, UserFeed};

/// Budget of the hourly scheduled batch
pub const SCHEDULED_BATCH_BUDGET: Duration = Duration::from_secs(15 * 60);
/// Budget of an on-demand digest
pub const INTERACTIVE_BATCH_BUDGET: Duration = Duration::from_secs(60);

const CONCURRENCY_PER_CPU: usize = 10;

/// Every failure and warning of one batch, one per line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchError {
    failures: Vec<String>,
}

impl BatchError {
    pub fn push(&mut self, failure: impl Into<String>) {
        self.failures.push(failure.into());
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// `None` when nothing went wrong.
    fn into_option(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.failures.join("\n"))
    }
}

impl std::error::Error for BatchError {}

/// Posts of a batch grouped by subscriber.
///
/// `error` can be set even when `posts` is not empty; callers deliver what
/// they got and log the rest.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Only users with at least one post appear here
    pub posts: HashMap<i64, Vec<Post>>,
    pub error: Option<BatchError>,
}

/// Fans a set of subscriptions out to the [`Parser`] under a concurrency cap.
pub struct Fetcher {
    store: Arc<dyn FeedStore>,
    parser: Arc<Parser>,
    max_in_flight: usize,
}

impl Fetcher {
    /// Fetcher allowing `10 × CPUs` feeds in flight.
    pub fn new(store: Arc<dyn FeedStore>, parser: Arc<Parser>) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            store,
            parser,
            max_in_flight: cpus * CONCURRENCY_PER_CPU,
        }
    }

    /// Override the in-flight cap (at least one feed).
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Fetch every subscription of one user.
    pub async fn fetch_user_feeds(&self, user_id: i64, budget: Duration) -> Result<FetchOutcome> {
        let feeds = self
            .store
            .get_user_feeds(user_id)
            .await
            .context("get user feeds")?;
        Ok(self.fetch_many(feeds, budget).await)
    }

    /// Fetch the subscriptions of every user whose digest hour is `hour_utc`.
    pub async fn fetch_hour_feeds(&self, hour_utc: u32, budget: Duration) -> Result<FetchOutcome> {
        let feeds = self
            .store
            .get_hour_feeds(hour_utc)
            .await
            .context("get hour feeds")?;
        Ok(self.fetch_many(feeds, budget).await)
    }

    /// Parse `feeds` concurrently and group the posts by owner.
    ///
    /// A failing feed never affects its siblings. When `budget` runs out the
    /// outstanding fetches are dropped and a timeout entry is added to the
    /// batch error; everything finished so far is still returned.
    pub async fn fetch_many(&self, feeds: Vec<UserFeed>, budget: Duration) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let mut errors = BatchError::default();

        let total = feeds.len();
        if total == 0 {
            return outcome;
        }

        let parser = &self.parser;
        let mut results = stream::iter(feeds)
            .map(|feed| async move {
                let result = parser.parse(&feed).await;
                (feed, result)
            })
            .buffer_unordered(max_concurrency(self.max_in_flight, total));

        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);

        let mut finished = 0usize;
        loop {
            tokio::select! {
                next = results.next() => {
                    let Some((feed, result)) = next else { break };
                    finished += 1;

                    match result {
                        Ok(parsed) => {
                            for warning in parsed.warnings {
                                errors.push(warning);
                            }
                            if !parsed.posts.is_empty() {
                                outcome
                                    .posts
                                    .entry(feed.user_id)
                                    .or_default()
                                    .extend(parsed.posts);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                feed_id = feed.id,
                                user_id = feed.user_id,
                                feed = %feed.url,
                                error = %e,
                                "Failed to parse feed"
                            );
                            errors.push(format!("feed {} ({}): {}", feed.id, feed.url.trim(), e));
                        }
                    }
                }
                _ = &mut deadline => {
                    let unfinished = total - finished;
                    tracing::warn!(
                        unfinished = unfinished,
                        total = total,
                        budget_secs = budget.as_secs(),
                        "Feed batch timed out"
                    );
                    errors.push(format!(
                        "batch timed out after {:?}: {} of {} feeds unfinished",
                        budget, unfinished, total
                    ));
                    break;
                }
            }
        }

        tracing::debug!(
            feeds = total,
            users = outcome.posts.len(),
            failures = errors.len(),
            "Feed batch finished"
        );

        outcome.error = errors.into_option();
        outcome
    }
}

/// The cap, never more than there are feeds.
fn max_concurrency(max_in_flight: usize, feed_count: usize) -> usize {
    max_in_flight.min(feed_count).max(1)
}
