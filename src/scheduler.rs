//! Hourly digest trigger.
//!
//! At the top of every UTC hour the scheduler fetches the feeds of every
//! user whose digest hour matches and queues the resulting digests on the
//! [`RateLimiter`].

use chrono::{DateTime, Duration as TimeDelta, Timelike, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::delivery::{send_digest, RateLimiter};
use crate::feed::{Fetcher, SCHEDULED_BATCH_BUDGET};
use crate::storage::Post;

/// Start of the UTC hour following `now`.
pub fn next_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    let into_hour = TimeDelta::seconds(now.timestamp().rem_euclid(3600))
        + TimeDelta::nanoseconds(i64::from(now.timestamp_subsec_nanos()));
    now - into_hour + TimeDelta::hours(1)
}

/// How long to sleep from `now` until the next top of the hour.
pub fn next_hour_delay(now: DateTime<Utc>) -> Duration {
    (next_hour(now) - now).to_std().unwrap_or(Duration::ZERO)
}

/// What one hourly run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HourReport {
    pub users: usize,
    pub messages: usize,
    pub failed_users: usize,
}

pub struct Scheduler {
    fetcher: Arc<Fetcher>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(fetcher: Arc<Fetcher>, limiter: Arc<RateLimiter>, cancel: CancellationToken) -> Self {
        Self {
            fetcher,
            limiter,
            cancel,
        }
    }

    /// Run until the cancellation token fires.
    pub async fn run(&self) {
        tracing::info!("Scheduler started");

        loop {
            let now = Utc::now();
            let tick = next_hour(now);
            let delay = next_hour_delay(now);
            tracing::debug!(next_run = %tick, delay_secs = delay.as_secs(), "Waiting for next hour");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => break,
            }

            tokio::select! {
                _ = self.run_hour(tick.hour()) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Fetch and deliver the digests of users scheduled for `hour_utc`.
    ///
    /// Partial fetch results are still delivered; failures are logged.
    pub async fn run_hour(&self, hour_utc: u32) -> HourReport {
        let mut report = HourReport::default();

        let outcome = match self
            .fetcher
            .fetch_hour_feeds(hour_utc, SCHEDULED_BATCH_BUDGET)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(hour_utc = hour_utc, error = %e, "Failed to fetch hour feeds");
                return report;
            }
        };

        if let Some(err) = &outcome.error {
            tracing::error!(
                hour_utc = hour_utc,
                users_with_posts = outcome.posts.len(),
                error = %err,
                "Failed to fetch some hour feeds"
            );
        }

        for (user_id, posts) in &outcome.posts {
            report.users += 1;
            match send_digest(&self.limiter, *user_id, posts).await {
                Ok(sent) => report.messages += sent,
                Err(e) => {
                    report.failed_users += 1;
                    tracing::error!(
                        hour_utc = hour_utc,
                        user_id = user_id,
                        post_count = posts.len(),
                        feed_ids = ?feed_ids(posts),
                        error = %e,
                        "Failed to send user posts"
                    );
                }
            }
        }

        tracing::info!(
            hour_utc = hour_utc,
            users = report.users,
            messages = report.messages,
            failed_users = report.failed_users,
            "Hourly digest finished"
        );
        report
    }
}

fn feed_ids(posts: &[Post]) -> BTreeSet<i64> {
    posts.iter().map(|p| p.feed_id).collect()
}
