use anyhow::Result;
use async_trait::async_trait;

use super::schema::Database;
use super::types::{UserFeed, UserSettings};

/// Persistence consumed by the ingestion pipeline.
///
/// [`Database`] is the production implementation; tests can substitute their
/// own to simulate failures (e.g. a title update that cannot be persisted).
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn get_user_feeds(&self, user_id: i64) -> Result<Vec<UserFeed>>;
    async fn get_hour_feeds(&self, hour_utc: u32) -> Result<Vec<UserFeed>>;
    async fn update_feed_title(&self, feed_id: i64, title: &str) -> Result<()>;
    async fn add_feed(&self, user_id: i64, url: &str, title: &str) -> Result<()>;
    async fn remove_feed(&self, feed_id: i64) -> Result<()>;
    async fn get_user_settings(&self, user_id: i64) -> Result<UserSettings>;
    async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<()>;
}

#[async_trait]
impl FeedStore for Database {
    async fn get_user_feeds(&self, user_id: i64) -> Result<Vec<UserFeed>> {
        Database::get_user_feeds(self, user_id).await
    }

    async fn get_hour_feeds(&self, hour_utc: u32) -> Result<Vec<UserFeed>> {
        Database::get_hour_feeds(self, hour_utc).await
    }

    async fn update_feed_title(&self, feed_id: i64, title: &str) -> Result<()> {
        Database::update_feed_title(self, feed_id, title).await
    }

    async fn add_feed(&self, user_id: i64, url: &str, title: &str) -> Result<()> {
        Database::add_feed(self, user_id, url, title).await
    }

    async fn remove_feed(&self, feed_id: i64) -> Result<()> {
        Database::remove_feed(self, feed_id).await
    }

    async fn get_user_settings(&self, user_id: i64) -> Result<UserSettings> {
        Database::get_user_settings(self, user_id).await
    }

    async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<()> {
        Database::upsert_user_settings(self, settings).await
    }
}
