use anyhow::{bail, Result};

use super::schema::Database;
use super::types::UserFeed;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe a user to a feed.
    ///
    /// Subscribing twice to the same URL is a no-op (the first title wins until
    /// the next parse refreshes it). An empty title falls back to the URL.
    pub async fn add_feed(&self, user_id: i64, url: &str, title: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            bail!("feed URL is empty");
        }

        let title = match title.trim() {
            "" => url,
            t => t,
        };

        sqlx::query(
            r#"
            INSERT INTO feeds (user_id, url, title) VALUES (?, ?, ?)
            ON CONFLICT(user_id, url) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(url)
        .bind(title)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a freshly observed display name for a feed.
    pub async fn update_feed_title(&self, feed_id: i64, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            bail!("feed title is empty");
        }

        sqlx::query("UPDATE feeds SET title = ? WHERE id = ?")
            .bind(title)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete a subscription by its ID.
    pub async fn remove_feed(&self, feed_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All subscriptions of one user, oldest first.
    pub async fn get_user_feeds(&self, user_id: i64) -> Result<Vec<UserFeed>> {
        let rows: Vec<UserFeed> = sqlx::query_as(
            r#"
            SELECT id, user_id, url, title
            FROM feeds
            WHERE user_id = ?
            ORDER BY id
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(trim_feed).collect())
    }

    /// Subscriptions of every user whose automatic digest is due at `hour_utc`.
    ///
    /// Users without a settings row are treated as hour 0.
    pub async fn get_hour_feeds(&self, hour_utc: u32) -> Result<Vec<UserFeed>> {
        let rows: Vec<UserFeed> = sqlx::query_as(
            r#"
            SELECT f.id, f.user_id, f.url, f.title
            FROM feeds f
            LEFT JOIN user_settings s ON s.user_id = f.user_id
            WHERE COALESCE(s.auto_digest_hour_utc, 0) = ?
            ORDER BY f.user_id, f.id
        "#,
        )
        .bind(i64::from(hour_utc))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(trim_feed).collect())
    }
}

fn trim_feed(feed: UserFeed) -> UserFeed {
    UserFeed {
        url: feed.url.trim().to_string(),
        title: feed.title.trim().to_string(),
        ..feed
    }
}
