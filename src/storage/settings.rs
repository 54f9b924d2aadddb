use anyhow::{bail, Result};

use super::schema::Database;
use super::types::UserSettings;

impl Database {
    // ========================================================================
    // User Settings Operations
    // ========================================================================

    /// Load a user's settings, falling back to defaults when no row exists.
    pub async fn get_user_settings(&self, user_id: i64) -> Result<UserSettings> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT user_id, auto_digest_hour_utc FROM user_settings WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((user_id, hour)) => UserSettings {
                user_id,
                auto_digest_hour_utc: u32::try_from(hour).unwrap_or(0),
            },
            None => UserSettings::with_defaults(user_id),
        })
    }

    /// Insert or replace a user's settings.
    pub async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<()> {
        if settings.auto_digest_hour_utc > 23 {
            bail!(
                "digest hour must be between 0 and 23, got {}",
                settings.auto_digest_hour_utc
            );
        }

        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, auto_digest_hour_utc) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET auto_digest_hour_utc = excluded.auto_digest_hour_utc
        "#,
        )
        .bind(settings.user_id)
        .bind(i64::from(settings.auto_digest_hour_utc))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
