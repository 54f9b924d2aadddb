use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("Database is locked by another process")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::Locked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A validated feed that is not yet bound to a subscriber.
///
/// Produced by feed discovery; `url` is already canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub url: String,
    pub title: String,
}

/// One subscription row: a feed owned by a user.
///
/// `title` is the last observed display name and may be stale; parsing
/// refreshes it when the source reports a different one.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserFeed {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub title: String,
}

/// A deliverable item produced by parsing one feed.
///
/// `feed_title` and `feed_url` are copied from the owning feed at parse time
/// so digests can be grouped without another store lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Post {
    pub title: String,
    pub url: String,
    pub feed_id: i64,
    pub feed_title: String,
    pub feed_url: String,
}

/// Per-user delivery preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSettings {
    pub user_id: i64,
    /// Hour of the day (UTC, 0-23) at which the automatic digest is sent
    pub auto_digest_hour_utc: u32,
}

impl UserSettings {
    /// Settings for a user that never changed anything.
    pub fn with_defaults(user_id: i64) -> Self {
        Self {
            user_id,
            auto_digest_hour_utc: 0,
        }
    }
}
