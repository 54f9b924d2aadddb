use chrono::{DateTime, Utc};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::sync::{Mutex, MutexGuard};

use super::telegram::telegram_message_canonical_url;

/// Default number of summaries kept in memory
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    summary: String,
    expires_at: DateTime<Utc>,
}

/// Fixed-capacity LRU of message summaries with absolute expiry.
///
/// Expired entries are never returned. When a new key is inserted every
/// expired entry is swept first; if the cache is still over capacity the
/// least recently used entries are dropped, expired or not.
///
/// The inner `LruCache` is unbounded so that expired entries are always
/// removed before a live one is evicted for space.
pub struct SummaryCache {
    entries: Mutex<LruCache<String, Entry>>,
    capacity: usize,
}

impl SummaryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            capacity,
        }
    }

    /// Look up a summary, evicting it if it expired before `now`.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<String> {
        if key.is_empty() {
            return None;
        }

        let mut entries = self.lock();
        let expired = now > entries.peek(key)?.expires_at;
        if expired {
            entries.pop(key);
            return None;
        }

        entries.get(key).map(|entry| entry.summary.clone())
    }

    /// Store a summary until `expires_at`.
    ///
    /// Ignored for empty keys or summaries and for entries that would already
    /// be expired.
    pub fn set(&self, key: &str, summary: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        if key.is_empty() || summary.is_empty() || expires_at <= now {
            return;
        }

        let mut entries = self.lock();

        if let Some(entry) = entries.get_mut(key) {
            entry.summary = summary.to_string();
            entry.expires_at = expires_at;
            return;
        }

        entries.push(
            key.to_string(),
            Entry {
                summary: summary.to_string(),
                expires_at,
            },
        );

        let expired: Vec<String> = entries
            .iter()
            .rev()
            .filter(|(_, entry)| now > entry.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            entries.pop(k);
        }

        while entries.len() > self.capacity {
            if entries.pop_lru().is_none() {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        // Entries stay consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cache key of a message: canonical URL plus a digest of its text.
///
/// Editing a message changes the key. Returns `None` when either part is
/// empty, in which case the summary is not cached.
pub fn summary_cache_key(message_url: &str, text: &str) -> Option<String> {
    let url = telegram_message_canonical_url(message_url);
    let text = text.trim();
    if url.is_empty() || text.is_empty() {
        return None;
    }

    Some(format!("{}|{:x}", url, Sha256::digest(text.as_bytes())))
}
