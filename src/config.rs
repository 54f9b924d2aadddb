//! Configuration file parser for ~/.config/feedgram/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Environment variables override file values (see [`Config::apply_env`]).
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::delivery::{RateLimits, DEFAULT_API_URL};
use crate::feed::DEFAULT_SUMMARY_CACHE_CAPACITY;
use crate::summarizer::DEFAULT_MODEL;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for {key}: {message}")]
    Env { key: &'static str, message: String },

    #[error("Bot token is not set (TELEGRAM_TOKEN or bot_token)")]
    MissingToken,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The custom Debug impl masks both secrets.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telegram Bot API token.
    pub bot_token: Option<String>,

    /// OpenAI API key. Without it channel posts get truncated text instead
    /// of summaries.
    pub openai_api_key: Option<String>,

    pub openai_model: String,

    /// SQLite database file.
    pub db_path: String,

    /// Users allowed to manage subscriptions. Empty = everyone.
    pub allowed_users: Vec<i64>,

    pub private_chat_interval_ms: u64,
    pub group_chat_interval_ms: u64,

    /// Summary cache entries (0 disables the cache).
    pub summary_cache_capacity: usize,

    /// Bot API base URL.
    pub telegram_api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        let limits = RateLimits::default();
        Self {
            bot_token: None,
            openai_api_key: None,
            openai_model: DEFAULT_MODEL.to_string(),
            db_path: "db.sqlite".to_string(),
            allowed_users: Vec::new(),
            private_chat_interval_ms: limits.private_chat.as_millis() as u64,
            group_chat_interval_ms: limits.group_chat.as_millis() as u64,
            summary_cache_capacity: DEFAULT_SUMMARY_CACHE_CAPACITY,
            telegram_api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("openai_model", &self.openai_model)
            .field("db_path", &self.db_path)
            .field("allowed_users", &self.allowed_users)
            .field("private_chat_interval_ms", &self.private_chat_interval_ms)
            .field("group_chat_interval_ms", &self.group_chat_interval_ms)
            .field("summary_cache_capacity", &self.summary_cache_capacity)
            .field("telegram_api_url", &self.telegram_api_url)
            .finish()
    }
}

const KNOWN_KEYS: &[&str] = &[
    "bot_token",
    "openai_api_key",
    "openai_model",
    "db_path",
    "allowed_users",
    "private_chat_interval_ms",
    "group_chat_interval_ms",
    "summary_cache_capacity",
    "telegram_api_url",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), db_path = %config.db_path, "Loaded configuration");
        Ok(config)
    }

    /// Override file values from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override file values from `lookup`. Blank values are ignored.
    ///
    /// Keys: `TELEGRAM_TOKEN`, `OPENAI_API_KEY`, `OPENAI_MODEL`, `DB_PATH`,
    /// `ALLOWED_USERS` (comma separated ids).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = get("TELEGRAM_TOKEN") {
            self.bot_token = Some(token);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.openai_model = model;
        }
        if let Some(path) = get("DB_PATH") {
            self.db_path = path;
        }
        if let Some(users) = get("ALLOWED_USERS") {
            self.allowed_users = parse_user_ids(&users)?;
        }
        Ok(())
    }

    /// Bot token wrapped for handing to the transport.
    pub fn bot_token(&self) -> Result<SecretString, ConfigError> {
        self.bot_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.to_string()))
            .ok_or(ConfigError::MissingToken)
    }

    pub fn openai_api_key(&self) -> Option<SecretString> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| SecretString::from(k.to_string()))
    }

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            private_chat: Duration::from_millis(self.private_chat_interval_ms),
            group_chat: Duration::from_millis(self.group_chat_interval_ms),
        }
    }

    /// Whether `user_id` may manage subscriptions.
    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }
}

fn parse_user_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<i64>().map_err(|e| ConfigError::Env {
                key: "ALLOWED_USERS",
                message: format!("{id:?}: {e}"),
            })
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("feedgram_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.bot_token.is_none());
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.openai_model, "gpt-5-mini");
        assert_eq!(config.db_path, "db.sqlite");
        assert_eq!(config.private_chat_interval_ms, 1000);
        assert_eq!(config.group_chat_interval_ms, 3000);
        assert_eq!(config.summary_cache_capacity, 1024);
        assert_eq!(config.rate_limits(), RateLimits::default());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedgram_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.db_path, "db.sqlite");
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.openai_model, "gpt-5-mini");
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let path = write_config(
            "full",
            r#"
bot_token = "123:abc"
openai_api_key = "sk-test"
openai_model = "gpt-5-nano"
db_path = "/var/lib/feedgram/db.sqlite"
allowed_users = [1, 2, 3]
private_chat_interval_ms = 1500
group_chat_interval_ms = 4000
summary_cache_capacity = 0
telegram_api_url = "http://localhost:8081"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.openai_model, "gpt-5-nano");
        assert_eq!(config.allowed_users, vec![1, 2, 3]);
        assert_eq!(config.summary_cache_capacity, 0);
        assert_eq!(config.telegram_api_url, "http://localhost:8081");
        assert_eq!(
            config.rate_limits(),
            RateLimits {
                private_chat: Duration::from_millis(1500),
                group_chat: Duration::from_secs(4),
            }
        );
        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "db_path = \"x.db\"\ntheme = \"dark\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.db_path, "x.db");
        cleanup(&path);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let path = write_config("wrongtype", "allowed_users = \"everyone\"\n");
        assert!(Config::load(&path).is_err());
        cleanup(&path);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        cleanup(&path);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TELEGRAM_TOKEN", "env-token"),
            ("OPENAI_MODEL", "  "),
            ("DB_PATH", "/data/feedgram.db"),
            ("ALLOWED_USERS", "10, 20,,30"),
        ]);

        let mut config = Config {
            bot_token: Some("file-token".into()),
            ..Config::default()
        };
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bot_token.as_deref(), Some("env-token"));
        assert_eq!(config.openai_model, "gpt-5-mini");
        assert_eq!(config.db_path, "/data/feedgram.db");
        assert_eq!(config.allowed_users, vec![10, 20, 30]);
        assert!(config.is_allowed(20));
        assert!(!config.is_allowed(40));
    }

    #[test]
    fn test_bad_allowed_users_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(|key| (key == "ALLOWED_USERS").then(|| "1,two".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "ALLOWED_USERS", .. }));
    }

    #[test]
    fn test_secrets() {
        let mut config = Config::default();
        assert!(matches!(config.bot_token(), Err(ConfigError::MissingToken)));
        assert!(config.openai_api_key().is_none());
        assert!(config.is_allowed(12345));

        config.bot_token = Some(" 123:abc ".into());
        config.openai_api_key = Some("super-secret-key-12345".into());
        assert_eq!(config.bot_token().unwrap().expose_secret(), "123:abc");

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(!debug_output.contains("123:abc"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
