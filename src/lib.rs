//! Telegram digests of RSS/Atom feeds and public Telegram channels.
//!
//! - [`feed`] - fetching, parsing and summarizing subscriptions
//! - [`delivery`] - Bot API transport, per-chat rate limiting, digest formatting
//! - [`scheduler`] - hourly digest trigger
//! - [`storage`] - SQLite subscriptions and user settings
//! - [`summarizer`] - post summaries via OpenAI
//! - [`config`] - TOML + environment configuration

pub mod config;
pub mod delivery;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod summarizer;
pub mod util;
