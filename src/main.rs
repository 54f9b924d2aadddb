use anyhow::{Context, Result};
use clap::{Parser as CliParser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use feedgram::config::Config;
use feedgram::delivery::{format_posts_as_messages, send_digest, BotApi, OutboundMessage, RateLimiter};
use feedgram::feed::{Fetcher, Parser, TelegramScraper, INTERACTIVE_BATCH_BUDGET};
use feedgram::scheduler::Scheduler;
use feedgram::storage::{Database, DatabaseError, FeedStore, UserSettings};
use feedgram::summarizer::{OpenAiSummarizer, Summarizer};

/// Get the config directory path (~/.config/feedgram/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedgram"))
}

#[derive(CliParser, Debug)]
#[command(
    name = "feedgram",
    about = "Telegram digests of RSS/Atom feeds and public channels"
)]
struct Args {
    /// Config file (default: ~/.config/feedgram/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deliver hourly digests until interrupted
    Run,
    /// Build the last-24-hours digest of one user
    Digest {
        #[arg(long)]
        user: i64,
        /// Send through the bot instead of printing
        #[arg(long)]
        send: bool,
    },
    /// Subscribe a user to every feed found in TEXT (links and @channels)
    Subscribe {
        #[arg(long)]
        user: i64,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Remove one subscription
    Unsubscribe {
        #[arg(long)]
        user: i64,
        feed_id: i64,
    },
    /// List a user's subscriptions
    Feeds {
        #[arg(long)]
        user: i64,
    },
    /// Set the UTC hour of a user's automatic digest
    SetHour {
        #[arg(long)]
        user: i64,
        hour: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => get_config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env().context("Invalid environment")?;

    let db = match Database::open(&config.db_path).await {
        Ok(db) => db,
        Err(DatabaseError::Locked) => {
            eprintln!(
                "Error: database {} is locked by another process. Stop it and try again.",
                config.db_path
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };
    let store: Arc<dyn FeedStore> = Arc::new(db);

    match args.command {
        Command::Run => run(&config, store).await,
        Command::Digest { user, send } => digest(&config, store, user, send).await,
        Command::Subscribe { user, text } => subscribe(&config, store, user, &text.join(" ")).await,
        Command::Unsubscribe { user, feed_id } => unsubscribe(&config, store, user, feed_id).await,
        Command::Feeds { user } => list_feeds(store, user).await,
        Command::SetHour { user, hour } => set_hour(&config, store, user, hour).await,
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("feedgram/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        // Covers the whole request including the body read
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

fn build_fetcher(config: &Config, store: Arc<dyn FeedStore>) -> Result<Arc<Fetcher>> {
    let client = http_client()?;

    let summarizer: Option<Arc<dyn Summarizer>> = match config.openai_api_key() {
        Some(key) => Some(Arc::new(OpenAiSummarizer::new(
            client.clone(),
            key,
            config.openai_model.clone(),
        ))),
        None => {
            tracing::info!("No OpenAI API key, channel posts will be truncated instead of summarized");
            None
        }
    };

    let scraper = TelegramScraper::new().context("Failed to create channel scraper")?;
    let parser = Parser::new(store.clone(), summarizer, client, scraper)
        .with_cache_capacity(config.summary_cache_capacity);

    Ok(Arc::new(Fetcher::new(store, Arc::new(parser))))
}

fn build_limiter(config: &Config) -> Result<Arc<RateLimiter>> {
    let transport = BotApi::new(http_client()?, config.bot_token()?)
        .with_api_url(config.telegram_api_url.as_str());
    Ok(Arc::new(RateLimiter::new(
        Arc::new(transport),
        config.rate_limits(),
    )))
}

fn ensure_allowed(config: &Config, user_id: i64) -> Result<()> {
    if !config.is_allowed(user_id) {
        anyhow::bail!("User {} is not in allowed_users", user_id);
    }
    Ok(())
}

async fn run(config: &Config, store: Arc<dyn FeedStore>) -> Result<()> {
    let fetcher = build_fetcher(config, store)?;
    let limiter = build_limiter(config)?;
    let cancel = CancellationToken::new();

    let scheduler = Scheduler::new(fetcher, limiter.clone(), cancel.clone());
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    cancel.cancel();
    limiter.stop();
    if let Err(e) = scheduler_task.await {
        tracing::error!(error = %e, "Scheduler task failed");
    }
    limiter.stopped().await;

    Ok(())
}

async fn digest(config: &Config, store: Arc<dyn FeedStore>, user_id: i64, send: bool) -> Result<()> {
    ensure_allowed(config, user_id)?;
    let fetcher = build_fetcher(config, store)?;
    let limiter = if send { Some(build_limiter(config)?) } else { None };

    if let Some(limiter) = &limiter {
        if let Err(e) = limiter.request(OutboundMessage::typing(user_id)).await {
            tracing::warn!(user_id = user_id, error = %e, "Failed to send typing action");
        }
    }

    let mut outcome = fetcher
        .fetch_user_feeds(user_id, INTERACTIVE_BATCH_BUDGET)
        .await
        .context("Failed to fetch feeds")?;
    if let Some(err) = &outcome.error {
        tracing::warn!(user_id = user_id, error = %err, "Some feeds failed");
    }

    let posts = outcome.posts.remove(&user_id).unwrap_or_default();

    match limiter {
        Some(limiter) => {
            let result = send_digest(&limiter, user_id, &posts).await;
            limiter.stop();
            let sent = result.context("Failed to deliver digest")?;
            println!("Sent {} message(s) with {} post(s)", sent, posts.len());
        }
        None => {
            let messages = format_posts_as_messages(&posts);
            if messages.is_empty() {
                println!("No new posts in the last 24 hours");
            }
            for message in messages {
                println!("{}", message);
            }
        }
    }

    Ok(())
}

async fn subscribe(config: &Config, store: Arc<dyn FeedStore>, user_id: i64, text: &str) -> Result<()> {
    ensure_allowed(config, user_id)?;
    let fetcher = build_fetcher(config, store.clone())?;

    let outcome = fetcher.find_valid_feeds(text).await;
    if let Some(err) = &outcome.error {
        for failure in err.failures() {
            eprintln!("Skipped: {}", failure);
        }
    }

    if outcome.feeds.is_empty() {
        anyhow::bail!("No valid feeds found");
    }

    for feed in &outcome.feeds {
        store
            .add_feed(user_id, &feed.url, &feed.title)
            .await
            .with_context(|| format!("Failed to add feed {}", feed.url))?;
        println!("Subscribed: {} ({})", feed.title, feed.url);
    }

    Ok(())
}

async fn unsubscribe(
    config: &Config,
    store: Arc<dyn FeedStore>,
    user_id: i64,
    feed_id: i64,
) -> Result<()> {
    ensure_allowed(config, user_id)?;

    let feeds = store.get_user_feeds(user_id).await?;
    let feed = feeds
        .iter()
        .find(|f| f.id == feed_id)
        .ok_or_else(|| anyhow::anyhow!("Feed {} is not a subscription of user {}", feed_id, user_id))?;

    store.remove_feed(feed.id).await?;
    println!("Unsubscribed: {} ({})", feed.title, feed.url);
    Ok(())
}

async fn list_feeds(store: Arc<dyn FeedStore>, user_id: i64) -> Result<()> {
    let settings = store.get_user_settings(user_id).await?;
    let feeds = store.get_user_feeds(user_id).await?;

    println!("Digest hour: {:02}:00 UTC", settings.auto_digest_hour_utc);
    if feeds.is_empty() {
        println!("No subscriptions");
    }
    for feed in feeds {
        println!("{}\t{}\t{}", feed.id, feed.title, feed.url);
    }
    Ok(())
}

async fn set_hour(config: &Config, store: Arc<dyn FeedStore>, user_id: i64, hour: u32) -> Result<()> {
    ensure_allowed(config, user_id)?;
    if hour > 23 {
        anyhow::bail!("Hour must be between 0 and 23, got {}", hour);
    }

    store
        .upsert_user_settings(&UserSettings {
            user_id,
            auto_digest_hour_utc: hour,
        })
        .await?;
    println!("Digest hour set to {:02}:00 UTC", hour);
    Ok(())
}
