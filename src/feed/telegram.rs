use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Node, Selector};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Host of public channel preview pages and message permalinks
pub const TELEGRAM_HOST: &str = "t.me";

const TELEGRAM_BASE_URL: &str = "https://t.me";
const CLIENT_TIMEOUT: Duration = Duration::from_secs(20);
/// Preview pages are served stripped down to non-browser agents
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

const SLUG_MIN_LEN: usize = 5;
const SLUG_MAX_LEN: usize = 32;

const MESSAGE_DATE_SELECTOR: &str = "a.tgme_widget_message_date";
const MESSAGE_BODY_SELECTOR: &str = ".tgme_widget_message_text, .tgme_widget_message_caption";
const MESSAGE_CONTAINER_CLASS: &str = "tgme_widget_message";
const OG_TITLE_SELECTOR: &str = r#"meta[property="og:title"]"#;
const HEADER_TITLE_SELECTOR: &str = ".tgme_channel_info_header_title";

/// Errors that make a whole channel page unusable.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The slug was blank after trimming
    #[error("channel slug is empty")]
    EmptySlug,
    /// Network-level error (DNS, connection, TLS, client timeout)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Preview page answered with something other than 200
    #[error("unexpected status: {0}")]
    HttpStatus(u16),
    /// A built-in CSS selector failed to compile
    #[error("invalid selector {0:?}")]
    Selector(&'static str),
}

/// One message scraped from a channel preview page, before summarization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelItem {
    /// Canonical permalink of the message
    pub url: String,
    /// Message body with `<br>` turned into newlines, trimmed
    pub text: String,
    /// `<time datetime>` of the message, or the scrape time when missing
    pub published_at: DateTime<Utc>,
}

/// Everything extracted from one preview page.
#[derive(Debug, Clone, Default)]
pub struct ChannelPage {
    pub items: Vec<ChannelItem>,
    /// Channel display name, empty when the page carries none
    pub title: String,
    /// Per-message problems that did not prevent the rest of the page
    pub item_errors: Vec<String>,
}

/// Fetches public channel preview pages (`https://t.me/s/<slug>`).
#[derive(Clone)]
pub struct TelegramScraper {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramScraper {
    /// Create a scraper with its own client (20 s timeout, desktop User-Agent).
    pub fn new() -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: TELEGRAM_BASE_URL.to_string(),
        })
    }

    /// Fetch pages from `base_url` instead of `https://t.me`.
    ///
    /// Only the transport changes: message and channel URLs produced by the
    /// scraper stay canonical `t.me` links.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch and parse a channel's recent messages and title.
    pub async fn fetch_channel(&self, slug: &str) -> Result<ChannelPage, ScrapeError> {
        let html = self.fetch_page(slug).await?;
        parse_channel_page(&html, &telegram_channel_url(slug), Utc::now())
    }

    /// Fetch only the channel title (used when validating new subscriptions).
    pub async fn fetch_channel_title(&self, slug: &str) -> Result<String, ScrapeError> {
        let html = self.fetch_page(slug).await?;
        parse_channel_title(&Html::parse_document(&html))
    }

    async fn fetch_page(&self, slug: &str) -> Result<String, ScrapeError> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(ScrapeError::EmptySlug);
        }

        let page_url = format!("{}/s/{}", self.base_url, slug);
        let response = self.client.get(&page_url).send().await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(ScrapeError::HttpStatus(response.status().as_u16()));
        }

        Ok(response.text().await?)
    }
}

/// Parse a preview page.
///
/// `page_url` is the canonical channel URL used to resolve relative message
/// links; `now` stands in for messages without a usable timestamp.
pub fn parse_channel_page(
    html: &str,
    page_url: &str,
    now: DateTime<Utc>,
) -> Result<ChannelPage, ScrapeError> {
    let doc = Html::parse_document(html);
    let date_sel = selector(MESSAGE_DATE_SELECTOR)?;
    let body_sel = selector(MESSAGE_BODY_SELECTOR)?;
    let time_sel = selector("time")?;
    let base = Url::parse(page_url).ok();

    let mut page = ChannelPage {
        title: parse_channel_title(&doc)?,
        ..ChannelPage::default()
    };

    for anchor in doc.select(&date_sel) {
        let href = match anchor.value().attr("href").map(str::trim) {
            Some(href) if !href.is_empty() => href,
            // Service messages carry a date anchor without a link
            _ => continue,
        };

        let url = match base.as_ref().and_then(|b| b.join(href).ok()) {
            Some(resolved) => telegram_message_canonical_url(resolved.as_str()),
            None => telegram_message_canonical_url(href),
        };

        let text = message_container(anchor)
            .map(|container| message_text(container, &body_sel))
            .unwrap_or_default();

        let datetime = anchor
            .select(&time_sel)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .map(str::trim)
            .unwrap_or("");

        let published_at = if datetime.is_empty() {
            now
        } else {
            match DateTime::parse_from_rfc3339(datetime) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(e) => {
                    page.item_errors
                        .push(format!("message {url}: bad datetime {datetime:?}: {e}"));
                    now
                }
            }
        };

        page.items.push(ChannelItem {
            url,
            text,
            published_at,
        });
    }

    Ok(page)
}

/// `og:title` when present, else the channel header title.
fn parse_channel_title(doc: &Html) -> Result<String, ScrapeError> {
    let og = selector(OG_TITLE_SELECTOR)?;
    if let Some(content) = doc
        .select(&og)
        .next()
        .and_then(|meta| meta.value().attr("content"))
    {
        let content = content.trim();
        if !content.is_empty() {
            return Ok(content.to_string());
        }
    }

    let header = selector(HEADER_TITLE_SELECTOR)?;
    Ok(doc
        .select(&header)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default())
}

fn selector(css: &'static str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|_| ScrapeError::Selector(css))
}

fn message_container(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().classes().any(|c| c == MESSAGE_CONTAINER_CLASS))
}

/// Text of every body/caption block in a message, one block per line.
fn message_text(container: ElementRef<'_>, body_sel: &Selector) -> String {
    let mut out = String::new();

    for block in container.select(body_sel) {
        let mut raw = String::new();
        for node in block.descendants() {
            match node.value() {
                Node::Text(text) => raw.push_str(text),
                Node::Element(el) if el.name() == "br" => raw.push('\n'),
                _ => {}
            }
        }

        let fragment = raw.trim();
        if fragment.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(fragment);
    }

    out.trim().to_string()
}

// ============================================================================
// URL helpers
// ============================================================================

/// Canonical preview page URL of a channel; empty for a blank slug.
///
/// ```
/// use feedgram::feed::telegram_channel_url;
///
/// assert_eq!(telegram_channel_url("  example  "), "https://t.me/s/example");
/// assert_eq!(telegram_channel_url(""), "");
/// ```
pub fn telegram_channel_url(slug: &str) -> String {
    let slug = slug.trim();
    if slug.is_empty() {
        return String::new();
    }
    format!("https://{}/s/{}", TELEGRAM_HOST, slug)
}

/// Strip query and fragment from a message permalink.
///
/// Unparsable input comes back trimmed but otherwise untouched.
pub fn telegram_message_canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Channel slug of a `t.me` URL (`/s/<slug>` or `/<slug>`), if it is one.
pub fn channel_slug(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if url.host_str()? != TELEGRAM_HOST {
        return None;
    }

    let mut parts = url.path().trim_matches('/').split('/');
    let first = parts.next()?;
    let slug = if first == "s" { parts.next()? } else { first };
    let slug = slug.trim();

    is_valid_slug(slug).then(|| slug.to_string())
}

/// 5 to 32 ASCII word characters
pub fn is_valid_slug(slug: &str) -> bool {
    (SLUG_MIN_LEN..=SLUG_MAX_LEN).contains(&slug.len())
        && slug.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
