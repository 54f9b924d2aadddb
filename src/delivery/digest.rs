use std::collections::BTreeMap;

use crate::storage::Post;
use crate::util::truncate_chars;

/// Telegram's limit on the text of one message.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

const HEADER: &str = "📰 *New posts*\n\n";
const CONTINUATION_HEADER: &str = "📰 *New posts \\(continue\\)*\n\n";
/// Longer titles are cut before escaping
const MAX_TITLE_CHARS: usize = 1024;

// https://core.telegram.org/bots/api#markdownv2-style
const MARKDOWN_V2_SPECIAL: &[char] = &[
    '.', '_', '[', ']', '(', ')', '{', '}', '#', '|', '!', '+', '-', '=', '*', '~', '>', '`',
];

/// Escape MarkdownV2 control characters.
pub fn escape_markdown_v2(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Trim a post and fill in missing links, or `None` when it has no link at all.
///
/// A post without its own URL points at the feed and vice versa; a missing
/// feed title falls back to the feed URL.
pub fn normalize_post(post: &Post) -> Option<Post> {
    let mut normalized = Post {
        title: post.title.trim().to_string(),
        url: post.url.trim().to_string(),
        feed_id: post.feed_id,
        feed_title: post.feed_title.trim().to_string(),
        feed_url: post.feed_url.trim().to_string(),
    };

    match (normalized.url.is_empty(), normalized.feed_url.is_empty()) {
        (true, true) => {
            tracing::warn!(
                feed_id = post.feed_id,
                title = %normalized.title,
                "Skipping post with empty URLs"
            );
            return None;
        }
        (false, true) => normalized.feed_url = normalized.url.clone(),
        (true, false) => normalized.url = normalized.feed_url.clone(),
        (false, false) => {}
    }

    if normalized.feed_title.is_empty() {
        tracing::warn!(
            feed_id = post.feed_id,
            feed_url = %normalized.feed_url,
            post_url = %normalized.url,
            "Empty feed title"
        );
        normalized.feed_title = normalized.feed_url.clone();
    }

    Some(normalized)
}

fn feed_header(title: &str, url: &str) -> String {
    let title = truncate_chars(title, MAX_TITLE_CHARS);
    format!("📌 *[{}]({})*\n\n", escape_markdown_v2(&title), url)
}

fn bullet(post: &Post) -> String {
    let title = truncate_chars(&post.title, MAX_TITLE_CHARS);
    format!("– [{}]({})\n\n", escape_markdown_v2(&title), post.url)
}

/// Render a digest as MarkdownV2 messages of at most [`MAX_MESSAGE_LENGTH`]
/// bytes each.
///
/// Posts are grouped by feed in feed id order, keeping their order within a
/// feed. A feed whose header and first post do not fit starts a new message;
/// a feed split across messages repeats its header after the continuation
/// header. A post too large for a message of its own is dropped. Returns
/// nothing when no post survives normalization.
pub fn format_posts_as_messages(posts: &[Post]) -> Vec<String> {
    let mut groups: BTreeMap<(i64, String, String), Vec<Post>> = BTreeMap::new();
    for post in posts.iter().filter_map(normalize_post) {
        groups
            .entry((post.feed_id, post.feed_title.clone(), post.feed_url.clone()))
            .or_default()
            .push(post);
    }

    let mut messages = Vec::new();
    let mut current = String::from(HEADER);

    for ((feed_id, feed_title, feed_url), feed_posts) in &groups {
        let header = feed_header(feed_title, feed_url);
        // The header is written together with the first post that fits
        let mut header_written = false;

        for post in feed_posts {
            let line = bullet(post);
            if CONTINUATION_HEADER.len() + header.len() + line.len() > MAX_MESSAGE_LENGTH {
                tracing::warn!(
                    feed_id = feed_id,
                    post_url = %post.url,
                    len = line.len(),
                    "Skipping post too large for a message"
                );
                continue;
            }

            let needed = line.len() + if header_written { 0 } else { header.len() };
            if current.len() + needed > MAX_MESSAGE_LENGTH {
                messages.push(std::mem::replace(&mut current, String::from(CONTINUATION_HEADER)));
                header_written = false;
            }
            if !header_written {
                current.push_str(&header);
                header_written = true;
            }
            current.push_str(&line);
        }
    }

    if current.len() > HEADER.len() {
        messages.push(current);
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn post(feed_id: i64, title: &str, url: &str) -> Post {
        Post {
            title: title.into(),
            url: url.into(),
            feed_id,
            feed_title: format!("Feed {feed_id}"),
            feed_url: format!("https://example.com/{feed_id}.xml"),
        }
    }

    #[test]
    fn test_escape_markdown_v2() {
        assert_eq!(escape_markdown_v2("plain text"), "plain text");
        assert_eq!(
            escape_markdown_v2("v1.2 [beta] (x) #1 a_b!"),
            "v1\\.2 \\[beta\\] \\(x\\) \\#1 a\\_b\\!"
        );
        assert_eq!(escape_markdown_v2("Привет-мир"), "Привет\\-мир");
    }

    #[test]
    fn test_normalize_copies_missing_urls() {
        let mut p = post(1, " Title ", "");
        let normalized = normalize_post(&p).unwrap();
        assert_eq!(normalized.title, "Title");
        assert_eq!(normalized.url, "https://example.com/1.xml");

        p = post(1, "Title", " https://example.com/post ");
        p.feed_url = String::new();
        p.feed_title = "  ".into();
        let normalized = normalize_post(&p).unwrap();
        assert_eq!(normalized.feed_url, "https://example.com/post");
        assert_eq!(normalized.feed_title, "https://example.com/post");
    }

    #[test]
    fn test_normalize_drops_post_without_urls() {
        let mut p = post(1, "Title", " ");
        p.feed_url = String::new();
        assert_eq!(normalize_post(&p), None);
    }

    #[test]
    fn test_single_message_grouped_by_feed_id() {
        let posts = vec![
            post(2, "Second feed post", "https://example.com/b"),
            post(1, "First feed post", "https://example.com/a"),
            post(2, "Another one", "https://example.com/c"),
        ];

        let messages = format_posts_as_messages(&posts);
        assert_eq!(
            messages,
            vec![
                "📰 *New posts*\n\n\
                 📌 *[Feed 1](https://example.com/1.xml)*\n\n\
                 – [First feed post](https://example.com/a)\n\n\
                 📌 *[Feed 2](https://example.com/2.xml)*\n\n\
                 – [Second feed post](https://example.com/b)\n\n\
                 – [Another one](https://example.com/c)\n\n"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_no_posts_no_messages() {
        assert!(format_posts_as_messages(&[]).is_empty());

        let mut invalid = post(1, "x", "");
        invalid.feed_url = String::new();
        assert!(format_posts_as_messages(&[invalid]).is_empty());
    }

    #[test]
    fn test_long_feed_is_split_with_continuation_header() {
        let title = "x".repeat(100);
        let posts: Vec<Post> = (0..100)
            .map(|i| post(1, &title, &format!("https://example.com/post/{i}")))
            .collect();

        let messages = format_posts_as_messages(&posts);
        assert!(messages.len() > 1);

        for message in &messages {
            assert!(message.len() <= MAX_MESSAGE_LENGTH);
        }
        assert!(messages[0].starts_with(HEADER));
        for message in &messages[1..] {
            assert!(message.starts_with(&format!(
                "{CONTINUATION_HEADER}📌 *[Feed 1](https://example.com/1.xml)*\n\n"
            )));
        }

        let bullets: usize = messages.iter().map(|m| m.matches("– [").count()).sum();
        assert_eq!(bullets, 100);
    }

    #[test]
    fn test_feed_moves_to_next_message_when_header_does_not_fit() {
        let long = "y".repeat(1000);
        let mut posts: Vec<Post> = (0..3)
            .map(|i| post(1, &long, &format!("https://example.com/a/{i}")))
            .collect();
        posts.push(post(2, &long, "https://example.com/b/0"));

        let messages = format_posts_as_messages(&posts);
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].contains("Feed 2"));
        assert!(messages[1].starts_with(&format!(
            "{CONTINUATION_HEADER}📌 *[Feed 2](https://example.com/2.xml)*"
        )));
    }

    #[test]
    fn test_oversized_posts_never_exceed_limit() {
        let huge = "z".repeat(5000);
        let posts = vec![
            post(1, "Short", "https://example.com/a/0"),
            post(1, &huge, "https://example.com/a/1"),
            post(2, "Tail", &format!("https://example.com/{}", "p".repeat(5000))),
        ];

        let messages = format_posts_as_messages(&posts);
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert!(message.len() <= MAX_MESSAGE_LENGTH);

        // The long title is cut, the post with an unsendable URL is dropped
        assert!(message.contains("– [Short](https://example.com/a/0)"));
        let cut = format!("– [{}\\.\\.\\.](https://example.com/a/1)", "z".repeat(1024));
        assert!(message.contains(&cut));
        assert!(!message.contains("Feed 2"));
    }
}
