use std::borrow::Cow;

/// Ellipsis appended to cut text
const ELLIPSIS: &str = "...";

/// Collapses every run of whitespace (including newlines) into one space and
/// trims both ends.
///
/// Returns `Cow::Borrowed` when the input is already collapsed.
///
/// # Examples
///
/// ```
/// use feedgram::util::collapse_whitespace;
///
/// assert_eq!(collapse_whitespace("  a\n\n b\tc "), "a b c");
/// assert_eq!(collapse_whitespace("already clean"), "already clean");
/// ```
pub fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    let trimmed = s.trim();
    let mut prev_space = false;
    let needs_rewrite = trimmed.chars().any(|c| {
        let bad = c.is_whitespace() && (c != ' ' || prev_space);
        prev_space = c.is_whitespace();
        bad
    });

    if !needs_rewrite {
        return Cow::Borrowed(trimmed);
    }

    Cow::Owned(trimmed.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Cuts `s` to at most `max_chars` characters (not bytes) and appends "...".
///
/// The cut text is trimmed before the ellipsis is added. If the cut leaves
/// nothing but whitespace, the input is returned unchanged.
///
/// # Examples
///
/// ```
/// use feedgram::util::truncate_chars;
///
/// assert_eq!(truncate_chars("short", 10), "short");
/// assert_eq!(truncate_chars("Hello World", 6), "Hello...");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    let cut = match s.char_indices().nth(max_chars) {
        Some((idx, _)) => idx,
        None => return Cow::Borrowed(s),
    };

    let head = s[..cut].trim();
    if head.is_empty() {
        return Cow::Borrowed(s);
    }

    Cow::Owned(format!("{}{}", head, ELLIPSIS))
}
