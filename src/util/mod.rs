//! Utility functions shared by the pipeline.
//!
//! - **URL validation**: screening of user-supplied subscription links
//! - **Text processing**: whitespace collapsing and character-safe truncation
//!
//! # Examples
//!
//! ```
//! use feedgram::util::{collapse_whitespace, truncate_chars, validate_feed_url};
//!
//! let url = validate_feed_url("https://example.com/feed.xml").unwrap();
//! let text = collapse_whitespace("Breaking:\n\nsomething  happened");
//! let short = truncate_chars(&text, 8);
//! ```

mod text;
mod url_validator;

pub use text::{collapse_whitespace, truncate_chars};
pub use url_validator::{validate_feed_url, UrlValidationError};
