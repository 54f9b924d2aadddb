//! Short summaries of channel posts for digest bullets.
//!
//! The pipeline only depends on the [`Summarizer`] trait; running without a
//! summarizer is a valid configuration and makes the parser fall back to
//! truncated post text.

mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::{OpenAiSummarizer, DEFAULT_MODEL};

/// Payload of one summary request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryInput {
    /// Plain message text
    pub text: String,
    /// Message permalink, passed to the model as context when non-empty
    pub source_url: String,
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("input is empty")]
    EmptyInput,
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response is incomplete (reason = {reason}, max_output_tokens = {max_output_tokens})")]
    Incomplete {
        reason: String,
        max_output_tokens: u32,
    },
    #[error("output text is missing (status = {0})")]
    MissingOutput(String),
}

/// Produces a single short summary for a piece of text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, input: SummaryInput) -> Result<String, SummarizeError>;
}
