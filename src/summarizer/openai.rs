use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{SummarizeError, Summarizer, SummaryInput};

pub const DEFAULT_MODEL: &str = "gpt-5-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Flex tier requests can queue for minutes
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const BASE_MAX_OUTPUT_TOKENS: u32 = 512;
const LIMIT_MAX_OUTPUT_TOKENS: u32 = 2048;

const SYSTEM_PROMPT: &str = "Summarize the Telegram post in one ultra-short sentence.

Rules:
- ≤25 words (hard limit 40).
- Include only core idea and critical context (dates, numbers, names, calls to action).
- No lists, no examples; compress into one general statement.
- Neutral tone.
- Remove fillers, emojis, hashtags, links unless essential.
- Output exactly one line in the same language as the input.";

#[derive(Debug, Serialize)]
struct ResponseRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    max_output_tokens: u32,
    service_tier: &'a str,
    reasoning: Reasoning<'a>,
}

#[derive(Debug, Serialize)]
struct Reasoning<'a> {
    effort: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponseBody {
    /// Concatenated `output_text` parts of every message item.
    fn output_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|c| c.kind == "output_text")
            .map(|c| c.text.as_str())
            .collect()
    }
}

/// Summarizer backed by the OpenAI Responses API.
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl OpenAiSummarizer {
    pub fn new(client: reqwest::Client, api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at another Responses-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn create_response(
        &self,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<ResponseBody, SummarizeError> {
        let body = serde_json::to_vec(&ResponseRequest {
            model: &self.model,
            instructions: SYSTEM_PROMPT,
            input: prompt,
            max_output_tokens,
            service_tier: "flex",
            reasoning: Reasoning { effort: "low" },
        })?;

        let request = self
            .client
            .post(format!("{}/responses", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .body(body);

        let (status, bytes) = tokio::time::timeout(REQUEST_TIMEOUT, async {
            let response = request.send().await?;
            let status = response.status();
            Ok::<_, reqwest::Error>((status, response.bytes().await?))
        })
        .await
        .map_err(|_| SummarizeError::Timeout)??;

        if !status.is_success() {
            return Err(SummarizeError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).chars().take(200).collect(),
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Prompt body: optional source line followed by the content.
fn build_prompt(input: &SummaryInput, text: &str) -> String {
    let mut prompt = String::new();
    let source = input.source_url.trim();
    if !source.is_empty() {
        prompt.push_str("Source:\n");
        prompt.push_str(source);
        prompt.push('\n');
    }
    prompt.push_str("Content:\n");
    prompt.push_str(text);
    prompt
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, input: SummaryInput) -> Result<String, SummarizeError> {
        let text = input.text.trim();
        if text.is_empty() {
            return Err(SummarizeError::EmptyInput);
        }

        let prompt = build_prompt(&input, text);
        let mut max_output_tokens = BASE_MAX_OUTPUT_TOKENS;

        loop {
            let response = self.create_response(&prompt, max_output_tokens).await?;

            if response.status == "incomplete" {
                let reason = response
                    .incomplete_details
                    .map(|d| d.reason)
                    .unwrap_or_default();

                if reason == "max_output_tokens" && max_output_tokens < LIMIT_MAX_OUTPUT_TOKENS {
                    max_output_tokens = (max_output_tokens * 2).min(LIMIT_MAX_OUTPUT_TOKENS);
                    tracing::debug!(
                        max_output_tokens = max_output_tokens,
                        "Summary truncated by token budget, retrying with a larger one"
                    );
                    continue;
                }

                return Err(SummarizeError::Incomplete {
                    reason,
                    max_output_tokens,
                });
            }

            let summary = response.output_text().trim().to_string();
            if summary.is_empty() {
                return Err(SummarizeError::MissingOutput(response.status));
            }
            return Ok(summary);
        }
    }
}
