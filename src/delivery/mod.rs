//! Outbound delivery: Bot API transport, per-chat rate limiting and digest
//! formatting.

mod bot_api;
mod digest;
mod ratelimiter;

pub use bot_api::{BotApi, DEFAULT_API_URL};
pub use digest::{
    escape_markdown_v2, format_posts_as_messages, normalize_post, MAX_MESSAGE_LENGTH,
};
pub use ratelimiter::{RateLimiter, RateLimits};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::feed::BatchError;
use crate::storage::Post;

/// Parse mode of every digest message.
pub const MARKDOWN_V2: &str = "MarkdownV2";

/// A Bot API call addressed to a single chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    SendMessage {
        chat_id: i64,
        text: String,
        parse_mode: Option<String>,
        disable_link_preview: bool,
    },
    EditMessageText {
        chat_id: i64,
        message_id: i64,
        text: String,
        parse_mode: Option<String>,
    },
    DeleteMessage {
        chat_id: i64,
        message_id: i64,
    },
    ChatAction {
        chat_id: i64,
        action: String,
    },
    AnswerCallbackQuery {
        callback_query_id: String,
        text: Option<String>,
    },
}

impl OutboundMessage {
    /// A MarkdownV2 message without link previews, the shape of every digest.
    pub fn markdown(chat_id: i64, text: impl Into<String>) -> Self {
        Self::SendMessage {
            chat_id,
            text: text.into(),
            parse_mode: Some(MARKDOWN_V2.to_string()),
            disable_link_preview: true,
        }
    }

    /// "typing..." indicator.
    pub fn typing(chat_id: i64) -> Self {
        Self::ChatAction {
            chat_id,
            action: "typing".to_string(),
        }
    }

    /// Destination chat; callback answers have none and report 0.
    pub fn chat_id(&self) -> i64 {
        match self {
            Self::SendMessage { chat_id, .. }
            | Self::EditMessageText { chat_id, .. }
            | Self::DeleteMessage { chat_id, .. }
            | Self::ChatAction { chat_id, .. } => *chat_id,
            Self::AnswerCallbackQuery { .. } => 0,
        }
    }

    /// Bot API method name.
    pub fn method(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "sendMessage",
            Self::EditMessageText { .. } => "editMessageText",
            Self::DeleteMessage { .. } => "deleteMessage",
            Self::ChatAction { .. } => "sendChatAction",
            Self::AnswerCallbackQuery { .. } => "answerCallbackQuery",
        }
    }

    /// JSON body of the Bot API call.
    pub fn payload(&self) -> Value {
        match self {
            Self::SendMessage {
                chat_id,
                text,
                parse_mode,
                disable_link_preview,
            } => {
                let mut body = json!({ "chat_id": chat_id, "text": text });
                if let Some(mode) = parse_mode {
                    body["parse_mode"] = json!(mode);
                }
                if *disable_link_preview {
                    body["link_preview_options"] = json!({ "is_disabled": true });
                }
                body
            }
            Self::EditMessageText {
                chat_id,
                message_id,
                text,
                parse_mode,
            } => {
                let mut body = json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": text,
                });
                if let Some(mode) = parse_mode {
                    body["parse_mode"] = json!(mode);
                }
                body
            }
            Self::DeleteMessage {
                chat_id,
                message_id,
            } => json!({ "chat_id": chat_id, "message_id": message_id }),
            Self::ChatAction { chat_id, action } => json!({ "chat_id": chat_id, "action": action }),
            Self::AnswerCallbackQuery {
                callback_query_id,
                text,
            } => {
                let mut body = json!({ "callback_query_id": callback_query_id });
                if let Some(text) = text {
                    body["text"] = json!(text);
                }
                body
            }
        }
    }
}

/// What the Bot API returned for a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    /// Id of the sent or edited message, when the call produced one
    pub message_id: Option<i64>,
    /// Raw `result` field
    pub result: Value,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Bot API returned status {status}: {description}")]
    Api { status: u16, description: String },
    #[error("Invalid Bot API response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The rate limiter shut down before the message went out
    #[error("delivery cancelled: rate limiter is shutting down")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Something that can execute Bot API calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message-producing call.
    async fn send(&self, message: &OutboundMessage) -> Result<SendResult, TransportError>;

    /// Fire a call whose result carries no message, e.g. callback answers.
    async fn request(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.send(message).await.map(|_| ())
    }
}

/// Format `posts` into digest messages and send them to `chat_id` in order.
///
/// Every message is attempted; returns how many went out, or the joined
/// failures.
pub async fn send_digest(
    limiter: &RateLimiter,
    chat_id: i64,
    posts: &[Post],
) -> Result<usize, BatchError> {
    if posts.is_empty() {
        return Ok(0);
    }

    let mut errors = BatchError::default();
    let mut sent = 0;

    for text in format_posts_as_messages(posts) {
        match limiter.send(OutboundMessage::markdown(chat_id, text)).await {
            Ok(_) => sent += 1,
            Err(DeliveryError::Cancelled) => {
                errors.push(format!("send message: {}", DeliveryError::Cancelled));
                break;
            }
            Err(e) => errors.push(format!("send message: {e}")),
        }
    }

    if errors.is_empty() {
        Ok(sent)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chat_id_and_method() {
        let messages = [
            (OutboundMessage::markdown(-100, "hi"), -100, "sendMessage"),
            (
                OutboundMessage::EditMessageText {
                    chat_id: 5,
                    message_id: 9,
                    text: "x".into(),
                    parse_mode: None,
                },
                5,
                "editMessageText",
            ),
            (
                OutboundMessage::DeleteMessage {
                    chat_id: 6,
                    message_id: 1,
                },
                6,
                "deleteMessage",
            ),
            (OutboundMessage::typing(7), 7, "sendChatAction"),
            (
                OutboundMessage::AnswerCallbackQuery {
                    callback_query_id: "cb".into(),
                    text: None,
                },
                0,
                "answerCallbackQuery",
            ),
        ];

        for (message, chat_id, method) in messages {
            assert_eq!(message.chat_id(), chat_id);
            assert_eq!(message.method(), method);
        }
    }

    #[test]
    fn test_markdown_payload() {
        let payload = OutboundMessage::markdown(42, "*bold*").payload();
        assert_eq!(
            payload,
            json!({
                "chat_id": 42,
                "text": "*bold*",
                "parse_mode": "MarkdownV2",
                "link_preview_options": { "is_disabled": true },
            })
        );
    }

    #[test]
    fn test_callback_payload_omits_empty_text() {
        let payload = OutboundMessage::AnswerCallbackQuery {
            callback_query_id: "abc".into(),
            text: None,
        }
        .payload();
        assert_eq!(payload, json!({ "callback_query_id": "abc" }));
    }
}
