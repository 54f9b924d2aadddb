use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{OutboundMessage, SendResult, Transport, TransportError};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    description: Option<String>,
}

/// JSON-over-HTTPS Telegram Bot API client.
pub struct BotApi {
    client: reqwest::Client,
    token: SecretString,
    api_url: String,
}

impl BotApi {
    pub fn new(client: reqwest::Client, token: SecretString) -> Self {
        Self {
            client,
            token,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Use a local Bot API server or a mock.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn call(&self, message: &OutboundMessage) -> Result<Value, TransportError> {
        let body = serde_json::to_vec(&message.payload())?;
        let url = format!(
            "{}/bot{}/{}",
            self.api_url,
            self.token.expose_secret(),
            message.method()
        );

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .body(body)
            .send()
            .await
            // The token is part of the URL; never let it reach the logs
            .map_err(|e| TransportError::Network(e.without_url()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.without_url()))?;

        let parsed: ApiResponse = match serde_json::from_slice(&bytes) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(TransportError::Api {
                    status: status.as_u16(),
                    description: String::from_utf8_lossy(&bytes).chars().take(200).collect(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if !parsed.ok || !status.is_success() {
            return Err(TransportError::Api {
                status: status.as_u16(),
                description: parsed.description.unwrap_or_default(),
            });
        }

        Ok(parsed.result)
    }
}

#[async_trait]
impl Transport for BotApi {
    async fn send(&self, message: &OutboundMessage) -> Result<SendResult, TransportError> {
        let result = self.call(message).await?;
        let message_id = result.get("message_id").and_then(Value::as_i64);
        Ok(SendResult { message_id, result })
    }

    async fn request(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.call(message).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> BotApi {
        BotApi::new(reqwest::Client::new(), SecretString::from("123:abc".to_string()))
            .with_api_url(server.uri())
    }

    #[tokio::test]
    async fn test_send_message_posts_json_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_json(json!({
                "chat_id": 42,
                "text": "hello",
                "parse_mode": "MarkdownV2",
                "link_preview_options": { "is_disabled": true },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 77, "chat": { "id": 42 } },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = api(&server)
            .send(&OutboundMessage::markdown(42, "hello"))
            .await
            .unwrap();
        assert_eq!(result.message_id, Some(77));
    }

    #[tokio::test]
    async fn test_api_error_carries_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: can't parse entities",
            })))
            .mount(&server)
            .await;

        let err = api(&server)
            .send(&OutboundMessage::markdown(1, "*broken"))
            .await
            .unwrap_err();
        match err {
            TransportError::Api {
                status,
                description,
            } => {
                assert_eq!(status, 400);
                assert!(description.contains("can't parse entities"));
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_answers_callback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/answerCallbackQuery"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": true })),
            )
            .expect(1)
            .mount(&server)
            .await;

        api(&server)
            .request(&OutboundMessage::AnswerCallbackQuery {
                callback_query_id: "cb-1".into(),
                text: Some("done".into()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_json_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let err = api(&server).send(&OutboundMessage::typing(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Api { status: 502, .. }));
    }
}
