//! Anthropic provider adapter.
//!
//! Forwards unified requests to `POST /v1/messages` with `x-api-key`
//! authentication. System messages are lifted out of the message list into
//! the top-level `system` field, and the Messages API requires an explicit
//! `max_tokens`, so unspecified values default to 4096. Streaming responses
//! use typed SSE events: `content_block_delta` carries text, `message_stop`
//! terminates, `error` terminates with an error.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::sse;
use super::types::{StreamEvent, UnifiedRequest, UnifiedResponse};
use super::{body_prefix, Provider};
use crate::error::{Error, Result};

const API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

const SUPPORTED_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

const COST_PER_INPUT_TOKEN: f64 = 0.000_000_8;
const COST_PER_OUTPUT_TOKEN: f64 = 0.000_004;

pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    models: Vec<String>,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    content: Vec<AnthropicContent>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicStreamEvent {
    #[serde(default)]
    delta: AnthropicDelta,
    #[serde(default)]
    error: Option<AnthropicError>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicDelta {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    #[serde(default)]
    message: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            client: reqwest::Client::new(),
            models: SUPPORTED_MODELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Override the API base URL (used by contract tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Split out system messages and collapse any non-assistant role to
    /// "user"; the Messages API only accepts those two. The last system
    /// message wins.
    fn map_request(&self, request: &UnifiedRequest, stream: bool) -> AnthropicRequest {
        let mut system = None;
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            if message.role == "system" {
                system = Some(message.content.clone());
                continue;
            }
            let role = if message.role == "assistant" {
                "assistant"
            } else {
                "user"
            };
            messages.push(AnthropicMessage {
                role: role.to_string(),
                content: message.content.clone(),
            });
        }

        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: if request.max_tokens > 0 {
                request.max_tokens
            } else {
                DEFAULT_MAX_TOKENS
            },
            system,
            messages,
            stream,
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    fn request_builder(&self, body: &AnthropicRequest) -> reqwest::RequestBuilder {
        self.client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn cost_per_input_token(&self) -> f64 {
        COST_PER_INPUT_TOKEN
    }

    fn cost_per_output_token(&self) -> f64 {
        COST_PER_OUTPUT_TOKEN
    }

    fn supported_models(&self) -> &[String] {
        &self.models
    }

    async fn complete(&self, request: &UnifiedRequest) -> Result<UnifiedResponse> {
        let body = self.map_request(request, false);
        let response = self
            .request_builder(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("anthropic request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "anthropic api error (status {}): {}",
                status.as_u16(),
                body_prefix(&text)
            )));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("anthropic response decode failed: {e}")))?;

        let content = parsed
            .content
            .into_iter()
            .next()
            .ok_or_else(|| Error::Upstream("anthropic api returned no content".to_string()))?;

        Ok(UnifiedResponse {
            id: parsed.id,
            content: content.text,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            model: parsed.model,
            provider: self.name().to_string(),
            latency_ms: 0,
        })
    }

    async fn complete_stream(
        &self,
        request: &UnifiedRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let body = self.map_request(request, true);
        let call = self.request_builder(&body);

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let response = match call.send().await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error(Error::Upstream(format!(
                            "anthropic request failed: {e}"
                        ))))
                        .await;
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let _ = tx
                    .send(StreamEvent::Error(Error::Upstream(format!(
                        "anthropic api error (status {}): {}",
                        status.as_u16(),
                        body_prefix(&text)
                    ))))
                    .await;
                return;
            }

            let mut lines = sse::body_lines(response);
            let mut current_event = String::new();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error(Error::Upstream(format!(
                                "anthropic stream read failed: {e}"
                            ))))
                            .await;
                        return;
                    }
                };

                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(name) = sse::event_name(line) {
                    current_event = name.to_string();
                    continue;
                }
                let Some(payload) = sse::data_payload(line) else {
                    continue;
                };

                match current_event.as_str() {
                    "content_block_delta" => {
                        let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(payload)
                        else {
                            continue;
                        };
                        if event.delta.kind == "text_delta"
                            && !event.delta.text.is_empty()
                            && tx.send(StreamEvent::Delta(event.delta.text)).await.is_err()
                        {
                            // Consumer dropped the stream.
                            return;
                        }
                    }
                    "message_stop" => {
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }
                    "error" => {
                        if let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(payload) {
                            if let Some(error) = event.error {
                                let _ = tx
                                    .send(StreamEvent::Error(Error::Upstream(format!(
                                        "anthropic stream error: {}",
                                        error.message
                                    ))))
                                    .await;
                                return;
                            }
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Message;

    fn request(messages: Vec<Message>) -> UnifiedRequest {
        UnifiedRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn test_identity() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert!(provider
            .supported_models()
            .iter()
            .any(|m| m == "claude-3-5-sonnet-20241022"));
    }

    #[test]
    fn test_system_message_extracted() {
        let provider = AnthropicProvider::new("sk-ant-test");
        let mapped = provider.map_request(
            &request(vec![
                Message::new("system", "be terse"),
                Message::new("user", "hello"),
            ]),
            false,
        );
        assert_eq!(mapped.system.as_deref(), Some("be terse"));
        assert_eq!(mapped.messages.len(), 1);
        assert_eq!(mapped.messages[0].role, "user");
    }

    #[test]
    fn test_last_system_message_wins() {
        let provider = AnthropicProvider::new("sk-ant-test");
        let mapped = provider.map_request(
            &request(vec![
                Message::new("system", "first"),
                Message::new("system", "second"),
                Message::new("user", "hello"),
            ]),
            false,
        );
        assert_eq!(mapped.system.as_deref(), Some("second"));
    }

    #[test]
    fn test_unknown_role_collapses_to_user() {
        let provider = AnthropicProvider::new("sk-ant-test");
        let mapped = provider.map_request(
            &request(vec![
                Message::new("tool", "result"),
                Message::new("assistant", "reply"),
            ]),
            false,
        );
        assert_eq!(mapped.messages[0].role, "user");
        assert_eq!(mapped.messages[1].role, "assistant");
    }

    #[test]
    fn test_max_tokens_defaulted() {
        let provider = AnthropicProvider::new("sk-ant-test");
        let mapped = provider.map_request(&request(vec![Message::new("user", "hi")]), false);
        assert_eq!(mapped.max_tokens, DEFAULT_MAX_TOKENS);

        let mut req = request(vec![Message::new("user", "hi")]);
        req.max_tokens = 100;
        let mapped = provider.map_request(&req, false);
        assert_eq!(mapped.max_tokens, 100);
    }

    #[test]
    fn test_no_system_field_when_absent() {
        let provider = AnthropicProvider::new("sk-ant-test");
        let mapped = provider.map_request(&request(vec![Message::new("user", "hi")]), false);
        let json = serde_json::to_value(&mapped).unwrap();
        assert!(json.get("system").is_none());
    }
}
