//! OpenAI provider adapter.
//!
//! Forwards unified requests to `POST /v1/chat/completions` with bearer
//! authentication. Streaming responses arrive as `data: {json}` SSE lines
//! with a literal `data: [DONE]` terminator.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::sse;
use super::types::{StreamEvent, UnifiedRequest, UnifiedResponse};
use super::{body_prefix, Provider};
use crate::error::{Error, Result};

const API_BASE: &str = "https://api.openai.com/v1";

const SUPPORTED_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4", "gpt-3.5-turbo"];

const COST_PER_INPUT_TOKEN: f64 = 0.000_000_15;
const COST_PER_OUTPUT_TOKEN: f64 = 0.000_000_60;

pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    models: Vec<String>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: OpenAiUsage,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: OpenAiMessage,
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiProvider {
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

    fn map_request(&self, request: &UnifiedRequest, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: (request.max_tokens > 0).then_some(request.max_tokens),
            temperature: (request.temperature != 0.0).then_some(request.temperature),
            stream,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("openai request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "openai api error (status {}): {}",
                status.as_u16(),
                body_prefix(&text)
            )));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("openai response decode failed: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Upstream("openai api returned no choices".to_string()))?;

        Ok(UnifiedResponse {
            id: parsed.id,
            content: choice.message.content,
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
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
        let call = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body);

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let response = match call.send().await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error(Error::Upstream(format!(
                            "openai request failed: {e}"
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
                        "openai api error (status {}): {}",
                        status.as_u16(),
                        body_prefix(&text)
                    ))))
                    .await;
                return;
            }

            let mut lines = sse::body_lines(response);
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(payload) = sse::data_payload(line.trim()) else {
                            continue;
                        };
                        if payload == "[DONE]" {
                            let _ = tx.send(StreamEvent::Done).await;
                            return;
                        }
                        let parsed: OpenAiResponse = match serde_json::from_str(payload) {
                            Ok(p) => p,
                            Err(e) => {
                                let _ = tx
                                    .send(StreamEvent::Error(Error::Upstream(format!(
                                        "openai stream decode failed: {e}"
                                    ))))
                                    .await;
                                return;
                            }
                        };
                        if let Some(choice) = parsed.choices.first() {
                            let content = &choice.delta.content;
                            if !content.is_empty()
                                && tx.send(StreamEvent::Delta(content.clone())).await.is_err()
                            {
                                // Consumer dropped the stream.
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error(Error::Upstream(format!(
                                "openai stream read failed: {e}"
                            ))))
                            .await;
                        return;
                    }
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

    fn request() -> UnifiedRequest {
        UnifiedRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::new("user", "hello")],
            ..Default::default()
        }
    }

    #[test]
    fn test_identity() {
        let provider = OpenAiProvider::new("sk-test");
        assert_eq!(provider.name(), "openai");
        assert!(provider.cost_per_input_token() > 0.0);
        assert!(provider.cost_per_output_token() > provider.cost_per_input_token());
        assert!(provider.supported_models().iter().any(|m| m == "gpt-4o"));
    }

    #[test]
    fn test_map_request_omits_unset_fields() {
        let provider = OpenAiProvider::new("sk-test");
        let mapped = provider.map_request(&request(), false);
        let json = serde_json::to_value(&mapped).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_map_request_forces_stream_flag() {
        let provider = OpenAiProvider::new("sk-test");
        let mapped = provider.map_request(&request(), true);
        assert!(mapped.stream);
    }

    #[test]
    fn test_map_request_passes_limits() {
        let provider = OpenAiProvider::new("sk-test");
        let mut req = request();
        req.max_tokens = 256;
        req.temperature = 0.7;
        let mapped = provider.map_request(&req, false);
        assert_eq!(mapped.max_tokens, Some(256));
        assert_eq!(mapped.temperature, Some(0.7));
    }
}
