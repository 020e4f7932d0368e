//! Google (Gemini) provider adapter.
//!
//! Forwards unified requests to the `generateContent` family of endpoints,
//! which key the model into the URL and the credential into the query
//! string. The `assistant` role is rewritten to `model`, and message content
//! is wrapped in `contents[].parts[].text`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::sse;
use super::types::{StreamEvent, UnifiedRequest, UnifiedResponse};
use super::{body_prefix, Provider};
use crate::error::{Error, Result};

const API_BASE: &str = "https://generativelanguage.googleapis.com";

const SUPPORTED_MODELS: &[&str] = &["gemini-1.5-pro", "gemini-1.5-flash", "gemini-2.0-flash"];

const COST_PER_INPUT_TOKEN: f64 = 0.000_000_125;
const COST_PER_OUTPUT_TOKEN: f64 = 0.000_000_375;

pub struct GoogleProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    models: Vec<String>,
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct GoogleRequest {
    contents: Vec<GoogleContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct GoogleContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct GooglePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: GoogleUsageMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct GoogleCandidate {
    #[serde(default)]
    content: GoogleContent,
}

#[derive(Debug, Default, Deserialize)]
struct GoogleUsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}

impl GoogleProvider {
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

    fn map_request(&self, request: &UnifiedRequest) -> GoogleRequest {
        let contents = request
            .messages
            .iter()
            .map(|m| GoogleContent {
                role: if m.role == "assistant" {
                    "model".to_string()
                } else {
                    "user".to_string()
                },
                parts: vec![GooglePart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GoogleRequest {
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: (request.max_tokens > 0).then_some(request.max_tokens),
                temperature: (request.temperature != 0.0).then_some(request.temperature),
            },
        }
    }

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?key={}&alt=sse",
            self.base_url, model, self.api_key
        )
    }
}

fn first_candidate_text(response: &GoogleResponse) -> Option<&str> {
    response
        .candidates
        .first()
        .and_then(|c| c.content.parts.first())
        .map(|p| p.text.as_str())
}

#[async_trait::async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
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
        let body = self.map_request(request);
        let response = self
            .client
            .post(self.generate_url(&request.model))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("google request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "google api error (status {}): {}",
                status.as_u16(),
                body_prefix(&text)
            )));
        }

        let parsed: GoogleResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("google response decode failed: {e}")))?;

        let content = first_candidate_text(&parsed)
            .ok_or_else(|| Error::Upstream("google api returned no candidates".to_string()))?
            .to_string();

        Ok(UnifiedResponse {
            id: String::new(),
            content,
            input_tokens: parsed.usage_metadata.prompt_token_count,
            output_tokens: parsed.usage_metadata.candidates_token_count,
            model: request.model.clone(),
            provider: self.name().to_string(),
            latency_ms: 0,
        })
    }

    async fn complete_stream(
        &self,
        request: &UnifiedRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let body = self.map_request(request);
        let call = self
            .client
            .post(self.stream_url(&request.model))
            .json(&body);

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let response = match call.send().await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error(Error::Upstream(format!(
                            "google request failed: {e}"
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
                        "google api error (status {}): {}",
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
                        let parsed: GoogleResponse = match serde_json::from_str(payload) {
                            Ok(p) => p,
                            Err(e) => {
                                let _ = tx
                                    .send(StreamEvent::Error(Error::Upstream(format!(
                                        "google stream decode failed: {e}"
                                    ))))
                                    .await;
                                return;
                            }
                        };
                        if let Some(text) = first_candidate_text(&parsed) {
                            if !text.is_empty()
                                && tx.send(StreamEvent::Delta(text.to_string())).await.is_err()
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
                                "google stream read failed: {e}"
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

    #[test]
    fn test_identity() {
        let provider = GoogleProvider::new("key");
        assert_eq!(provider.name(), "google");
        assert!(provider
            .supported_models()
            .iter()
            .any(|m| m == "gemini-1.5-pro"));
    }

    #[test]
    fn test_assistant_role_rewritten_to_model() {
        let provider = GoogleProvider::new("key");
        let request = UnifiedRequest {
            model: "gemini-1.5-pro".to_string(),
            messages: vec![
                Message::new("user", "question"),
                Message::new("assistant", "answer"),
                Message::new("system", "rules"),
            ],
            ..Default::default()
        };
        let mapped = provider.map_request(&request);
        assert_eq!(mapped.contents[0].role, "user");
        assert_eq!(mapped.contents[1].role, "model");
        // Google has no system role; it collapses to user.
        assert_eq!(mapped.contents[2].role, "user");
        assert_eq!(mapped.contents[0].parts[0].text, "question");
    }

    #[test]
    fn test_generation_config_omitted_when_unset() {
        let provider = GoogleProvider::new("key");
        let request = UnifiedRequest {
            model: "gemini-1.5-flash".to_string(),
            messages: vec![Message::new("user", "hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(provider.map_request(&request)).unwrap();
        assert!(json["generationConfig"].get("maxOutputTokens").is_none());
        assert!(json["generationConfig"].get("temperature").is_none());
    }

    #[test]
    fn test_urls_embed_model_and_key() {
        let provider = GoogleProvider::new("secret-key");
        let url = provider.generate_url("gemini-1.5-pro");
        assert!(url.contains("/v1beta/models/gemini-1.5-pro:generateContent"));
        assert!(url.contains("key=secret-key"));

        let url = provider.stream_url("gemini-1.5-pro");
        assert!(url.contains(":streamGenerateContent"));
        assert!(url.contains("alt=sse"));
    }
}
