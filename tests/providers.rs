//! Upstream contract tests for the provider adapters, against a mock
//! server: wire formats, auth headers, error classification and SSE
//! stream translation.

use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llmgw::providers::{
    AnthropicProvider, GoogleProvider, Message, OpenAiProvider, Provider, StreamEvent,
    UnifiedRequest,
};

fn request(model: &str, messages: Vec<Message>) -> UnifiedRequest {
    UnifiedRequest {
        model: model.to_string(),
        messages,
        ..Default::default()
    }
}

async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn deltas(events: &[StreamEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Delta(s) => Some(s.as_str()),
            _ => None,
        })
        .collect()
}

// ── OpenAI ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_openai_complete_contract() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{"message": {"role": "assistant", "content": "Hello there"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("sk-test").with_base_url(server.uri());
    let response = provider
        .complete(&request("gpt-4o", vec![Message::new("user", "hi")]))
        .await
        .unwrap();

    assert_eq!(response.id, "chatcmpl-1");
    assert_eq!(response.content, "Hello there");
    assert_eq!(response.input_tokens, 5);
    assert_eq!(response.output_tokens, 7);
    assert_eq!(response.provider, "openai");
}

#[tokio::test]
async fn test_openai_non_2xx_classified_with_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited upstream"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("sk-test").with_base_url(server.uri());
    let err = provider
        .complete(&request("gpt-4o", vec![Message::new("user", "hi")]))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("status 429"), "got: {message}");
    assert!(message.contains("rate limited upstream"), "got: {message}");
}

#[tokio::test]
async fn test_openai_empty_choices_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [],
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("sk-test").with_base_url(server.uri());
    let err = provider
        .complete(&request("gpt-4o", vec![Message::new("user", "hi")]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no choices"));
}

#[tokio::test]
async fn test_openai_stream_contract() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("sk-test").with_base_url(server.uri());
    let rx = provider
        .complete_stream(&request("gpt-4o", vec![Message::new("user", "hi")]))
        .await
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(deltas(&events), vec!["Hello", " world"]);
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_openai_stream_error_status_becomes_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("sk-test").with_base_url(server.uri());
    let rx = provider
        .complete_stream(&request("gpt-4o", vec![Message::new("user", "hi")]))
        .await
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Error(e) => {
            assert!(e.to_string().contains("status 500"));
            assert!(e.to_string().contains("upstream down"));
        }
        other => panic!("expected error event, got {other:?}"),
    }
}

// ── Anthropic ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_anthropic_complete_contract_extracts_system() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-ant"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({
            "system": "be nice",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 4096,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "msg_1",
            "model": "claude-3-5-sonnet-20241022",
            "content": [{"type": "text", "text": "Hi!"}],
            "usage": {"input_tokens": 3, "output_tokens": 2},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("sk-ant").with_base_url(server.uri());
    let response = provider
        .complete(&request(
            "claude-3-5-sonnet-20241022",
            vec![
                Message::new("system", "be nice"),
                Message::new("user", "hi"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.content, "Hi!");
    assert_eq!(response.input_tokens, 3);
    assert_eq!(response.output_tokens, 2);
    assert_eq!(response.provider, "anthropic");
}

#[tokio::test]
async fn test_anthropic_stream_contract() {
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("sk-ant").with_base_url(server.uri());
    let rx = provider
        .complete_stream(&request(
            "claude-3-5-sonnet-20241022",
            vec![Message::new("user", "hi")],
        ))
        .await
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(deltas(&events), vec!["Hel", "lo"]);
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn test_anthropic_stream_error_event_terminates() {
    let body = concat!(
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"par\"}}\n\n",
        "event: error\n",
        "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"overloaded\"}}\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("sk-ant").with_base_url(server.uri());
    let rx = provider
        .complete_stream(&request(
            "claude-3-5-sonnet-20241022",
            vec![Message::new("user", "hi")],
        ))
        .await
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(deltas(&events), vec!["par"]);
    match events.last() {
        Some(StreamEvent::Error(e)) => assert!(e.to_string().contains("overloaded")),
        other => panic!("expected error terminal, got {other:?}"),
    }
}

// ── Google ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_google_complete_contract() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
        .and(query_param("key", "g-key"))
        .and(body_partial_json(serde_json::json!({
            "contents": [
                {"role": "user", "parts": [{"text": "question"}]},
                {"role": "model", "parts": [{"text": "answer"}]},
            ],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello from Gemini"}]},
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GoogleProvider::new("g-key").with_base_url(server.uri());
    let response = provider
        .complete(&request(
            "gemini-1.5-pro",
            vec![
                Message::new("user", "question"),
                Message::new("assistant", "answer"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.content, "Hello from Gemini");
    assert_eq!(response.input_tokens, 4);
    assert_eq!(response.output_tokens, 6);
    // Google does not echo the model; the adapter echoes the request's.
    assert_eq!(response.model, "gemini-1.5-pro");
    assert_eq!(response.provider, "google");
}

#[tokio::test]
async fn test_google_stream_contract() {
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = GoogleProvider::new("g-key").with_base_url(server.uri());
    let rx = provider
        .complete_stream(&request(
            "gemini-1.5-pro",
            vec![Message::new("user", "hi")],
        ))
        .await
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(deltas(&events), vec!["Hel", "lo"]);
    // The Gemini SSE stream has no explicit terminator; end-of-body is done.
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn test_google_non_2xx_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(403).set_body_string("key invalid"))
        .mount(&server)
        .await;

    let provider = GoogleProvider::new("bad-key").with_base_url(server.uri());
    let err = provider
        .complete(&request("gemini-1.5-pro", vec![Message::new("user", "hi")]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("status 403"));
}
