//! Server-sent-event framing for the streaming completion handler.

use crate::providers::StreamEvent;

/// Encode one stream event as an SSE frame.
///
/// Deltas are wrapped in an OpenAI-shaped chunk; the delta content goes
/// through the JSON encoder, so quotes, newlines and control characters are
/// always escaped correctly.
pub(crate) fn encode_event(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Delta(text) => {
            let payload = serde_json::json!({
                "choices": [{"delta": {"content": text}, "index": 0}]
            });
            format!("data: {payload}\n\n")
        }
        StreamEvent::Done => "data: [DONE]\n\n".to_string(),
        StreamEvent::Error(error) => {
            let payload = serde_json::json!({ "error": error.to_string() });
            format!("event: error\ndata: {payload}\n\n")
        }
    }
}
