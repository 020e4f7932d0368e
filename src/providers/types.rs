//! Unified request/response types shared by all provider adapters.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Chat completion request in the gateway's unified format.
///
/// Absent fields decode to their zero values: an empty `model` means "any
/// provider may serve this", `max_tokens == 0` and `temperature == 0.0` mean
/// "unspecified".
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UnifiedRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub stream: bool,
}

/// A chat message. Roles are "system", "user" or "assistant".
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Unary completion result, produced exactly once per successful call.
#[derive(Debug, Clone, Default)]
pub struct UnifiedResponse {
    pub id: String,
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model: String,
    pub provider: String,
    /// Wall-clock latency, stamped by the executor.
    pub latency_ms: i64,
}

/// One event of a streaming completion.
///
/// A well-formed stream is a (possibly empty) sequence of `Delta`s followed
/// by exactly one terminal event (`Done` or `Error`), after which the
/// channel closes.
#[derive(Debug)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Error(Error),
}

impl StreamEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }
}
