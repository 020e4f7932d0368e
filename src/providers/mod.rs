//! Provider adapters for upstream chat-completion APIs.
//!
//! Every upstream service is wrapped in an adapter implementing [`Provider`]:
//! a fixed identity (name, per-token costs, supported models) plus unary and
//! streaming completion calls in the gateway's unified format. Adapters own
//! the translation to and from their upstream wire format; everything above
//! them only sees [`UnifiedRequest`], [`UnifiedResponse`] and [`StreamEvent`].

pub mod anthropic;
pub mod google;
pub mod openai;
mod sse;
mod types;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use types::{Message, StreamEvent, UnifiedRequest, UnifiedResponse};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Contract implemented by every upstream adapter.
///
/// Identity methods are pure and constant for the lifetime of the adapter.
/// `complete_stream` returns the receiving half of a capacity-1 channel; the
/// adapter's producer task blocks on each send, so a slow consumer stalls the
/// upstream read loop instead of buffering. Dropping the receiver makes the
/// next send fail, which terminates the producer and aborts the in-flight
/// upstream call.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Cost in USD per single input token.
    fn cost_per_input_token(&self) -> f64;

    /// Cost in USD per single output token.
    fn cost_per_output_token(&self) -> f64;

    fn supported_models(&self) -> &[String];

    /// Unary completion.
    async fn complete(&self, request: &UnifiedRequest) -> Result<UnifiedResponse>;

    /// Streaming completion. The returned channel yields a finite sequence of
    /// `Delta` events followed by exactly one terminal `Done` or `Error`.
    async fn complete_stream(
        &self,
        request: &UnifiedRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>>;
}

/// Truncation cap for upstream error bodies carried in error messages.
const ERROR_BODY_PREFIX: usize = 512;

/// First `ERROR_BODY_PREFIX` bytes of an upstream error body, on a char
/// boundary.
pub(crate) fn body_prefix(body: &str) -> &str {
    if body.len() <= ERROR_BODY_PREFIX {
        return body;
    }
    let mut end = ERROR_BODY_PREFIX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
