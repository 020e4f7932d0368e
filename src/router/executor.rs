//! Executor: drives a chosen provider through its circuit breaker.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::providers::{Provider, StreamEvent, UnifiedRequest, UnifiedResponse};

use super::breaker::{BreakerState, CircuitBreaker};
use super::Router;

impl Router {
    fn breaker_for(&self, provider: &dyn Provider) -> Result<&Arc<CircuitBreaker>> {
        self.breaker(provider.name()).ok_or_else(|| {
            Error::Internal(format!(
                "no circuit breaker registered for provider '{}'",
                provider.name()
            ))
        })
    }

    /// Unary completion through the provider's breaker. Stamps the wall-clock
    /// latency on success.
    pub async fn execute(
        &self,
        provider: &Arc<dyn Provider>,
        request: &UnifiedRequest,
    ) -> Result<UnifiedResponse> {
        let breaker = self.breaker_for(provider.as_ref())?;
        let started = Instant::now();
        let mut response = breaker.call(provider.complete(request)).await?;
        response.latency_ms = started.elapsed().as_millis() as i64;
        Ok(response)
    }

    /// Streaming completion through the provider's breaker.
    ///
    /// The provider's event channel is spliced into a wrapped channel: every
    /// event is forwarded in order, error events are additionally reported to
    /// the breaker as failures, and the wrapped channel closes when the
    /// upstream channel closes. The forwarding channel has capacity 1, so a
    /// slow consumer stalls the provider's read loop rather than buffering;
    /// a dropped consumer fails the next send and the task exits, releasing
    /// the upstream stream.
    pub async fn execute_stream(
        &self,
        provider: &Arc<dyn Provider>,
        request: &UnifiedRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let breaker = Arc::clone(self.breaker_for(provider.as_ref())?);
        if breaker.state() == BreakerState::Open {
            return Err(Error::BreakerOpen {
                provider: provider.name().to_string(),
            });
        }

        let mut upstream = match provider.complete_stream(request).await {
            Ok(rx) => rx,
            Err(e) => {
                breaker.record_failure();
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            while let Some(event) = upstream.recv().await {
                if matches!(event, StreamEvent::Error(_)) {
                    breaker.record_failure();
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
