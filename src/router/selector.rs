//! Provider selection logic.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::{Provider, UnifiedRequest};

use super::breaker::{BreakerState, CircuitBreaker};

/// Routes requests across the registered providers, one circuit breaker per
/// provider. The provider list and the breaker set are fixed at startup.
pub struct Router {
    providers: Vec<Arc<dyn Provider>>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl Router {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        let breakers = providers
            .iter()
            .map(|p| {
                (
                    p.name().to_string(),
                    Arc::new(CircuitBreaker::new(p.name())),
                )
            })
            .collect();
        Self {
            providers,
            breakers,
        }
    }

    /// Pick one provider for the request.
    ///
    /// Candidates are the providers whose breaker is not open, filtered by
    /// model support when the request pins a model. Model-pinned traffic
    /// routes to the first candidate in registration order (deterministic);
    /// unpinned traffic routes to the lowest input-token cost, ties broken
    /// by registration order.
    pub fn route(&self, request: &UnifiedRequest) -> Result<Arc<dyn Provider>> {
        let mut candidates: Vec<&Arc<dyn Provider>> = Vec::new();
        for provider in &self.providers {
            let open = self
                .breaker(provider.name())
                .is_some_and(|b| b.state() == BreakerState::Open);
            if open {
                continue;
            }
            if request.model.is_empty()
                || provider
                    .supported_models()
                    .iter()
                    .any(|m| m == &request.model)
            {
                candidates.push(provider);
            }
        }

        if candidates.is_empty() {
            return Err(Error::NoProvider);
        }

        if !request.model.is_empty() {
            return Ok(Arc::clone(candidates[0]));
        }

        // min_by keeps the first of equal elements, so ties preserve
        // registration order.
        candidates
            .into_iter()
            .min_by(|a, b| a.cost_per_input_token().total_cmp(&b.cost_per_input_token()))
            .map(Arc::clone)
            .ok_or(Error::NoProvider)
    }

    /// All registered providers, in registration order.
    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub(crate) fn breaker(&self, name: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(name)
    }
}
