//! Per-tenant token budget admission.
//!
//! A thin facade over a distributed fixed-window counter keyed by
//! `ratelimit:tenant:<tenant_id>`. Each admitted request debits an up-front
//! estimate of its token cost; over-consumption against the estimate is
//! accepted drift and never refunded. Store errors deny (fail-closed).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Window over which the token budget applies.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Estimate debited when a request does not specify `max_tokens`.
pub const DEFAULT_ESTIMATE: i64 = 1000;

#[derive(Debug, thiserror::Error)]
#[error("rate limit store error: {0}")]
pub struct LimiterError(pub String);

/// Distributed counter backend.
#[async_trait]
pub trait LimiterStore: Send + Sync {
    /// Debit `tokens` from the window under `key`; true when the window
    /// stayed within budget.
    async fn allow_n(&self, key: &str, tokens: i64) -> Result<bool, LimiterError>;
}

/// Facade used by the handlers.
pub struct RateLimiter {
    store: Arc<dyn LimiterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn LimiterStore>) -> Self {
        Self { store }
    }

    /// Debit `tokens` from the tenant's window. Fail-closed: a store error
    /// denies the request.
    pub async fn allow(&self, tenant_id: &str, tokens: i64) -> bool {
        let key = format!("ratelimit:tenant:{tenant_id}");
        match self.store.allow_n(&key, tokens).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    tenant_id,
                    "rate limit store error, denying request"
                );
                false
            }
        }
    }
}

/// Redis fixed-window counter: INCRBY per request, TTL set when the window
/// is first touched.
pub struct RedisLimiterStore {
    client: redis::Client,
    limit: i64,
    window: Duration,
}

impl RedisLimiterStore {
    pub fn new(client: redis::Client, limit: i64, window: Duration) -> Self {
        Self {
            client,
            limit,
            window,
        }
    }
}

#[async_trait]
impl LimiterStore for RedisLimiterStore {
    async fn allow_n(&self, key: &str, tokens: i64) -> Result<bool, LimiterError> {
        use redis::AsyncCommands;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LimiterError(e.to_string()))?;

        let consumed: i64 = conn
            .incr(key, tokens)
            .await
            .map_err(|e| LimiterError(e.to_string()))?;

        // First debit of a fresh window carries the expiry.
        if consumed == tokens {
            let _: i64 = conn
                .expire(key, self.window.as_secs() as i64)
                .await
                .map_err(|e| LimiterError(e.to_string()))?;
        }

        Ok(consumed <= self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct MemoryStore {
        limit: i64,
        consumed: AtomicI64,
        fail: bool,
    }

    #[async_trait]
    impl LimiterStore for MemoryStore {
        async fn allow_n(&self, _key: &str, tokens: i64) -> Result<bool, LimiterError> {
            if self.fail {
                return Err(LimiterError("connection refused".to_string()));
            }
            let consumed = self.consumed.fetch_add(tokens, Ordering::SeqCst) + tokens;
            Ok(consumed <= self.limit)
        }
    }

    #[tokio::test]
    async fn test_allows_within_budget() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore {
            limit: 2000,
            consumed: AtomicI64::new(0),
            fail: false,
        }));
        assert!(limiter.allow("tenant-a", 1000).await);
        assert!(limiter.allow("tenant-a", 1000).await);
        assert!(!limiter.allow("tenant-a", 1000).await);
    }

    #[tokio::test]
    async fn test_store_error_fails_closed() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore {
            limit: 2000,
            consumed: AtomicI64::new(0),
            fail: true,
        }));
        assert!(!limiter.allow("tenant-a", 1).await);
    }
}
