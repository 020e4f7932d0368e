//! Usage accounting: one log row per terminated request, best-effort.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("usage store error: {0}")]
pub struct UsageStoreError(pub String);

impl From<sqlx::Error> for UsageStoreError {
    fn from(e: sqlx::Error) -> Self {
        UsageStoreError(e.to_string())
    }
}

/// A persisted usage log row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UsageLog {
    pub id: Uuid,
    pub tenant_id: String,
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields for appending a log; `id` and `created_at` are store-assigned.
///
/// Owned values only, to satisfy the `'static` bound of the fire-and-forget
/// write task.
#[derive(Debug, Clone)]
pub struct NewUsageLog {
    pub tenant_id: String,
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
}

/// Durable usage log store contract.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn log_usage(&self, log: &NewUsageLog) -> Result<(), UsageStoreError>;

    async fn usage_by_tenant(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageLog>, UsageStoreError>;

    async fn total_cost_by_tenant(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<f64, UsageStoreError>;
}

pub struct PostgresUsageStore {
    pool: PgPool,
}

impl PostgresUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PostgresUsageStore {
    async fn log_usage(&self, log: &NewUsageLog) -> Result<(), UsageStoreError> {
        sqlx::query(
            "INSERT INTO usage_logs \
             (tenant_id, request_id, provider, model, input_tokens, output_tokens, cost_usd, latency_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&log.tenant_id)
        .bind(&log.request_id)
        .bind(&log.provider)
        .bind(&log.model)
        .bind(log.input_tokens)
        .bind(log.output_tokens)
        .bind(log.cost_usd)
        .bind(log.latency_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn usage_by_tenant(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageLog>, UsageStoreError> {
        let logs = sqlx::query_as::<_, UsageLog>(
            "SELECT id, tenant_id, request_id, provider, model, input_tokens, output_tokens, \
             cost_usd, latency_ms, created_at \
             FROM usage_logs \
             WHERE tenant_id = $1 AND created_at BETWEEN $2 AND $3 \
             ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn total_cost_by_tenant(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<f64, UsageStoreError> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost_usd), 0) \
             FROM usage_logs \
             WHERE tenant_id = $1 AND created_at BETWEEN $2 AND $3",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

/// Spawn a fire-and-forget usage write.
///
/// Accounting never blocks the client-visible response; failures are logged
/// and dropped (at-most-once semantics).
pub fn spawn_usage_write(store: Arc<dyn UsageStore>, log: NewUsageLog) {
    tokio::spawn(async move {
        if let Err(e) = store.log_usage(&log).await {
            tracing::warn!(
                request_id = %log.request_id,
                tenant_id = %log.tenant_id,
                error = %e,
                "failed to write usage log"
            );
        }
    });
}
