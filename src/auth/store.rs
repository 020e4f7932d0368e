//! Durable API key store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::sha256_hex;

/// An API key record. `key_hash` is the only representation of the secret
/// that is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub tenant_id: String,
    pub key_hash: String,
    /// Per-key tokens-per-minute cap.
    pub rate_limit: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a key; `id` and `created_at` are store-assigned.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub tenant_id: String,
    pub key_hash: String,
    pub rate_limit: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("api key not found")]
    NotFound,

    #[error("key store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for KeyStoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => KeyStoreError::NotFound,
            other => KeyStoreError::Backend(other.to_string()),
        }
    }
}

/// Durable key store contract.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Hash the raw secret and match it against an active key.
    async fn lookup_by_raw_key(&self, raw_key: &str) -> Result<ApiKey, KeyStoreError>;

    async fn create(&self, key: &NewApiKey) -> Result<ApiKey, KeyStoreError>;

    /// Revocation flips `active`; cached copies stay valid until TTL expiry.
    async fn revoke(&self, key_id: Uuid) -> Result<(), KeyStoreError>;
}

pub struct PostgresKeyStore {
    pool: PgPool,
}

impl PostgresKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyStore for PostgresKeyStore {
    async fn lookup_by_raw_key(&self, raw_key: &str) -> Result<ApiKey, KeyStoreError> {
        let key_hash = sha256_hex(raw_key);
        let key = sqlx::query_as::<_, ApiKey>(
            "SELECT id, tenant_id, key_hash, rate_limit, active, created_at \
             FROM api_keys \
             WHERE key_hash = $1 AND active = TRUE",
        )
        .bind(&key_hash)
        .fetch_optional(&self.pool)
        .await?;

        key.ok_or(KeyStoreError::NotFound)
    }

    async fn create(&self, key: &NewApiKey) -> Result<ApiKey, KeyStoreError> {
        let created = sqlx::query_as::<_, ApiKey>(
            "INSERT INTO api_keys (tenant_id, key_hash, rate_limit, active) \
             VALUES ($1, $2, $3, TRUE) \
             RETURNING id, tenant_id, key_hash, rate_limit, active, created_at",
        )
        .bind(&key.tenant_id)
        .bind(&key.key_hash)
        .bind(key.rate_limit)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn revoke(&self, key_id: Uuid) -> Result<(), KeyStoreError> {
        let result = sqlx::query("UPDATE api_keys SET active = FALSE WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(KeyStoreError::NotFound);
        }
        Ok(())
    }
}
