//! Bearer authentication and request identity.
//!
//! The authenticator resolves `Authorization: Bearer <secret>` to a tenant
//! identity: a cache lookup under `auth:<sha256-hex>` first, then the
//! durable key store. The raw secret never leaves this module -- only its
//! hash is stored, cached or logged.

pub mod store;

pub use store::{ApiKey, KeyStore, KeyStoreError, NewApiKey, PostgresKeyStore};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Error;

/// How long a resolved key stays in the shared cache. Revocation is not
/// propagated; a revoked key remains accepted until this TTL expires.
pub const CACHE_TTL: Duration = Duration::from_secs(300);

/// SHA-256 digest of a raw key, as lowercase hex.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Identity attached to the request after successful authentication.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: String,
    pub api_key_id: String,
    pub request_id: String,
}

/// Correlation id assigned to every request, echoed in `X-Request-ID`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Cache error. The cache is an optimisation: callers log and fall through
/// to the key store.
#[derive(Debug, thiserror::Error)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

/// Shared KV cache fronting the key store.
#[async_trait]
pub trait KeyCache: Send + Sync {
    async fn get(&self, cache_key: &str) -> Result<Option<ApiKey>, CacheError>;
    async fn put(&self, cache_key: &str, key: &ApiKey, ttl: Duration) -> Result<(), CacheError>;
}

/// Redis-backed key cache. Entries are JSON snapshots expiring via TTL only.
pub struct RedisKeyCache {
    client: redis::Client,
}

impl RedisKeyCache {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError(e.to_string()))
    }
}

#[async_trait]
impl KeyCache for RedisKeyCache {
    async fn get(&self, cache_key: &str) -> Result<Option<ApiKey>, CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(cache_key)
            .await
            .map_err(|e| CacheError(e.to_string()))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError(e.to_string())),
            None => Ok(None),
        }
    }

    async fn put(&self, cache_key: &str, key: &ApiKey, ttl: Duration) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(key).map_err(|e| CacheError(e.to_string()))?;
        conn.set_ex::<_, _, ()>(cache_key, json, ttl.as_secs())
            .await
            .map_err(|e| CacheError(e.to_string()))
    }
}

/// Resolves bearer credentials through the cache and key store.
pub struct Authenticator {
    store: Arc<dyn KeyStore>,
    cache: Arc<dyn KeyCache>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn KeyStore>, cache: Arc<dyn KeyCache>) -> Self {
        Self { store, cache }
    }

    /// Resolve a raw bearer secret to its active [`ApiKey`].
    ///
    /// Cache failures degrade to a store lookup; store failures are
    /// internal errors (the store is the source of truth).
    pub async fn resolve(&self, raw_key: &str) -> Result<ApiKey, Error> {
        let cache_key = format!("auth:{}", sha256_hex(raw_key));

        match self.cache.get(&cache_key).await {
            Ok(Some(key)) => return Ok(key),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "auth cache unavailable, falling back to key store");
            }
        }

        let key = self
            .store
            .lookup_by_raw_key(raw_key)
            .await
            .map_err(|e| match e {
                KeyStoreError::NotFound => Error::Unauthorized,
                KeyStoreError::Backend(message) => Error::Internal(message),
            })?;

        if let Err(e) = self.cache.put(&cache_key, &key, CACHE_TTL).await {
            tracing::warn!(error = %e, "failed to cache resolved api key");
        }

        Ok(key)
    }
}

/// Middleware assigning a correlation id to every request and echoing it in
/// the `X-Request-ID` response header. An inbound id is honoured, otherwise
/// a fresh UUID is generated.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Middleware guarding the `/v1` surface: parses the bearer header, resolves
/// it via the [`Authenticator`] and attaches an [`AuthContext`] extension.
pub async fn authenticate(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let raw_key = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(raw_key) = raw_key else {
        return Error::Unauthorized.into_response();
    };

    match authenticator.resolve(raw_key).await {
        Ok(key) => {
            request.extensions_mut().insert(AuthContext {
                tenant_id: key.tenant_id.clone(),
                api_key_id: key.id.to_string(),
                request_id,
            });
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
