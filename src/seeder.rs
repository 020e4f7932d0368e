//! Development seeding of a well-known API key, gated on `RUN_SEED=true`.

use crate::auth::{sha256_hex, KeyStore, NewApiKey};

pub const TEST_API_KEY: &str = "test-api-key-12345";
pub const TEST_TENANT_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Insert the test key. The unique `key_hash` constraint makes this
/// idempotent across restarts; a conflict is logged and ignored.
pub async fn seed_test_api_key(store: &dyn KeyStore) {
    let key = NewApiKey {
        tenant_id: TEST_TENANT_ID.to_string(),
        key_hash: sha256_hex(TEST_API_KEY),
        rate_limit: 1_000_000,
    };

    match store.create(&key).await {
        Ok(created) => {
            tracing::info!(tenant_id = %created.tenant_id, "seeded test api key");
        }
        Err(e) => {
            tracing::warn!(error = %e, "test api key not seeded (may already exist)");
        }
    }
}
