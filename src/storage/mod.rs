//! PostgreSQL persistence for API keys and usage logs.

pub mod usage;

pub use usage::{
    spawn_usage_write, NewUsageLog, PostgresUsageStore, UsageLog, UsageStore, UsageStoreError,
};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Initialize the connection pool and run embedded migrations.
pub async fn init_pool(dsn: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(dsn)
        .await?;

    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}
