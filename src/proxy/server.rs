//! HTTP server setup and lifecycle.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::auth::{self, Authenticator, KeyCache, KeyStore, PostgresKeyStore, RedisKeyCache};
use crate::config::Config;
use crate::limiter::{RateLimiter, RedisLimiterStore, WINDOW};
use crate::providers::{AnthropicProvider, GoogleProvider, OpenAiProvider, Provider};
use crate::router::Router as ProviderRouter;
use crate::seeder;
use crate::storage::{self, PostgresUsageStore, UsageStore};

/// Ceiling on non-streaming handler time; the write-timeout analogue.
const WRITE_TIMEOUT: Duration = Duration::from_secs(90);

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProviderRouter>,
    pub authenticator: Arc<Authenticator>,
    pub limiter: Arc<RateLimiter>,
    pub usage: Arc<dyn UsageStore>,
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    // The streaming route must not sit under the handler timeout; its
    // response legitimately outlives it.
    let unary = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/usage", get(handlers::usage))
        .layer(TimeoutLayer::new(WRITE_TIMEOUT));

    let protected = unary
        .route(
            "/v1/chat/completions/stream",
            post(handlers::chat_completions_stream),
        )
        .layer(middleware::from_fn_with_state(
            state.authenticator.clone(),
            auth::authenticate,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        // Async job surface, answered by stubs until the worker lands.
        .route("/v1/jobs", post(handlers::create_job))
        .route("/v1/jobs/:id", get(handlers::job_status))
        .merge(protected)
        .layer(middleware::from_fn(auth::request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until a shutdown signal arrives, then drain.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let pool = storage::init_pool(&config.postgres_dsn).await?;
    tracing::info!("postgresql connected");

    let redis_client = redis::Client::open(format!("redis://{}", config.redis_addr))?;
    {
        let mut conn = redis_client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    }
    tracing::info!("redis connected");

    let key_store: Arc<dyn KeyStore> = Arc::new(PostgresKeyStore::new(pool.clone()));
    if config.run_seed {
        seeder::seed_test_api_key(key_store.as_ref()).await;
    }

    let cache: Arc<dyn KeyCache> = Arc::new(RedisKeyCache::new(redis_client.clone()));
    let authenticator = Arc::new(Authenticator::new(key_store, cache));

    let limiter_store = Arc::new(RedisLimiterStore::new(
        redis_client,
        config.default_rate_limit_tpm,
        WINDOW,
    ));
    let limiter = Arc::new(RateLimiter::new(limiter_store));

    let usage: Arc<dyn UsageStore> = Arc::new(PostgresUsageStore::new(pool));

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(
            GoogleProvider::new(config.gemini_api_key.expose_secret())
                .with_http_client(http_client.clone()),
        ),
        Arc::new(
            OpenAiProvider::new(config.openai_api_key.expose_secret())
                .with_http_client(http_client.clone()),
        ),
        Arc::new(
            AnthropicProvider::new(config.anthropic_api_key.expose_secret())
                .with_http_client(http_client),
        ),
    ];
    let router = Arc::new(ProviderRouter::new(providers));

    let state = AppState {
        router,
        authenticator,
        limiter,
        usage,
    };
    let app = create_router(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "llm gateway listening");

    let (drain_tx, mut drain_rx) = tokio::sync::mpsc::channel::<()>(1);
    let graceful = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = drain_tx.send(()).await;
        })
        .into_future();
    tokio::pin!(graceful);

    tokio::select! {
        result = &mut graceful => result?,
        _ = drain_rx.recv() => {
            tracing::info!("shutting down, draining in-flight requests");
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut graceful).await {
                Ok(result) => result?,
                Err(_) => tracing::warn!("drain timeout exceeded, forcing shutdown"),
            }
        }
    }

    tracing::info!("server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
