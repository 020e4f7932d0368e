//! HTTP request handlers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Extension, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use super::server::AppState;
use super::sse;
use crate::auth::AuthContext;
use crate::error::Error;
use crate::limiter::DEFAULT_ESTIMATE;
use crate::providers::{Provider, UnifiedRequest};
use crate::storage::{spawn_usage_write, NewUsageLog, UsageStore};

/// Decoded request plus the provider chosen for it.
struct Prepared {
    request: UnifiedRequest,
    provider: Arc<dyn Provider>,
}

/// Shared preamble of both completion handlers: decode the body, open the
/// request span, debit the limiter with the token estimate, and route.
async fn prepare(state: &AppState, auth: &AuthContext, body: &[u8]) -> Result<Prepared, Error> {
    let request: UnifiedRequest = serde_json::from_slice(body)
        .map_err(|_| Error::InvalidRequest("invalid request body".to_string()))?;

    let span = tracing::info_span!(
        "proxy.complete",
        tenant_id = %auth.tenant_id,
        request_id = %auth.request_id,
        model = %request.model,
    );

    async {
        let estimated_tokens = if request.max_tokens > 0 {
            request.max_tokens as i64
        } else {
            DEFAULT_ESTIMATE
        };

        if !state.limiter.allow(&auth.tenant_id, estimated_tokens).await {
            return Err(Error::RateLimited);
        }

        let provider = state.router.route(&request)?;
        tracing::info!(provider = %provider.name(), "selected provider");

        Ok(Prepared { request, provider })
    }
    .instrument(span)
    .await
}

/// Handle POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Bytes,
) -> Response {
    let prepared = match prepare(&state, &auth, &body).await {
        Ok(prepared) => prepared,
        Err(e) => return e.into_response(),
    };

    let response = match state
        .router
        .execute(&prepared.provider, &prepared.request)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                provider = %prepared.provider.name(),
                kind = e.kind(),
                error = %e,
                "completion failed"
            );
            return e.into_response();
        }
    };

    // Cost is computed with the rates of the provider chosen at request
    // time, not whatever the registry looks like later.
    let cost_usd = f64::from(response.input_tokens) * prepared.provider.cost_per_input_token()
        + f64::from(response.output_tokens) * prepared.provider.cost_per_output_token();

    spawn_usage_write(
        state.usage.clone(),
        NewUsageLog {
            tenant_id: auth.tenant_id.clone(),
            request_id: auth.request_id.clone(),
            provider: response.provider.clone(),
            model: response.model.clone(),
            input_tokens: i64::from(response.input_tokens),
            output_tokens: i64::from(response.output_tokens),
            cost_usd,
            latency_ms: response.latency_ms,
        },
    );

    let id = if response.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        response.id.clone()
    };

    Json(serde_json::json!({
        "id": id,
        "object": "chat.completion",
        "model": response.model,
        "provider": response.provider,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": response.content},
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": response.input_tokens,
            "completion_tokens": response.output_tokens,
            "total_tokens": u64::from(response.input_tokens) + u64::from(response.output_tokens),
        },
    }))
    .into_response()
}

/// Writes the streaming usage log exactly once, whether the stream finishes
/// or the client disconnects mid-way.
struct UsageOnDrop {
    store: Arc<dyn UsageStore>,
    log: Option<NewUsageLog>,
}

impl Drop for UsageOnDrop {
    fn drop(&mut self) {
        if let Some(log) = self.log.take() {
            spawn_usage_write(self.store.clone(), log);
        }
    }
}

struct StreamProgress {
    rx: tokio::sync::mpsc::Receiver<crate::providers::StreamEvent>,
    _usage: UsageOnDrop,
    finished: bool,
}

/// Handle POST /v1/chat/completions/stream
pub async fn chat_completions_stream(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Bytes,
) -> Response {
    let prepared = match prepare(&state, &auth, &body).await {
        Ok(prepared) => prepared,
        Err(e) => return e.into_response(),
    };

    let rx = match state
        .router
        .execute_stream(&prepared.provider, &prepared.request)
        .await
    {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(
                provider = %prepared.provider.name(),
                kind = e.kind(),
                error = %e,
                "streaming completion failed"
            );
            return e.into_response();
        }
    };

    // Streamed usage is logged with zero token counts; per-chunk accounting
    // is not aggregated from upstream.
    let usage = UsageOnDrop {
        store: state.usage.clone(),
        log: Some(NewUsageLog {
            tenant_id: auth.tenant_id.clone(),
            request_id: auth.request_id.clone(),
            provider: prepared.provider.name().to_string(),
            model: prepared.request.model.clone(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
        }),
    };

    let progress = StreamProgress {
        rx,
        _usage: usage,
        finished: false,
    };

    let frames = futures::stream::unfold(progress, |mut progress| async move {
        if progress.finished {
            return None;
        }
        match progress.rx.recv().await {
            Some(event) => {
                if event.is_terminal() {
                    progress.finished = true;
                }
                let frame = sse::encode_event(&event);
                Some((Ok::<_, Infallible>(Bytes::from(frame)), progress))
            }
            None => None,
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(frames))
        .unwrap()
}

fn parse_time_bound(
    raw: Option<&String>,
    default: DateTime<Utc>,
    field: &str,
) -> Result<DateTime<Utc>, Error> {
    match raw {
        None => Ok(default),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| {
                Error::InvalidRequest(format!("invalid '{field}' date format (use RFC3339)"))
            }),
    }
}

/// Handle GET /v1/usage
pub async fn usage(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let now = Utc::now();

    let from = match parse_time_bound(params.get("from"), now - chrono::Duration::days(30), "from")
    {
        Ok(t) => t,
        Err(e) => return e.into_response(),
    };
    let to = match parse_time_bound(params.get("to"), now, "to") {
        Ok(t) => t,
        Err(e) => return e.into_response(),
    };

    let logs = match state.usage.usage_by_tenant(&auth.tenant_id, from, to).await {
        Ok(logs) => logs,
        Err(e) => return Error::Internal(e.to_string()).into_response(),
    };

    let total_cost = match state
        .usage
        .total_cost_by_tenant(&auth.tenant_id, from, to)
        .await
    {
        Ok(total) => total,
        Err(e) => return Error::Internal(e.to_string()).into_response(),
    };

    Json(serde_json::json!({
        "tenant_id": auth.tenant_id,
        "total_requests": logs.len(),
        "total_cost_usd": total_cost,
        "logs": logs,
        "from": from.to_rfc3339(),
        "to": to.to_rfc3339(),
    }))
    .into_response()
}

/// Handle GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "llm-gateway"
    }))
}

/// Handle POST /v1/jobs - async job submission stub.
pub async fn create_job() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({"error": "async jobs are not yet available"})),
    )
}

/// Handle GET /v1/jobs/:id - async job status stub.
pub async fn job_status() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({"error": "async jobs are not yet available"})),
    )
}
