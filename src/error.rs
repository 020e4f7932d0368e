//! Error types for the gateway.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
///
/// Each variant corresponds to one externally visible failure kind; the
/// `IntoResponse` impl maps it to the HTTP status and JSON error body the
/// client sees. Nothing is retried inside the gateway -- circuit breaking is
/// the only resilience mechanism.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("all providers unavailable")]
    NoProvider,

    #[error("circuit breaker is open for provider: {provider}")]
    BreakerOpen { provider: String },

    #[error("{0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable lowercase kind tag, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthorized => "unauthorized",
            Error::InvalidRequest(_) => "invalid_request",
            Error::RateLimited => "rate_limited",
            Error::NoProvider => "no_provider",
            Error::BreakerOpen { .. } => "breaker_open",
            Error::Upstream(_) => "upstream_error",
            Error::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::NoProvider => StatusCode::SERVICE_UNAVAILABLE,
            Error::BreakerOpen { .. } => StatusCode::BAD_GATEWAY,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let rate_limited = matches!(self, Error::RateLimited);

        let mut body = serde_json::json!({ "error": self.to_string() });
        if rate_limited {
            body["retry_after"] = serde_json::Value::String("60s".to_string());
        }

        let mut response = (status, axum::Json(body)).into_response();
        if rate_limited {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("60s"));
        }
        response
    }
}
