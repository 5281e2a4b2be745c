//! HTTP middleware: rate limiting and API key authentication.

use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use super::state::AppState;

/// Checks per-IP request rate before routing.
pub(crate) async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();
    match state.rate_limiter.check(ip).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(%ip, retry_after, "rate limit exceeded");
            let body = serde_json::json!({
                "error": "rate limit exceeded",
                "code": "rate_limited",
                "retryable": true,
                "retry_after": retry_after,
            });
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
    }
}

/// API key authentication.
///
/// When an API key is configured, all requests except `/health` must carry
/// either `Authorization: Bearer <key>` or `X-API-Key: <key>`. This gates
/// access to the server; the ledger caller is still named by `X-Caller`.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let expected_key = match &state.api_key {
        Some(k) => k,
        None => return next.run(request).await,
    };

    // Exempt for load balancer health checks.
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    let presented = bearer.or(header_key).map(|key| key == expected_key);

    match presented {
        Some(true) => next.run(request).await,
        Some(false) => {
            warn!(path = %request.uri().path(), "invalid API key");
            super::json_error(StatusCode::FORBIDDEN, "forbidden", "invalid API key").into_response()
        }
        None => super::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "authentication required",
        )
        .into_response(),
    }
}
