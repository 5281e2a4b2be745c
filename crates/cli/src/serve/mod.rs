//! `vnf-ledger serve` -- HTTP JSON API over the ledger engine.
//!
//! The caller of every ledger operation is named by the `X-Caller` header.
//! Signature checking happens upstream; this server trusts the header.
//!
//! Security features:
//! - CORS headers on all responses
//! - Per-IP rate limiting (default: 60 req/min, configurable)
//! - Optional API key authentication
//!
//! Endpoints:
//! - GET    /health                        - Server status (exempt from auth)
//! - POST   /backend                       - Rotate the backend (creator)
//! - POST   /registrations                 - Request registration
//! - DELETE /registrations                 - Request unregistration
//! - POST   /registrations/confirm         - Confirm registration (backend)
//! - POST   /unregistrations/confirm       - Confirm unregistration (backend)
//! - GET    /registrations/{identity}      - Registration flag
//! - POST   /resources                     - Request deployment
//! - GET    /resources?owner=              - List an owner's live resources
//! - GET    /resources/{id}                - Read one resource
//! - DELETE /resources/{id}                - Request deletion
//! - POST   /resources/{id}/deployment     - Confirm deployment (backend)
//! - POST   /resources/{id}/deletion       - Confirm deletion (backend)
//! - GET    /pending?older_than=           - Stuck requests (backend)
//! - GET    /events?after=&limit=          - Event journal
//!
//! All responses use Content-Type: application/json.

mod handlers;
mod middleware;
mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use vnf_ledger_engine::LedgerError;

use crate::config::LedgerConfig;

use self::handlers::{
    handle_confirm_delete, handle_confirm_deploy, handle_confirm_registration,
    handle_confirm_unregistration, handle_events, handle_get_resource, handle_health,
    handle_is_registered, handle_list_resources, handle_not_found, handle_pending,
    handle_request_delete, handle_request_deploy, handle_request_registration,
    handle_request_unregistration, handle_set_backend,
};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// A JSON error body: `{"error", "code", "retryable"}`.
fn json_error(status: StatusCode, code: &str, message: &str) -> impl IntoResponse {
    (
        status,
        Json(serde_json::json!({
            "error": message,
            "code": code,
            "retryable": false,
        })),
    )
}

/// Map a ledger rejection to its HTTP status and JSON body.
fn ledger_error(err: &LedgerError) -> Response {
    let status = match err {
        LedgerError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        LedgerError::NotRegistered { .. } | LedgerError::Forbidden { .. } => StatusCode::FORBIDDEN,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::InvalidState { .. } | LedgerError::DuplicateId { .. } => StatusCode::CONFLICT,
        LedgerError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        LedgerError::Internal { .. } | LedgerError::Storage(_) => {
            error!(error = %err, "ledger fault");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let body = serde_json::json!({
        "error": err.to_string(),
        "code": err.code(),
        "retryable": err.is_retryable(),
    });
    (status, Json(body)).into_response()
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/backend", post(handle_set_backend))
        .route(
            "/registrations",
            post(handle_request_registration).delete(handle_request_unregistration),
        )
        .route("/registrations/confirm", post(handle_confirm_registration))
        .route("/registrations/{identity}", get(handle_is_registered))
        .route(
            "/unregistrations/confirm",
            post(handle_confirm_unregistration),
        )
        .route(
            "/resources",
            post(handle_request_deploy).get(handle_list_resources),
        )
        .route(
            "/resources/{id}",
            get(handle_get_resource).delete(handle_request_delete),
        )
        .route("/resources/{id}/deployment", post(handle_confirm_deploy))
        .route("/resources/{id}/deletion", post(handle_confirm_delete))
        .route("/pending", get(handle_pending))
        .route("/events", get(handle_events))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the HTTP server. `port` overrides the configured port.
pub(crate) async fn start_server(
    config: &LedgerConfig,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = config.build_engine()?;
    if engine.current_backend().is_none() {
        warn!("no backend configured; confirmations are refused until the creator sets one");
    }

    let rate_limit = config.server.rate_limit;
    let api_key = config.server.api_key.clone().filter(|k| !k.is_empty());
    if api_key.is_some() {
        info!("API key authentication enabled");
    }
    info!(rate_limit, "rate limit: requests per minute per IP");

    let state = Arc::new(AppState {
        engine: RwLock::new(engine),
        rate_limiter: RateLimiter::new(rate_limit),
        api_key,
    });
    let app = router(state);

    let port = port.unwrap_or(config.server.port);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "VNF ledger listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
