//! HTTP route handlers.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use vnf_ledger_engine::{
    CorrelationId, EventEnvelope, Identity, LedgerError, ResourceRecord, ResourceState,
};

use super::state::AppState;
use super::{json_error, ledger_error};

/// Header naming the caller of a ledger operation.
const CALLER_HEADER: &str = "x-caller";

const DEFAULT_EVENT_LIMIT: usize = 100;
const MAX_EVENT_LIMIT: usize = 1000;

/// The authenticated caller, from the `X-Caller` header.
pub(crate) struct Caller(pub(crate) Identity);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(Identity::from(v)))
            .ok_or_else(|| {
                json_error(
                    StatusCode::UNAUTHORIZED,
                    "unauthenticated",
                    "missing X-Caller header",
                )
                .into_response()
            })
    }
}

fn bad_request(message: &str) -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_request", message).into_response()
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(b)| b)
        .map_err(|e| bad_request(&e.body_text()))
}

fn resource_id(path: Result<Path<CorrelationId>, PathRejection>) -> Result<CorrelationId, Response> {
    path.map(|Path(id)| id)
        .map_err(|e| bad_request(&e.body_text()))
}

fn query<T>(q: Result<Query<T>, QueryRejection>) -> Result<T, Response> {
    q.map(|Query(q)| q).map_err(|e| bad_request(&e.body_text()))
}

fn event_response(status: StatusCode, result: Result<EventEnvelope, LedgerError>) -> Response {
    match result {
        Ok(envelope) => (status, Json(envelope)).into_response(),
        Err(e) => ledger_error(&e),
    }
}

/// A record as served: its stored fields plus the derived state.
#[derive(Serialize)]
struct RecordView<'a> {
    #[serde(flatten)]
    record: &'a ResourceRecord,
    state: ResourceState,
}

impl<'a> From<&'a ResourceRecord> for RecordView<'a> {
    fn from(record: &'a ResourceRecord) -> Self {
        RecordView {
            record,
            state: record.state(),
        }
    }
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not_found", "not found")
}

/// GET /health
pub(crate) async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.engine.read().await;
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": engine.current_backend(),
        "listing_policy": engine.config().listing_policy,
    });
    (StatusCode::OK, Json(response))
}

#[derive(Deserialize)]
pub(crate) struct SetBackendBody {
    backend: Identity,
}

/// POST /backend
pub(crate) async fn handle_set_backend(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    payload: Result<Json<SetBackendBody>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let mut engine = state.engine.write().await;
    match engine.set_backend(&caller, req.backend.clone()) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "backend": req.backend })),
        )
            .into_response(),
        Err(e) => ledger_error(&e),
    }
}

// ── Registration ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct RegistrationBody {
    proof: String,
}

/// POST /registrations
pub(crate) async fn handle_request_registration(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    payload: Result<Json<RegistrationBody>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let engine = state.engine.read().await;
    event_response(
        StatusCode::ACCEPTED,
        engine.request_registration(&caller, &req.proof).await,
    )
}

/// DELETE /registrations
pub(crate) async fn handle_request_unregistration(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Response {
    let engine = state.engine.read().await;
    event_response(
        StatusCode::ACCEPTED,
        engine.request_unregistration(&caller).await,
    )
}

#[derive(Deserialize)]
pub(crate) struct IdentityOutcomeBody {
    identity: Identity,
    success: bool,
}

/// POST /registrations/confirm
pub(crate) async fn handle_confirm_registration(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    payload: Result<Json<IdentityOutcomeBody>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let engine = state.engine.read().await;
    event_response(
        StatusCode::OK,
        engine
            .confirm_registration(&caller, &req.identity, req.success)
            .await,
    )
}

/// POST /unregistrations/confirm
pub(crate) async fn handle_confirm_unregistration(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    payload: Result<Json<IdentityOutcomeBody>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let engine = state.engine.read().await;
    event_response(
        StatusCode::OK,
        engine
            .confirm_unregistration(&caller, &req.identity, req.success)
            .await,
    )
}

/// GET /registrations/{identity}
pub(crate) async fn handle_is_registered(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
) -> Response {
    let identity = Identity::from(identity);
    let engine = state.engine.read().await;
    match engine.is_registered(&identity).await {
        Ok(registered) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "identity": identity,
                "registered": registered,
            })),
        )
            .into_response(),
        Err(e) => ledger_error(&e),
    }
}

// ── Resources ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct DeployBody {
    template_id: String,
    #[serde(default)]
    parameters: String,
}

/// POST /resources
pub(crate) async fn handle_request_deploy(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    payload: Result<Json<DeployBody>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let engine = state.engine.read().await;
    event_response(
        StatusCode::ACCEPTED,
        engine
            .request_deploy(&caller, &req.template_id, &req.parameters)
            .await,
    )
}

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    owner: Option<String>,
}

/// GET /resources?owner=
///
/// Without `owner`, lists the caller's own resources.
pub(crate) async fn handle_list_resources(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    q: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let q = match query(q) {
        Ok(q) => q,
        Err(r) => return r,
    };
    let owner = q.owner.map(Identity::from).unwrap_or_else(|| caller.clone());
    let engine = state.engine.read().await;
    match engine.list_records(&caller, &owner).await {
        Ok(records) => {
            let views: Vec<RecordView<'_>> = records.iter().map(RecordView::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "owner": owner, "resources": views })),
            )
                .into_response()
        }
        Err(e) => ledger_error(&e),
    }
}

/// GET /resources/{id}
pub(crate) async fn handle_get_resource(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    path: Result<Path<CorrelationId>, PathRejection>,
) -> Response {
    let id = match resource_id(path) {
        Ok(id) => id,
        Err(r) => return r,
    };
    let engine = state.engine.read().await;
    match engine.get_record(&caller, id).await {
        Ok(record) => (StatusCode::OK, Json(RecordView::from(&record))).into_response(),
        Err(e) => ledger_error(&e),
    }
}

/// DELETE /resources/{id}
pub(crate) async fn handle_request_delete(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    path: Result<Path<CorrelationId>, PathRejection>,
) -> Response {
    let id = match resource_id(path) {
        Ok(id) => id,
        Err(r) => return r,
    };
    let engine = state.engine.read().await;
    event_response(StatusCode::ACCEPTED, engine.request_delete(&caller, id).await)
}

#[derive(Deserialize)]
pub(crate) struct DeploymentOutcomeBody {
    owner: Identity,
    success: bool,
    #[serde(default)]
    external_id: String,
}

/// POST /resources/{id}/deployment
pub(crate) async fn handle_confirm_deploy(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    path: Result<Path<CorrelationId>, PathRejection>,
    payload: Result<Json<DeploymentOutcomeBody>, JsonRejection>,
) -> Response {
    let id = match resource_id(path) {
        Ok(id) => id,
        Err(r) => return r,
    };
    let req = match body(payload) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let engine = state.engine.read().await;
    event_response(
        StatusCode::OK,
        engine
            .confirm_deploy(&caller, id, &req.owner, req.success, &req.external_id)
            .await,
    )
}

#[derive(Deserialize)]
pub(crate) struct DeletionOutcomeBody {
    owner: Identity,
    success: bool,
}

/// POST /resources/{id}/deletion
pub(crate) async fn handle_confirm_delete(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    path: Result<Path<CorrelationId>, PathRejection>,
    payload: Result<Json<DeletionOutcomeBody>, JsonRejection>,
) -> Response {
    let id = match resource_id(path) {
        Ok(id) => id,
        Err(r) => return r,
    };
    let req = match body(payload) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let engine = state.engine.read().await;
    event_response(
        StatusCode::OK,
        engine
            .confirm_delete(&caller, id, &req.owner, req.success)
            .await,
    )
}

// ── Supervision ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct PendingQuery {
    /// RFC 3339 cutoff; defaults to now.
    older_than: Option<String>,
}

/// GET /pending?older_than=
pub(crate) async fn handle_pending(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    q: Result<Query<PendingQuery>, QueryRejection>,
) -> Response {
    let q = match query(q) {
        Ok(q) => q,
        Err(r) => return r,
    };
    let cutoff = match q.older_than {
        Some(raw) => match OffsetDateTime::parse(&raw, &Rfc3339) {
            Ok(at) => at,
            Err(e) => return bad_request(&format!("older_than: {}", e)),
        },
        None => OffsetDateTime::now_utc(),
    };
    let engine = state.engine.read().await;
    match engine.pending_requests(&caller, cutoff).await {
        Ok(records) => {
            let views: Vec<RecordView<'_>> = records.iter().map(RecordView::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "pending": views })),
            )
                .into_response()
        }
        Err(e) => ledger_error(&e),
    }
}

#[derive(Deserialize)]
pub(crate) struct EventsQuery {
    #[serde(default)]
    after: u64,
    limit: Option<usize>,
}

/// GET /events?after=&limit=
pub(crate) async fn handle_events(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    q: Result<Query<EventsQuery>, QueryRejection>,
) -> Response {
    let q = match query(q) {
        Ok(q) => q,
        Err(r) => return r,
    };
    let limit = q
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    let engine = state.engine.read().await;
    match engine.events_since(&caller, q.after, limit).await {
        Ok(events) => {
            let next = events.last().map_or(q.after, |e| e.sequence);
            (
                StatusCode::OK,
                Json(serde_json::json!({ "events": events, "next": next })),
            )
                .into_response()
        }
        Err(e) => ledger_error(&e),
    }
}
