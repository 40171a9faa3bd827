//! System control-plane routes (spec §6): aggregate stats, the live policy
//! program, manual GC, a redacted config snapshot, and session bookkeeping.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};

use crate::api::middleware::AuthContext;
use crate::api::state::AppState;
use crate::api::types::{
    error_codes, ApiError, GcQuery, PolicyResponse, PolicyUpdateRequest, SessionsResponse, StatsResponse,
};
use crate::error::RegistryError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/policy", get(get_policy).put(update_policy))
        .route("/system/gc", post(run_gc))
        .route("/system/config", get(get_config))
        .route("/system/sessions", get(list_sessions))
        .route("/system/sessions/:id", axum::routing::delete(delete_session))
}

fn api_error(e: &RegistryError) -> Response {
    (
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ApiError::from(e)),
    )
        .into_response()
}

fn require_admin(auth: &AuthContext) -> Option<Response> {
    match &auth.principal {
        Some(p) if p.role == crate::catalog::Role::Admin => None,
        Some(_) => Some(
            (
                StatusCode::FORBIDDEN,
                Json(ApiError::new(error_codes::FORBIDDEN, "admin role required")),
            )
                .into_response(),
        ),
        None => Some(api_error(&RegistryError::Unauthorized)),
    }
}

async fn stats(State(state): State<AppState>, Extension(auth): Extension<AuthContext>) -> Response {
    let Some(principal) = auth.principal else {
        return api_error(&RegistryError::Unauthorized);
    };
    let repos = match state.catalog.list_repositories_for_principal(&principal).await {
        Ok(repos) => repos,
        Err(e) => return api_error(&e),
    };
    let manifests = match state.catalog.list_all_manifests().await {
        Ok(m) => m,
        Err(e) => return api_error(&e),
    };
    Json(StatsResponse {
        repositories: repos.len(),
        manifests: manifests.len(),
    })
    .into_response()
}

async fn get_policy(State(state): State<AppState>) -> Response {
    Json(PolicyResponse { source: state.policy.source().await }).into_response()
}

async fn update_policy(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<PolicyUpdateRequest>,
) -> Response {
    if let Some(resp) = require_admin(&auth) {
        return resp;
    }
    match state.policy.update(&req.source).await {
        Ok(()) => Json(PolicyResponse { source: req.source }).into_response(),
        Err(msg) => (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(error_codes::INVALID_REQUEST, msg)),
        )
            .into_response(),
    }
}

async fn run_gc(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<GcQuery>,
) -> Response {
    if let Some(resp) = require_admin(&auth) {
        return resp;
    }
    match state.gc.run(query.dry_run).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => api_error(&e),
    }
}

async fn get_config(State(state): State<AppState>, Extension(auth): Extension<AuthContext>) -> Response {
    if let Some(resp) = require_admin(&auth) {
        return resp;
    }
    Json(serde_json::json!({
        "server_port": state.config.server_port,
        "policy_environment": state.config.policy_environment,
        "enable_immutable_tags": state.config.enable_immutable_tags,
        "enable_cost_intelligence": state.config.enable_cost_intelligence,
        "storage_cost_per_gb_month": state.config.storage_cost_per_gb_month,
        "bandwidth_cost_per_gb": state.config.bandwidth_cost_per_gb,
        "minio_secure": state.config.minio_secure,
    }))
    .into_response()
}

async fn list_sessions(State(state): State<AppState>, Extension(auth): Extension<AuthContext>) -> Response {
    if let Some(resp) = require_admin(&auth) {
        return resp;
    }
    match state.sessions.list().await {
        Ok(sessions) => Json(SessionsResponse { sessions }).into_response(),
        Err(e) => api_error(&e),
    }
}

async fn delete_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Response {
    if let Some(resp) = require_admin(&auth) {
        return resp;
    }
    match state.sessions.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => api_error(&e),
    }
}
