//! Intelligence control-plane routes (spec component 6 / §6): prioritized
//! vulnerability listing, per-CVE intelligence lookup, and a manual EPSS
//! refresh trigger.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};

use crate::api::middleware::AuthContext;
use crate::api::state::AppState;
use crate::api::types::{ApiError, PrioritizedQuery, RefreshResponse};
use crate::error::RegistryError;

const DEFAULT_PRIORITIZED_LIMIT: usize = 50;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/vulnerabilities/prioritized", get(prioritized))
        .route("/vulnerabilities/intelligence/:cve_id", get(intelligence))
        .route("/vulnerabilities/refresh-epss", post(refresh_epss))
}

fn api_error(e: &RegistryError) -> Response {
    (
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ApiError::from(e)),
    )
        .into_response()
}

async fn prioritized(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<PrioritizedQuery>,
) -> Response {
    if auth.principal.is_none() {
        return api_error(&RegistryError::Unauthorized);
    }
    let limit = query.limit.unwrap_or(DEFAULT_PRIORITIZED_LIMIT);
    match state.intelligence.list_prioritized(limit).await {
        Ok(priorities) => Json(priorities).into_response(),
        Err(e) => api_error(&e),
    }
}

async fn intelligence(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(cve_id): Path<String>,
) -> Response {
    if auth.principal.is_none() {
        return api_error(&RegistryError::Unauthorized);
    }
    match state.intelligence.get_intelligence(&cve_id).await {
        Ok(Some(intel)) => Json(intel).into_response(),
        Ok(None) => api_error(&RegistryError::NotFound(cve_id)),
        Err(e) => api_error(&e),
    }
}

async fn refresh_epss(State(state): State<AppState>, Extension(auth): Extension<AuthContext>) -> Response {
    match &auth.principal {
        Some(p) if p.role == crate::catalog::Role::Admin => {}
        Some(_) => {
            return (
                StatusCode::FORBIDDEN,
                Json(ApiError::new(crate::api::types::error_codes::FORBIDDEN, "admin role required")),
            )
                .into_response()
        }
        None => return api_error(&RegistryError::Unauthorized),
    }
    match state.intelligence.refresh_epss_data().await {
        Ok(refreshed) => Json(RefreshResponse { refreshed }).into_response(),
        Err(e) => api_error(&e),
    }
}
