//! Cost Analyzer control-plane routes (spec component 8 / §6): the tenant
//! dashboard, zombie-image listing, a manual cost refresh, and cleanup.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};

use crate::api::middleware::AuthContext;
use crate::api::state::AppState;
use crate::api::types::{
    ApiError, CleanupZombiesRequest, CleanupZombiesResponse, RefreshResponse, ZombieImagesResponse,
};
use crate::error::RegistryError;

const DEFAULT_ZOMBIE_DAYS_THRESHOLD: i64 = 90;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/costs/dashboard", get(dashboard))
        .route("/costs/zombie-images", get(zombie_images))
        .route("/costs/refresh", post(refresh))
        .route("/costs/cleanup-zombies", post(cleanup_zombies))
}

fn api_error(e: &RegistryError) -> Response {
    (
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ApiError::from(e)),
    )
        .into_response()
}

async fn dashboard(State(state): State<AppState>, Extension(auth): Extension<AuthContext>) -> Response {
    let Some(principal) = auth.principal else {
        return api_error(&RegistryError::Unauthorized);
    };
    match state.cost.get_dashboard(&principal).await {
        Ok(dashboard) => Json(dashboard).into_response(),
        Err(e) => api_error(&e),
    }
}

#[derive(serde::Deserialize)]
struct DaysThresholdQuery {
    #[serde(rename = "daysThreshold")]
    days_threshold: Option<i64>,
}

async fn zombie_images(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<DaysThresholdQuery>,
) -> Response {
    let Some(principal) = auth.principal else {
        return api_error(&RegistryError::Unauthorized);
    };
    let days_threshold = query.days_threshold.unwrap_or(DEFAULT_ZOMBIE_DAYS_THRESHOLD);
    match state.cost.detect_zombie_images(days_threshold, &principal).await {
        Ok(zombies) => Json(ZombieImagesResponse { zombies }).into_response(),
        Err(e) => api_error(&e),
    }
}

async fn refresh(State(state): State<AppState>, Extension(auth): Extension<AuthContext>) -> Response {
    if auth.principal.is_none() {
        return api_error(&RegistryError::Unauthorized);
    }
    match state.cost.refresh_all_costs().await {
        Ok(refreshed) => Json(RefreshResponse { refreshed }).into_response(),
        Err(e) => api_error(&e),
    }
}

async fn cleanup_zombies(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CleanupZombiesRequest>,
) -> Response {
    let Some(principal) = auth.principal else {
        return api_error(&RegistryError::Unauthorized);
    };
    match state.cost.cleanup_zombies(req.days_threshold, req.dry_run, &principal).await {
        Ok(deleted) => Json(CleanupZombiesResponse { deleted }).into_response(),
        Err(e) => api_error(&e),
    }
}
