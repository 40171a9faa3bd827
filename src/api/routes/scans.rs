//! Scan control-plane handlers (spec component 5 / §6): status/report/
//! history reads and a manual trigger. Reached through `repositories`'s
//! catch-all dispatcher — a manifest reference trails the same slash-bearing
//! repository name, so these can't have their own top-level wildcard route
//! without conflicting with it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::middleware::AuthContext;
use crate::api::state::AppState;
use crate::api::types::ApiError;
use crate::error::RegistryError;

pub(super) async fn resolve_manifest_id(
    state: &AppState,
    full_name: &str,
    reference: &str,
) -> crate::error::Result<Option<uuid::Uuid>> {
    let Some((repo, _)) = state.catalog.get_repository_by_full_name(full_name).await? else {
        return Ok(None);
    };
    if let Some(digest) = reference.strip_prefix("sha256:") {
        let digest = format!("sha256:{digest}");
        return Ok(state.catalog.get_manifest_by_digest(repo.id, &digest).await?.map(|m| m.id));
    }
    Ok(state.catalog.get_tag(repo.id, reference).await?.map(|t| t.manifest_id))
}

fn api_error(e: &RegistryError) -> Response {
    (
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ApiError::from(e)),
    )
        .into_response()
}

pub(super) async fn status(state: AppState, full_name: String, reference: String) -> Response {
    let manifest_id = match resolve_manifest_id(&state, &full_name, &reference).await {
        Ok(Some(id)) => id,
        Ok(None) => return api_error(&RegistryError::NotFound(reference)),
        Err(e) => return api_error(&e),
    };
    match state.scanner.get_scan_status(manifest_id).await {
        Ok(Some((status, report_id))) => Json(serde_json::json!({ "status": status, "report_id": report_id })).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => api_error(&e),
    }
}

pub(super) async fn report(state: AppState, full_name: String, reference: String) -> Response {
    let manifest_id = match resolve_manifest_id(&state, &full_name, &reference).await {
        Ok(Some(id)) => id,
        Ok(None) => return api_error(&RegistryError::NotFound(reference)),
        Err(e) => return api_error(&e),
    };
    match state.scanner.get_scan_report(manifest_id).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => api_error(&e),
    }
}

pub(super) async fn history(state: AppState, full_name: String, reference: String) -> Response {
    let manifest_id = match resolve_manifest_id(&state, &full_name, &reference).await {
        Ok(Some(id)) => id,
        Ok(None) => return api_error(&RegistryError::NotFound(reference)),
        Err(e) => return api_error(&e),
    };
    match state.scanner.get_scan_history(manifest_id).await {
        Ok(history) => Json(history).into_response(),
        Err(e) => api_error(&e),
    }
}

pub(super) async fn trigger(state: AppState, auth: AuthContext, full_name: String, reference: String) -> Response {
    let Some(principal) = &auth.principal else {
        return api_error(&RegistryError::Unauthorized);
    };
    if let Some(resp) = super::repositories::require_owner(principal, &full_name) {
        return resp;
    }
    let manifest_id = match resolve_manifest_id(&state, &full_name, &reference).await {
        Ok(Some(id)) => id,
        Ok(None) => return api_error(&RegistryError::NotFound(reference)),
        Err(e) => return api_error(&e),
    };
    match state.scanner.scan_manifest(manifest_id, &full_name, &reference).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => api_error(&e),
    }
}
