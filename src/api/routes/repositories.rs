//! Control-plane repository CRUD and manifest detail view (spec §6).
//! Repository full names contain a slash (`namespace/repo`), so the
//! sub-resource routes are served by a catch-all dispatcher the same way
//! the OCI data path is.

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};

use crate::api::middleware::AuthContext;
use crate::api::routes::scans;
use crate::api::state::AppState;
use crate::api::types::{
    error_codes, ApiError, CreateRepositoryRequest, ManifestDetailResponse, VulnerabilitySummary,
};
use crate::catalog::{NamespaceType, Principal};
use crate::error::RegistryError;

/// spec §4.13: a non-admin principal may only write repositories under its
/// own username prefix (`<username>/...`). Returns the 403 response to
/// short-circuit on, or `None` if the write is permitted.
pub(super) fn require_owner(principal: &Principal, repo_full_name: &str) -> Option<Response> {
    if principal.is_admin() || repo_full_name.starts_with(&format!("{}/", principal.username)) {
        return None;
    }
    Some(api_error(&RegistryError::Forbidden(format!(
        "{} is not permitted to modify {repo_full_name}",
        principal.username
    ))))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/repositories", post(create_repository))
        .route("/repositories/*rest", axum::routing::any(dispatch))
}

async fn create_repository(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateRepositoryRequest>,
) -> Response {
    let Some(principal) = auth.principal else {
        return api_error(&RegistryError::Unauthorized);
    };
    let full_name = format!("{}/{}", req.namespace, req.name);
    if let Some(resp) = require_owner(&principal, &full_name) {
        return resp;
    }
    let namespace = match state
        .catalog
        .get_or_create_namespace(&req.namespace, Some(principal.id), NamespaceType::User)
        .await
    {
        Ok(ns) => ns,
        Err(e) => return api_error(&e),
    };
    match state
        .catalog
        .get_or_create_repository(namespace.id, &req.name, principal.id)
        .await
    {
        Ok(repo) => (StatusCode::CREATED, Json(repo)).into_response(),
        Err(e) => api_error(&e),
    }
}

enum Target {
    Repository { full_name: String },
    Tag { full_name: String, tag: String },
    Manifest { full_name: String, reference: String },
    ScanStatus { full_name: String, reference: String },
    ScanReport { full_name: String, reference: String },
    ScanHistory { full_name: String, reference: String },
    ScanTrigger { full_name: String, reference: String },
}

fn parse_target(rest: &str) -> Target {
    if let Some(idx) = rest.find("/tags/") {
        return Target::Tag {
            full_name: rest[..idx].to_string(),
            tag: rest[idx + "/tags/".len()..].to_string(),
        };
    }
    if let Some(idx) = rest.find("/manifests/") {
        let full_name = rest[..idx].to_string();
        let tail = &rest[idx + "/manifests/".len()..];

        const SCAN_MARKERS: &[(&str, fn(String, String) -> Target)] = &[
            ("/scan/status", |full_name, reference| Target::ScanStatus { full_name, reference }),
            ("/scan/report", |full_name, reference| Target::ScanReport { full_name, reference }),
            ("/scan/history", |full_name, reference| Target::ScanHistory { full_name, reference }),
            ("/scan/trigger", |full_name, reference| Target::ScanTrigger { full_name, reference }),
        ];
        for (marker, build) in SCAN_MARKERS {
            if let Some(scan_idx) = tail.find(marker) {
                return build(full_name, tail[..scan_idx].to_string());
            }
        }

        return Target::Manifest { full_name, reference: tail.to_string() };
    }
    Target::Repository { full_name: rest.to_string() }
}

fn api_error(e: &RegistryError) -> Response {
    (
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ApiError::from(e)),
    )
        .into_response()
}

async fn dispatch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    method: Method,
    Path(rest): Path<String>,
) -> Response {
    match (method, parse_target(&rest)) {
        (Method::DELETE, Target::Repository { full_name }) => delete_repository(state, auth, full_name).await,
        (Method::DELETE, Target::Tag { full_name, tag }) => delete_tag(state, auth, full_name, tag).await,
        (Method::GET, Target::Manifest { full_name, reference }) => {
            manifest_detail(state, full_name, reference).await
        }
        (Method::DELETE, Target::Manifest { full_name, reference }) => {
            delete_manifest(state, auth, full_name, reference).await
        }
        (Method::GET, Target::ScanStatus { full_name, reference }) => scans::status(state, full_name, reference).await,
        (Method::GET, Target::ScanReport { full_name, reference }) => scans::report(state, full_name, reference).await,
        (Method::GET, Target::ScanHistory { full_name, reference }) => scans::history(state, full_name, reference).await,
        (Method::POST, Target::ScanTrigger { full_name, reference }) => {
            scans::trigger(state, auth, full_name, reference).await
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn authorize(auth: &AuthContext, full_name: &str) -> Option<Response> {
    let Some(principal) = &auth.principal else {
        return Some(api_error(&RegistryError::Unauthorized));
    };
    require_owner(principal, full_name)
}

async fn delete_repository(state: AppState, auth: AuthContext, full_name: String) -> Response {
    if let Some(resp) = authorize(&auth, &full_name) {
        return resp;
    }
    let repo = match state.catalog.get_repository_by_full_name(&full_name).await {
        Ok(Some((repo, _))) => repo,
        Ok(None) => return api_error(&RegistryError::NotFound(full_name)),
        Err(e) => return api_error(&e),
    };
    match state.catalog.delete_repository(repo.id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => api_error(&e),
    }
}

async fn delete_tag(state: AppState, auth: AuthContext, full_name: String, tag: String) -> Response {
    if let Some(resp) = authorize(&auth, &full_name) {
        return resp;
    }
    let repo = match state.catalog.get_repository_by_full_name(&full_name).await {
        Ok(Some((repo, _))) => repo,
        Ok(None) => return api_error(&RegistryError::NotFound(full_name)),
        Err(e) => return api_error(&e),
    };
    match state.catalog.delete_tag(repo.id, &tag).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => api_error(&e),
    }
}

async fn delete_manifest(state: AppState, auth: AuthContext, full_name: String, reference: String) -> Response {
    if let Some(resp) = authorize(&auth, &full_name) {
        return resp;
    }
    let manifest_id = match resolve_manifest_id(&state, &full_name, &reference).await {
        Ok(Some(id)) => id,
        Ok(None) => return api_error(&RegistryError::NotFound(reference)),
        Err(e) => return api_error(&e),
    };
    match state.catalog.delete_manifest(manifest_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => api_error(&e),
    }
}

async fn resolve_manifest_id(
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

async fn manifest_detail(state: AppState, full_name: String, reference: String) -> Response {
    let manifest_id = match resolve_manifest_id(&state, &full_name, &reference).await {
        Ok(Some(id)) => id,
        Ok(None) => return api_error(&RegistryError::NotFound(reference)),
        Err(e) => return api_error(&e),
    };
    let manifest = match state.catalog.get_manifest(manifest_id).await {
        Ok(Some(m)) => m,
        Ok(None) => return api_error(&RegistryError::NotFound(reference)),
        Err(e) => return api_error(&e),
    };
    let vulns = match state.catalog.latest_scan_report(manifest_id).await {
        Ok(report) => report,
        Err(e) => return api_error(&e),
    };
    let vulnerability_summary = vulns
        .map(|r| VulnerabilitySummary {
            critical: r.critical_count,
            high: r.high_count,
            medium: r.medium_count,
            low: r.low_count,
        })
        .unwrap_or_default();

    let repo = match state.catalog.get_repository_by_full_name(&full_name).await {
        Ok(Some((repo, _))) => repo,
        Ok(None) => return api_error(&RegistryError::NotFound(full_name)),
        Err(e) => return api_error(&e),
    };
    let is_signed = match state
        .catalog
        .get_tag(repo.id, &format!("{}.sig", manifest.digest.replace("sha256:", "sha256-")))
        .await
    {
        Ok(tag) => tag.is_some(),
        Err(e) => return api_error(&e),
    };

    Json(ManifestDetailResponse {
        digest: manifest.digest,
        size: manifest.size,
        media_type: manifest.media_type,
        pull_count: manifest.pull_count,
        vulnerability_summary,
        is_signed,
        health: manifest.health,
    })
    .into_response()
}
