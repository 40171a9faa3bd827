//! The OCI Distribution data path (spec §6): blobs, manifests, tags,
//! catalog. Repository names may contain slashes, which axum's router
//! cannot express as a path template, so every route below a fixed depth
//! is served by one catch-all (`/v2/*rest`) that parses the operation out
//! of the tail itself — the same shape real registries use for this exact
//! reason.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use std::collections::HashMap;

use crate::api::middleware::AuthContext;
use crate::api::state::AppState;
use crate::api::types::OciErrorBody;
use crate::catalog::Principal;
use crate::error::RegistryError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v2/", get(root))
        .route("/v2/*rest", axum::routing::any(dispatch))
}

async fn root() -> Response {
    let mut response = Json(serde_json::json!({})).into_response();
    response
        .headers_mut()
        .insert("docker-distribution-api-version", HeaderValue::from_static("registry/2.0"));
    response
}

enum Target {
    Catalog,
    TagsList { repo: String },
    StartUpload { repo: String },
    UploadChunk { repo: String, upload_id: String },
    Blob { repo: String, digest: String },
    Manifest { repo: String, reference: String },
}

fn parse_target(rest: &str) -> Option<Target> {
    if rest == "_catalog" {
        return Some(Target::Catalog);
    }
    if let Some(repo) = rest.strip_suffix("/tags/list") {
        return Some(Target::TagsList { repo: repo.to_string() });
    }
    if let Some(idx) = rest.find("/blobs/uploads") {
        let repo = rest[..idx].to_string();
        let after = rest[idx + "/blobs/uploads".len()..].trim_start_matches('/');
        return Some(if after.is_empty() {
            Target::StartUpload { repo }
        } else {
            Target::UploadChunk {
                repo,
                upload_id: after.to_string(),
            }
        });
    }
    if let Some(idx) = rest.find("/blobs/") {
        let repo = rest[..idx].to_string();
        let digest = rest[idx + "/blobs/".len()..].to_string();
        if !digest.is_empty() {
            return Some(Target::Blob { repo, digest });
        }
    }
    if let Some(idx) = rest.find("/manifests/") {
        let repo = rest[..idx].to_string();
        let reference = rest[idx + "/manifests/".len()..].to_string();
        if !reference.is_empty() {
            return Some(Target::Manifest { repo, reference });
        }
    }
    None
}

fn split_namespace_repo(full_name: &str) -> Option<(String, String)> {
    full_name.split_once('/').map(|(ns, repo)| (ns.to_string(), repo.to_string()))
}

fn granted_actions(state: &AppState, auth: &AuthContext, repo_full: &str) -> Vec<String> {
    match &auth.principal {
        None => Vec::new(),
        // Bearer token: the mint-time grant is authoritative, even if it
        // turns out to be empty for this repository.
        Some(_) if !auth.token_access.is_empty() => auth.granted_actions(repo_full),
        // Basic auth (or a token with no scopes at all): derive grants
        // directly from the principal, the same rule `mint` applies.
        Some(principal) => {
            state
                .tokens
                .grant_for(principal, repo_full, &["pull".to_string(), "push".to_string(), "delete".to_string()])
        }
    }
}

fn oci_error_response(e: &RegistryError) -> Response {
    (
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(OciErrorBody::from(e)),
    )
        .into_response()
}

fn unauthorized_challenge(repo_full: &str, action: &str) -> Response {
    let mut response = oci_error_response(&RegistryError::Unauthorized);
    if let Ok(value) = HeaderValue::from_str(&format!(
        "Bearer realm=\"/auth/token\",service=\"ociregistry\",scope=\"repository:{repo_full}:{action}\""
    )) {
        response.headers_mut().insert("www-authenticate", value);
    }
    response
}

async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    Path(rest): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(target) = parse_target(&rest) else {
        return oci_error_response(&RegistryError::NotFound(rest));
    };

    match target {
        Target::Catalog => catalog(state, auth).await,
        Target::TagsList { repo } => tags_list(state, repo).await,
        Target::StartUpload { repo } => {
            if method != Method::POST {
                return StatusCode::METHOD_NOT_ALLOWED.into_response();
            }
            if !granted_actions(&state, &auth, &repo).iter().any(|a| a == "push") {
                return unauthorized_challenge(&repo, "push");
            }
            start_upload(state, repo).await
        }
        Target::UploadChunk { repo, upload_id } => {
            if !granted_actions(&state, &auth, &repo).iter().any(|a| a == "push") {
                return unauthorized_challenge(&repo, "push");
            }
            match method {
                Method::PATCH => patch_upload(state, upload_id, body).await,
                Method::PUT => {
                    let digest = query.get("digest").cloned().unwrap_or_default();
                    put_upload(state, upload_id, digest, body).await
                }
                _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
            }
        }
        Target::Blob { repo, digest } => {
            if !granted_actions(&state, &auth, &repo).iter().any(|a| a == "pull") {
                return unauthorized_challenge(&repo, "pull");
            }
            get_blob(state, digest, method == Method::HEAD).await
        }
        Target::Manifest { repo, reference } => match method {
            Method::PUT => {
                if !granted_actions(&state, &auth, &repo).iter().any(|a| a == "push") {
                    return unauthorized_challenge(&repo, "push");
                }
                let Some(principal) = auth.principal.clone() else {
                    return unauthorized_challenge(&repo, "push");
                };
                put_manifest(state, repo, reference, body, principal).await
            }
            Method::GET | Method::HEAD => {
                if !granted_actions(&state, &auth, &repo).iter().any(|a| a == "pull") {
                    return unauthorized_challenge(&repo, "pull");
                }
                let principal = auth
                    .principal
                    .clone()
                    .unwrap_or_else(|| Principal { id: uuid::Uuid::nil(), username: "anonymous".into(), role: crate::catalog::Role::User });
                get_manifest(state, repo, reference, principal, method == Method::HEAD, &headers).await
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        },
    }
}

async fn catalog(state: AppState, auth: AuthContext) -> Response {
    let principal = match auth.principal {
        Some(p) => p,
        None => return oci_error_response(&RegistryError::Unauthorized),
    };
    match state.registry.list_catalog(&principal).await {
        Ok(repositories) => Json(serde_json::json!({ "repositories": repositories })).into_response(),
        Err(e) => oci_error_response(&e),
    }
}

async fn tags_list(state: AppState, repo: String) -> Response {
    let Some((ns, name)) = split_namespace_repo(&repo) else {
        return oci_error_response(&RegistryError::NotFound(repo));
    };
    match state.registry.list_tags(&ns, &name).await {
        Ok(tags) => Json(serde_json::json!({ "name": repo, "tags": tags })).into_response(),
        Err(e) => oci_error_response(&e),
    }
}

async fn start_upload(state: AppState, repo: String) -> Response {
    match state.registry.start_upload(&repo).await {
        Ok(started) => {
            let mut response = StatusCode::ACCEPTED.into_response();
            let h = response.headers_mut();
            h.insert(
                "location",
                HeaderValue::from_str(&format!("/v2/{repo}/blobs/uploads/{}", started.upload_id)).unwrap(),
            );
            h.insert("docker-upload-uuid", HeaderValue::from_str(&started.upload_id).unwrap());
            h.insert("range", HeaderValue::from_static("0-0"));
            response
        }
        Err(e) => oci_error_response(&e),
    }
}

async fn patch_upload(state: AppState, upload_id: String, chunk: Bytes) -> Response {
    match state.registry.patch_upload(&upload_id, chunk).await {
        Ok(progress) => {
            let mut response = StatusCode::ACCEPTED.into_response();
            let h = response.headers_mut();
            h.insert("docker-upload-uuid", HeaderValue::from_str(&upload_id).unwrap());
            let end = progress.total_bytes.saturating_sub(1);
            h.insert("range", HeaderValue::from_str(&format!("0-{end}")).unwrap());
            response
        }
        Err(e) => oci_error_response(&e),
    }
}

async fn put_upload(state: AppState, upload_id: String, digest: String, body: Bytes) -> Response {
    match state.registry.finalize_upload(&upload_id, &digest, body).await {
        Ok(blob) => {
            let mut response = StatusCode::CREATED.into_response();
            response
                .headers_mut()
                .insert("docker-content-digest", HeaderValue::from_str(&blob.digest).unwrap());
            response
        }
        Err(e) => oci_error_response(&e),
    }
}

async fn get_blob(state: AppState, digest: String, head_only: bool) -> Response {
    match state.registry.get_blob(&digest).await {
        Ok(Some(data)) => {
            let mut response = if head_only {
                StatusCode::OK.into_response()
            } else {
                data.into_response()
            };
            response
                .headers_mut()
                .insert("docker-content-digest", HeaderValue::from_str(&digest).unwrap());
            response
        }
        Ok(None) => oci_error_response(&RegistryError::NotFound(digest)),
        Err(e) => oci_error_response(&e),
    }
}

async fn put_manifest(state: AppState, repo: String, reference: String, body: Bytes, principal: Principal) -> Response {
    let Some((ns, name)) = split_namespace_repo(&repo) else {
        return oci_error_response(&RegistryError::NotFound(repo));
    };
    match state.registry.put_manifest(&ns, &name, &reference, body, &principal).await {
        Ok(outcome) => {
            let mut response = StatusCode::CREATED.into_response();
            response
                .headers_mut()
                .insert("docker-content-digest", HeaderValue::from_str(&outcome.digest).unwrap());
            response
        }
        Err(e) => oci_error_response(&e),
    }
}

async fn get_manifest(
    state: AppState,
    repo: String,
    reference: String,
    principal: Principal,
    head_only: bool,
    headers: &HeaderMap,
) -> Response {
    let Some((ns, name)) = split_namespace_repo(&repo) else {
        return oci_error_response(&RegistryError::NotFound(repo));
    };
    let environment = headers
        .get("x-registry-environment")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(state.config.policy_environment.as_str())
        .to_string();
    match state.registry.get_manifest(&ns, &name, &reference, &principal, &environment).await {
        Ok(outcome) => {
            let mut response = if head_only {
                StatusCode::OK.into_response()
            } else {
                outcome.body.into_response()
            };
            let h = response.headers_mut();
            h.insert("docker-content-digest", HeaderValue::from_str(&outcome.digest).unwrap());
            h.insert("content-type", HeaderValue::from_str(&outcome.media_type).unwrap());
            response
        }
        Err(e) => oci_error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_upload_target() {
        let target = parse_target("acme/app/blobs/uploads/").unwrap();
        assert!(matches!(target, Target::StartUpload { repo } if repo == "acme/app"));
    }

    #[test]
    fn parses_upload_chunk_target() {
        let target = parse_target("acme/app/blobs/uploads/abc-123").unwrap();
        assert!(matches!(target, Target::UploadChunk { repo, upload_id } if repo == "acme/app" && upload_id == "abc-123"));
    }

    #[test]
    fn parses_blob_target() {
        let target = parse_target("acme/app/blobs/sha256:deadbeef").unwrap();
        assert!(matches!(target, Target::Blob { repo, digest } if repo == "acme/app" && digest == "sha256:deadbeef"));
    }

    #[test]
    fn parses_manifest_target() {
        let target = parse_target("acme/app/manifests/v1").unwrap();
        assert!(matches!(target, Target::Manifest { repo, reference } if repo == "acme/app" && reference == "v1"));
    }

    #[test]
    fn parses_tags_list_target() {
        let target = parse_target("acme/app/tags/list").unwrap();
        assert!(matches!(target, Target::TagsList { repo } if repo == "acme/app"));
    }

    #[test]
    fn parses_catalog_target() {
        assert!(matches!(parse_target("_catalog"), Some(Target::Catalog)));
    }
}
