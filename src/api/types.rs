//! Shared HTTP DTOs for both the OCI data path and the control plane.
//!
//! The two surfaces deliberately use different error body shapes:
//! `OciErrorBody` (`{"errors":[{"code":...,"message":...}]}`) for `/v2/*`,
//! `ApiError` (`{"code","message","details","request_id"}`) for `/api/v1/*`
//! and `/auth/token`. Both are derived from the same `RegistryError`.

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Control-plane error body. Mirrors the shape used throughout the crate
/// this registry's API layer is adapted from.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError {
            code: code.into(),
            message: message.into(),
            details: None,
            request_id: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

pub mod error_codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const POLICY_DENIED: &str = "POLICY_DENIED";
    pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
    pub const CONFLICT: &str = "CONFLICT";
}

impl From<&RegistryError> for ApiError {
    fn from(e: &RegistryError) -> Self {
        let code = match e {
            RegistryError::NotFound(_) => error_codes::NOT_FOUND,
            RegistryError::ClientValidation(_) => error_codes::INVALID_REQUEST,
            RegistryError::Unauthorized => error_codes::UNAUTHORIZED,
            RegistryError::Forbidden(_) => error_codes::FORBIDDEN,
            RegistryError::PolicyDenied(_) => error_codes::POLICY_DENIED,
            RegistryError::QuotaExceeded { .. } => error_codes::QUOTA_EXCEEDED,
            RegistryError::TagImmutable(_) => error_codes::CONFLICT,
            _ => error_codes::INTERNAL_ERROR,
        };
        ApiError::new(code, e.to_string())
    }
}

/// OCI Distribution error body, per spec §6:
/// `{"errors":[{"code":"NAME_UNKNOWN","message":"..."}]}`.
#[derive(Debug, Clone, Serialize)]
pub struct OciErrorEntry {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OciErrorBody {
    pub errors: Vec<OciErrorEntry>,
}

impl From<&RegistryError> for OciErrorBody {
    fn from(e: &RegistryError) -> Self {
        OciErrorBody {
            errors: vec![OciErrorEntry {
                code: e.oci_code().to_string(),
                message: e.to_string(),
            }],
        }
    }
}

// ---- control-plane request/response DTOs ----

#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub repositories: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TagsListResponse {
    pub name: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ManifestDetailResponse {
    pub digest: String,
    pub size: u64,
    pub media_type: String,
    pub pull_count: u64,
    pub vulnerability_summary: VulnerabilitySummary,
    pub is_signed: bool,
    pub health: crate::catalog::HealthScore,
}

#[derive(Debug, Default, Serialize)]
pub struct VulnerabilitySummary {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub repositories: usize,
    pub manifests: usize,
}

#[derive(Debug, Deserialize)]
pub struct PolicyUpdateRequest {
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct PolicyResponse {
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct GcQuery {
    #[serde(rename = "dryRun", default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub struct CleanupZombiesRequest {
    pub days_threshold: i64,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupZombiesResponse {
    pub deleted: usize,
}

#[derive(Debug, Serialize)]
pub struct ZombieImagesResponse {
    pub zombies: Vec<crate::catalog::ZombieImage>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshed: usize,
}

#[derive(Debug, Deserialize)]
pub struct DependenciesQuery {
    pub repository: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DependencyNodeResponse {
    pub id: uuid::Uuid,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub tag: Option<String>,
    pub digest: String,
}

#[derive(Debug, Serialize)]
pub struct DependencyEdgeResponse {
    pub source: uuid::Uuid,
    pub target: uuid::Uuid,
    pub label: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DependenciesResponse {
    pub nodes: Vec<DependencyNodeResponse>,
    pub edges: Vec<DependencyEdgeResponse>,
}

#[derive(Debug, Deserialize)]
pub struct PrioritizedQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TokenQuery {}

#[derive(Debug, Deserialize)]
pub struct TokenRequestQuery {
    pub service: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenHttpResponse {
    pub token: String,
    pub access_token: String,
    pub expires_in: u64,
    pub issued_at: String,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<crate::catalog::Session>,
}
