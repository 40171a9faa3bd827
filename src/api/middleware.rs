//! Cross-cutting request middleware, layered in `server::build_router` the
//! same way as the crate this registry's API layer is adapted from:
//! request-id, auth-context, rate-limit, CORS, then error-handling
//! outermost, with metrics layered innermost.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::api::auth::{principal_for_username, principal_from_basic};
use crate::api::state::{AppState, RateLimitResult};
use crate::api::types::{error_codes, ApiError};
use crate::catalog::{Principal, Session};

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Tags the request with whatever principal the `Authorization` header
/// resolves to, without rejecting anonymous requests — route handlers and
/// `require_auth_middleware` decide what to do with an absent principal.
///
/// A bearer token is verified and its `sub` claim is used to rebuild the
/// Principal; Basic credentials authenticate as their username (see
/// `api::auth`). On the latter path, a session is best-effort recorded.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub principal: Option<Principal>,
    /// Actions the bearer token that produced this context was granted,
    /// per repository full name. Empty (not absent) for Basic auth, which
    /// carries no pre-computed scope.
    pub token_access: Vec<crate::token::GrantedScope>,
}

impl AuthContext {
    pub fn granted_actions(&self, repository_full_name: &str) -> Vec<String> {
        self.token_access
            .iter()
            .find(|g| g.name == repository_full_name)
            .map(|g| g.actions.clone())
            .unwrap_or_default()
    }
}

pub async fn auth_context_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let context = match header.as_deref() {
        Some(h) if h.starts_with("Bearer ") => {
            let token = &h["Bearer ".len()..];
            match state.tokens.verify(token) {
                Ok(claims) => AuthContext {
                    principal: Some(principal_for_username(&claims.sub)),
                    token_access: claims.access,
                },
                Err(_) => AuthContext::default(),
            }
        }
        Some(h) if h.starts_with("Basic ") => match principal_from_basic(h) {
            Some(principal) => {
                let session = Session {
                    session_id: Uuid::new_v4().to_string(),
                    user_id: principal.id,
                    username: principal.username.clone(),
                    role: principal.role,
                    login_at: chrono::Utc::now(),
                };
                if let Err(e) = state.sessions.put(session, crate::queue::SESSION_TTL).await {
                    tracing::debug!(error = %e, "session store unavailable, continuing token-only");
                }
                AuthContext {
                    principal: Some(principal),
                    token_access: Vec::new(),
                }
            }
            None => AuthContext::default(),
        },
        _ => AuthContext::default(),
    };

    req.extensions_mut().insert(context);
    next.run(req).await
}

/// Rejects requests with no resolved principal. Applied only to routes
/// that actually require auth (control-plane routes, per spec §6).
pub async fn require_auth_middleware(req: Request, next: Next) -> Response {
    let has_principal = req
        .extensions()
        .get::<AuthContext>()
        .map(|c| c.principal.is_some())
        .unwrap_or(false);
    if !has_principal {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new(error_codes::UNAUTHORIZED, "authentication required")),
        )
            .into_response();
    }
    next.run(req).await
}

fn client_key(req: &Request) -> String {
    if let Some(auth) = req.extensions().get::<AuthContext>() {
        if let Some(p) = &auth.principal {
            return format!("user:{}", p.username);
        }
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| format!("ip:{v}"))
        .unwrap_or_else(|| "ip:unknown".to_string())
}

pub async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let key = client_key(&req);
    match state.rate_limiter.check_and_increment(&key).await {
        RateLimitResult::Allowed { remaining } => {
            let mut response = next.run(req).await;
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                response.headers_mut().insert("x-ratelimit-remaining", value);
            }
            response
        }
        RateLimitResult::Limited { retry_after_secs } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ApiError::new(error_codes::RATE_LIMITED, "rate limit exceeded")),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
            response
        }
    }
}

/// No-wildcard-by-default CORS: headers are only added when both enabled
/// and at least one explicit origin is configured.
pub async fn cors_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    if state.server_config.cors_enabled && !state.server_config.cors_origins.is_empty() {
        let origins = state.server_config.cors_origins.join(", ");
        if let Ok(value) = HeaderValue::from_str(&origins) {
            response.headers_mut().insert("access-control-allow-origin", value);
        }
    }
    response
}

/// Placeholder for uniform error post-processing; handlers already return
/// typed error bodies, so this only exists as the outermost layering slot.
pub async fn error_handler_middleware(req: Request, next: Next) -> Response {
    next.run(req).await
}

/// Collapses dynamic path segments (digests, uuids) so label cardinality
/// stays bounded.
fn normalize_path_for_metrics(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.starts_with("sha256:") || segment.len() == 64 && segment.chars().all(|c| c.is_ascii_hexdigit())
            {
                ":digest"
            } else if Uuid::parse_str(segment).is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(feature = "metrics")]
pub async fn metrics_middleware(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let Some(metrics) = state.metrics.clone() else {
        return next.run(req).await;
    };
    let method = req.method().to_string();
    let path = normalize_path_for_metrics(req.uri().path());
    let start = std::time::Instant::now();
    metrics.http_requests_in_flight.inc();
    let response = next.run(req).await;
    metrics.http_requests_in_flight.dec();
    let duration = start.elapsed().as_secs_f64();
    metrics.record_http_request(&method, &path, response.status().as_u16(), duration);
    response
}

#[cfg(not(feature = "metrics"))]
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::normalize_path_for_metrics;

    #[test]
    fn collapses_digest_and_uuid_segments() {
        assert_eq!(
            normalize_path_for_metrics("/v2/acme/app/manifests/sha256:aabb"),
            "/v2/acme/app/manifests/:digest"
        );
        assert_eq!(
            normalize_path_for_metrics(&format!("/api/v1/repositories/{}", uuid::Uuid::nil())),
            "/api/v1/repositories/:id"
        );
    }
}
