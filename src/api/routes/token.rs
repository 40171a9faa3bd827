//! Token endpoint (spec component 11 / §6): `GET /auth/token`, basic-auth,
//! mints a bearer scoped to the requested `repository:<name>:<actions>`.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::auth::principal_from_basic;
use crate::api::state::AppState;
use crate::api::types::{error_codes, ApiError, TokenHttpResponse, TokenRequestQuery};
use crate::token::ScopeRequest;

pub fn routes() -> Router<AppState> {
    Router::new().route("/auth/token", get(issue_token))
}

async fn issue_token(
    State(state): State<AppState>,
    Query(query): Query<TokenRequestQuery>,
    headers: HeaderMap,
) -> Response {
    let principal = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(principal_from_basic);

    let scopes: Vec<ScopeRequest> = query
        .scope
        .as_deref()
        .unwrap_or("")
        .split(' ')
        .filter(|s| !s.is_empty())
        .filter_map(ScopeRequest::parse)
        .collect();

    match state.tokens.mint(principal.as_ref(), &scopes) {
        Ok(minted) => {
            let issued_at = chrono::Utc::now().to_rfc3339();
            Json(TokenHttpResponse {
                token: minted.token.clone(),
                access_token: minted.token,
                expires_in: minted.expires_in,
                issued_at,
            })
            .into_response()
        }
        Err(e) => (
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(ApiError::new(error_codes::INTERNAL_ERROR, e.to_string())),
        )
            .into_response(),
    }
}
