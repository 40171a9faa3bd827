//! Dependency graph control-plane route (spec §6): `GET
//! /api/v1/dependencies` resolves the catalog's [`DependencyGraph`] into the
//! `{nodes, edges}` shape graph-visualization clients expect.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};

use crate::api::middleware::AuthContext;
use crate::api::state::AppState;
use crate::api::types::{
    ApiError, DependenciesQuery, DependenciesResponse, DependencyEdgeResponse, DependencyNodeResponse,
};
use crate::error::RegistryError;

pub fn routes() -> Router<AppState> {
    Router::new().route("/dependencies", get(dependencies))
}

async fn dependencies(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<DependenciesQuery>,
) -> Response {
    let Some(principal) = auth.principal else {
        return (
            StatusCode::from_u16(RegistryError::Unauthorized.status_code())
                .unwrap_or(StatusCode::UNAUTHORIZED),
            Json(ApiError::from(&RegistryError::Unauthorized)),
        )
            .into_response();
    };
    let graph = match state.catalog.dependency_graph(query.repository.as_deref(), &principal).await {
        Ok(graph) => graph,
        Err(e) => {
            return (
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                Json(ApiError::from(&e)),
            )
                .into_response()
        }
    };

    let nodes = graph
        .nodes
        .into_iter()
        .map(|n| DependencyNodeResponse {
            id: n.manifest_id,
            kind: "manifest",
            name: n.repository_name,
            tag: n.tag,
            digest: n.digest,
        })
        .collect();
    let edges = graph
        .edges
        .into_iter()
        .map(|e| DependencyEdgeResponse {
            source: e.source,
            target: e.target,
            label: "bases-on",
        })
        .collect();

    Json(DependenciesResponse { nodes, edges }).into_response()
}
