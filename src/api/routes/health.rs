use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::api::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/", get(root))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn root() -> &'static str {
    "ociregistry"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn health_returns_200() {
        let router = routes().with_state(crate::api::test_support::test_state());
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
