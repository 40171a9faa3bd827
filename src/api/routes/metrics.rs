use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::api::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    match &state.metrics {
        Some(metrics) => metrics.encode().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR),
        None => Ok(String::new()),
    }
}
