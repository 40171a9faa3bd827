//! Router assembly and process entrypoint for the HTTP surface. Middleware
//! layering order matches the crate this API layer is adapted from: axum
//! applies `.layer()` in reverse, so the last call here runs first on an
//! incoming request. Net effect: request-id runs first, then auth-context,
//! then rate-limit, then CORS, then error-handling wraps everything;
//! metrics/tracing sit innermost, and the body-size limit is applied last
//! of all so oversized bodies are rejected before any other middleware
//! runs.

use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use super::routes;
use super::state::AppState;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            bind_addr: "0.0.0.0:5000".parse().unwrap(),
        }
    }
}

impl ApiConfig {
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
    router: Router,
}

impl ApiServer {
    pub fn new(state: AppState, config: ApiConfig) -> Self {
        let router = build_router(&state);
        ApiServer { config, state, router }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn run(self) -> crate::error::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(crate::error::RegistryError::Io)?;
        tracing::info!(addr = %self.config.bind_addr, "registry listening");
        axum::serve(listener, self.router)
            .await
            .map_err(|e| crate::error::RegistryError::Fatal(format!("server: {e}")))
    }

    pub async fn run_until<F>(self, shutdown_signal: F) -> crate::error::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(crate::error::RegistryError::Io)?;
        tracing::info!(addr = %self.config.bind_addr, "registry listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| crate::error::RegistryError::Fatal(format!("server: {e}")))
    }
}

pub fn build_router(state: &AppState) -> Router {
    let max_body_size = state.server_config.max_body_size;

    let router = routes::api_router(state.clone())
        .layer(middleware::from_fn(super::middleware::error_handler_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), super::middleware::cors_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), super::middleware::rate_limit_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), super::middleware::auth_context_middleware))
        .layer(middleware::from_fn(super::middleware::request_id_middleware));

    #[cfg(feature = "metrics")]
    let router = router.layer(middleware::from_fn_with_state(state.clone(), super::middleware::metrics_middleware));
    #[cfg(not(feature = "metrics"))]
    let router = router.layer(middleware::from_fn(super::middleware::metrics_middleware));

    router
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(DefaultBodyLimit::disable())
}
