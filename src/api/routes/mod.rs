pub mod costs;
pub mod dependencies;
pub mod health;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod oci;
pub mod repositories;
mod scans;
pub mod system;
pub mod token;
pub mod vulnerabilities;

use axum::middleware;
use axum::Router;

use crate::api::middleware::require_auth_middleware;
use crate::api::state::AppState;

/// Assembles the full router: `/v2/*` (OCI data path, token-auth only, no
/// blanket `require_auth`), `/auth/token`, and `/api/v1/*` (control plane,
/// auth required).
pub fn api_router(state: AppState) -> Router {
    let control_plane = Router::new()
        .merge(repositories::routes())
        .merge(system::routes())
        .merge(costs::routes())
        .merge(vulnerabilities::routes())
        .merge(dependencies::routes())
        .layer(middleware::from_fn(require_auth_middleware));

    let mut router = Router::new()
        .merge(oci::routes())
        .nest("/api/v1", control_plane)
        .merge(token::routes())
        .merge(health::routes());

    #[cfg(feature = "metrics")]
    {
        router = router.merge(metrics::routes());
    }

    router.with_state(state)
}
