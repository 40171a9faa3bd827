//! HTTP surface: the OCI Distribution data path and the control-plane API
//! described in spec §6, built on axum the way the teacher's server crate
//! is.

pub mod auth;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod types;

#[cfg(test)]
pub mod test_support;

pub use server::{ApiConfig, ApiServer};
pub use state::AppState;
