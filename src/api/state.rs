//! Shared application state threaded through every route handler, and the
//! sliding-window rate limiter used by `middleware::rate_limit_middleware`.
//!
//! Grounded on `AppState`/`RateLimiterState` in the crate this registry's
//! API layer is adapted from; the backends held here are this registry's
//! own (`Registry`, `Catalog`, `PolicyEngine`, ...) rather than the
//! teacher's package-store/search/contribution set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::cost::CostAnalyzer;
use crate::gc::GarbageCollector;
use crate::intelligence::Intelligence;
use crate::policy::PolicyEngine;
use crate::queue::SessionStore;
use crate::registry::Registry;
use crate::scanner::Scanner;
use crate::token::TokenMinter;

#[cfg(feature = "metrics")]
use crate::metrics::RegistryMetrics;

/// Request-scoped knobs, separate from the heavier service handles so that
/// `ApiConfig` can build a default without constructing any of them.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_body_size: usize,
    pub rate_limit_rpm: u32,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_body_size: 1024 * 1024 * 1024, // blobs can legitimately be large
            rate_limit_rpm: 600,
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RequestCount {
    count: u32,
    window_start: Instant,
}

pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

/// A fixed-window limiter keyed by client identity. Resets the window once
/// it has fully elapsed rather than decaying continuously.
pub struct RateLimiterState {
    requests: RwLock<HashMap<String, RequestCount>>,
    rpm: u32,
}

impl RateLimiterState {
    pub fn new(rpm: u32) -> Self {
        RateLimiterState {
            requests: RwLock::new(HashMap::new()),
            rpm,
        }
    }

    pub async fn check_and_increment(&self, key: &str) -> RateLimitResult {
        let window = Duration::from_secs(60);
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        let entry = requests.entry(key.to_string()).or_insert(RequestCount {
            count: 0,
            window_start: now,
        });
        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }
        if entry.count >= self.rpm {
            let retry_after_secs = window
                .saturating_sub(now.duration_since(entry.window_start))
                .as_secs()
                .max(1);
            return RateLimitResult::Limited { retry_after_secs };
        }
        entry.count += 1;
        RateLimitResult::Allowed {
            remaining: self.rpm - entry.count,
        }
    }

    /// Drops windows untouched for a while, so the map does not grow
    /// unbounded under a changing population of clients.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        self.requests
            .write()
            .await
            .retain(|_, entry| now.duration_since(entry.window_start) < Duration::from_secs(300));
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub catalog: Arc<dyn Catalog>,
    pub policy: Arc<PolicyEngine>,
    pub scanner: Arc<Scanner>,
    pub intelligence: Arc<Intelligence>,
    pub cost: Arc<CostAnalyzer>,
    pub gc: Arc<GarbageCollector>,
    pub tokens: Arc<TokenMinter>,
    pub sessions: Arc<dyn SessionStore>,
    pub config: Arc<Config>,
    pub server_config: Arc<ServerConfig>,
    pub rate_limiter: Arc<RateLimiterState>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<Arc<RegistryMetrics>>,
}

#[allow(clippy::too_many_arguments)]
impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        catalog: Arc<dyn Catalog>,
        policy: Arc<PolicyEngine>,
        scanner: Arc<Scanner>,
        intelligence: Arc<Intelligence>,
        cost: Arc<CostAnalyzer>,
        gc: Arc<GarbageCollector>,
        tokens: Arc<TokenMinter>,
        sessions: Arc<dyn SessionStore>,
        config: Arc<Config>,
    ) -> Self {
        let server_config = ServerConfig::default();
        let rate_limiter = Arc::new(RateLimiterState::new(server_config.rate_limit_rpm));
        AppState {
            registry,
            catalog,
            policy,
            scanner,
            intelligence,
            cost,
            gc,
            tokens,
            sessions,
            config,
            server_config: Arc::new(server_config),
            rate_limiter,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<RegistryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_server_config(mut self, server_config: ServerConfig) -> Self {
        self.rate_limiter = Arc::new(RateLimiterState::new(server_config.rate_limit_rpm));
        self.server_config = Arc::new(server_config);
        self
    }
}
