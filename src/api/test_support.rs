//! In-memory `AppState` builder for route-level tests.

use std::sync::Arc;

use crate::api::state::AppState;
use crate::catalog::memory::InMemoryCatalog;
use crate::catalog::Catalog;
use crate::config::{Config, LogFormat};
use crate::cost::CostAnalyzer;
use crate::gc::GarbageCollector;
use crate::intelligence::Intelligence;
use crate::policy::PolicyEngine;
use crate::queue::{InMemoryJobQueue, InMemorySessionStore};
use crate::registry::Registry;
use crate::scanner::Scanner;
use crate::storage::InMemoryObjectStore;
use crate::token::TokenMinter;

fn test_config() -> Config {
    Config {
        server_port: "registry.local:5000".to_string(),
        database_url: None,
        redis_addr: None,
        s3_bucket: None,
        minio_endpoint: None,
        minio_root_user: None,
        minio_root_password: None,
        minio_secure: false,
        enable_immutable_tags: false,
        policy_environment: "dev".to_string(),
        webhook_url: None,
        jwt_secret: "test-secret".to_string(),
        smtp_host: None,
        smtp_port: None,
        smtp_user: None,
        smtp_pass: None,
        smtp_from: None,
        enable_cost_intelligence: true,
        storage_cost_per_gb_month: 0.023,
        bandwidth_cost_per_gb: 0.09,
        log_format: LogFormat::Text,
    }
}

pub fn test_state() -> AppState {
    test_state_with(|_| {})
}

/// Same as [`test_state`], but lets the caller tweak the config before the
/// rest of the app is wired up from it — e.g. to flip on
/// `enable_immutable_tags` for a test that needs it.
pub fn test_state_with(mutate: impl FnOnce(&mut Config)) -> AppState {
    let mut config = test_config();
    mutate(&mut config);
    let config = Arc::new(config);
    let storage = Arc::new(InMemoryObjectStore::new());
    let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
    let policy = Arc::new(PolicyEngine::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let sessions = Arc::new(InMemorySessionStore::new());

    let registry = Arc::new(Registry::new(
        storage.clone(),
        catalog.clone(),
        policy.clone(),
        queue.clone(),
        config.webhook_url.clone(),
        config.enable_immutable_tags,
    ));
    let scanner = Arc::new(Scanner::new(catalog.clone(), config.server_port.clone(), "trivy".to_string()));
    let intelligence = Arc::new(Intelligence::new(catalog.clone(), "https://epss.example/scores"));
    let cost = Arc::new(CostAnalyzer::new(
        catalog.clone(),
        config.storage_cost_per_gb_month,
        config.bandwidth_cost_per_gb,
    ));
    let gc = Arc::new(GarbageCollector::new(storage, catalog.clone()));
    let tokens = Arc::new(TokenMinter::new(config.jwt_secret.clone().into_bytes()));

    AppState::new(registry, catalog, policy, scanner, intelligence, cost, gc, tokens, sessions, config)
}
