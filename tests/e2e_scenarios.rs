#![cfg(feature = "server")]

//! End-to-end HTTP scenarios driving the full router (data path + control
//! plane) through `tower::util::ServiceExt::oneshot`, the same way this
//! registry's own integration tests exercise it.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use sha2::Digest as _;
use tower::util::ServiceExt;

use ociregistry::api::{ApiConfig, ApiServer, AppState};
use ociregistry::catalog::memory::InMemoryCatalog;
use ociregistry::catalog::{Catalog, ScanStatus, VulnerabilityReport};
use ociregistry::config::{Config, LogFormat};
use ociregistry::cost::CostAnalyzer;
use ociregistry::gc::GarbageCollector;
use ociregistry::intelligence::Intelligence;
use ociregistry::policy::PolicyEngine;
use ociregistry::queue::{InMemoryJobQueue, InMemorySessionStore};
use ociregistry::registry::Registry;
use ociregistry::scanner::Scanner;
use ociregistry::storage::InMemoryObjectStore;
use ociregistry::token::TokenMinter;

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

fn test_state_with(mutate: impl FnOnce(&mut Config)) -> AppState {
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

fn test_router(state: AppState) -> Router {
    ApiServer::new(state, ApiConfig::default()).router()
}

fn basic_auth(username: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:anything"));
    format!("Basic {encoded}")
}

async fn send(router: &Router, method: &str, uri: &str, auth_user: Option<&str>, extra: &[(&str, &str)], body: Vec<u8>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = auth_user {
        builder = builder.header("authorization", basic_auth(user));
    }
    for (k, v) in extra {
        builder = builder.header(*k, *v);
    }
    let request = builder.body(Body::from(body)).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, bytes.to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    format!("sha256:{:x}", hasher.finalize())
}

fn manifest_body(config_digest: &str, config_size: u64, layer_digest: &str, layer_size: u64) -> Vec<u8> {
    serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {"digest": config_digest, "size": config_size},
        "layers": [{"digest": layer_digest, "size": layer_size}],
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn s1_push_pull_round_trip_through_the_full_upload_protocol() {
    let router = test_router(test_state_with(|_| {}));

    // Start a resumable upload.
    let (status, headers, _) = send(&router, "POST", "/v2/alice/app/blobs/uploads/", Some("alice"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let upload_id = headers.get("docker-upload-uuid").unwrap().to_str().unwrap().to_string();

    // Four 256 KiB chunks.
    let chunk = vec![0x7au8; 256 * 1024];
    let mut whole = Vec::new();
    for _ in 0..4 {
        let (status, _, _) = send(
            &router,
            "PATCH",
            &format!("/v2/alice/app/blobs/uploads/{upload_id}"),
            Some("alice"),
            &[],
            chunk.clone(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        whole.extend_from_slice(&chunk);
    }
    let layer_digest = sha256_hex(&whole);

    // Finalize without a trailing body (the staged bytes are promoted).
    let (status, headers, _) = send(
        &router,
        "PUT",
        &format!("/v2/alice/app/blobs/uploads/{upload_id}?digest={layer_digest}"),
        Some("alice"),
        &[],
        Vec::new(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers.get("docker-content-digest").unwrap().to_str().unwrap(), layer_digest);

    let config_digest = "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";
    let config_size = 50u64;
    let body = manifest_body(config_digest, config_size, &layer_digest, whole.len() as u64);

    let (status, headers, _) = send(&router, "PUT", "/v2/alice/app/manifests/v1", Some("alice"), &[], body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let manifest_digest = headers.get("docker-content-digest").unwrap().to_str().unwrap().to_string();
    assert_eq!(manifest_digest, sha256_hex(&body));

    let (status, headers, fetched) = send(&router, "GET", "/v2/alice/app/manifests/v1", Some("alice"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, body);
    assert_eq!(headers.get("docker-content-digest").unwrap().to_str().unwrap(), manifest_digest);

    let (status, _, detail) = send(
        &router,
        "GET",
        "/api/v1/repositories/alice/app/manifests/v1",
        Some("alice"),
        &[],
        Vec::new(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let detail: serde_json::Value = serde_json::from_slice(&detail).unwrap();
    assert_eq!(detail["size"].as_u64().unwrap(), config_size + whole.len() as u64);
}

#[tokio::test]
async fn s2_immutable_tag_rejects_a_second_push_to_the_same_reference() {
    let router = test_router(test_state_with(|c| c.enable_immutable_tags = true));
    let body = manifest_body(
        "sha256:dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd",
        1,
        "sha256:1111111111111111111111111111111111111111111111111111111111111a",
        200,
    );

    let (status, _, _) = send(&router, "PUT", "/v2/alice/app/manifests/v1", Some("alice"), &[], body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, error) = send(&router, "PUT", "/v2/alice/app/manifests/v1", Some("alice"), &[], body).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let error: serde_json::Value = serde_json::from_slice(&error).unwrap();
    assert_eq!(error["errors"][0]["code"], "TAG_INVALID");
}

#[tokio::test]
async fn s3_push_over_the_namespace_quota_is_rejected() {
    let router = test_router(test_state_with(|_| {}));
    let body = manifest_body(
        "sha256:dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd",
        1,
        "sha256:2222222222222222222222222222222222222222222222222222222222222b",
        6_000_000_000,
    );

    let (status, _, error) = send(&router, "PUT", "/v2/alice/app/manifests/v1", Some("alice"), &[], body).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let error: serde_json::Value = serde_json::from_slice(&error).unwrap();
    assert_eq!(error["errors"][0]["code"], "DENIED");
}

#[tokio::test]
async fn s4_policy_gate_blocks_a_critical_pull_in_prod_but_allows_it_in_dev() {
    let state = test_state_with(|_| {});
    let router = test_router(state.clone());
    let body = manifest_body(
        "sha256:dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd",
        1,
        "sha256:1111111111111111111111111111111111111111111111111111111111111a",
        200,
    );
    let (status, _, _) = send(&router, "PUT", "/v2/alice/app/manifests/v1", Some("alice"), &[], body).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = send(
        &router,
        "PUT",
        "/api/v1/policy",
        Some("admin"),
        &[],
        serde_json::json!({ "source": "deny critical > 0 in prod" }).to_string().into_bytes(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (repo, _) = state.catalog.get_repository_by_full_name("alice/app").await.unwrap().unwrap();
    let tag = state.catalog.get_tag(repo.id, "v1").await.unwrap().unwrap();
    state
        .catalog
        .insert_scan_report(VulnerabilityReport {
            id: uuid::Uuid::new_v4(),
            manifest_id: tag.manifest_id,
            scanner: "trivy".to_string(),
            scanned_at: chrono::Utc::now(),
            status: ScanStatus::Completed,
            critical_count: 2,
            high_count: 0,
            medium_count: 0,
            low_count: 0,
            report_body: serde_json::json!({}),
        })
        .await
        .unwrap();

    let (status, _, error) = send(
        &router,
        "GET",
        "/v2/alice/app/manifests/v1",
        Some("alice"),
        &[("x-registry-environment", "prod")],
        Vec::new(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let error: serde_json::Value = serde_json::from_slice(&error).unwrap();
    assert_eq!(error["errors"][0]["code"], "DENIED");

    let (status, _, _) = send(
        &router,
        "GET",
        "/v2/alice/app/manifests/v1",
        Some("alice"),
        &[("x-registry-environment", "dev")],
        Vec::new(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn s5_gc_removes_an_untagged_manifest_then_its_now_orphaned_blobs() {
    let router = test_router(test_state_with(|_| {}));
    let l1 = "sha256:1111111111111111111111111111111111111111111111111111111111111a";
    let l2 = "sha256:3333333333333333333333333333333333333333333333333333333333333c";
    let config_digest = "sha256:dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd";

    // M1 tagged t1, references both layers.
    let m1 = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {"digest": config_digest, "size": 1},
        "layers": [{"digest": l1, "size": 100}, {"digest": l2, "size": 150}],
    })
    .to_string()
    .into_bytes();
    let (status, _, _) = send(&router, "PUT", "/v2/alice/app/manifests/t1", Some("alice"), &[], m1).await;
    assert_eq!(status, StatusCode::CREATED);

    // M2 tagged t2, references only l1.
    let m2 = manifest_body(config_digest, 1, l1, 100);
    let (status, headers, _) = send(&router, "PUT", "/v2/alice/app/manifests/t2", Some("alice"), &[], m2).await;
    assert_eq!(status, StatusCode::CREATED);
    let m2_digest = headers.get("docker-content-digest").unwrap().to_str().unwrap().to_string();

    // Drop t2 and its manifest; l1/l2 are still reachable through M1.
    let (status, _, _) = send(&router, "DELETE", "/api/v1/repositories/alice/app/tags/t2", Some("alice"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(
        &router,
        "DELETE",
        &format!("/api/v1/repositories/alice/app/manifests/{m2_digest}"),
        Some("alice"),
        &[],
        Vec::new(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, result) = send(&router, "POST", "/api/v1/system/gc?dryRun=false", Some("admin"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    let result: serde_json::Value = serde_json::from_slice(&result).unwrap();
    assert_eq!(result["manifests_deleted"], 0);
    assert_eq!(result["blobs_deleted"], 0);

    let (status, _, _) = send(&router, "GET", &format!("/v2/alice/app/blobs/{l1}"), Some("alice"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&router, "GET", &format!("/v2/alice/app/blobs/{l2}"), Some("alice"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);

    // Drop M1 by its tag reference; deleting a manifest cascades its tag
    // row, so l1 and l2 are now unreachable from anywhere.
    let (status, _, _) = send(
        &router,
        "DELETE",
        "/api/v1/repositories/alice/app/manifests/t1",
        Some("alice"),
        &[],
        Vec::new(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, result) = send(&router, "POST", "/api/v1/system/gc?dryRun=false", Some("admin"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    let result: serde_json::Value = serde_json::from_slice(&result).unwrap();
    assert_eq!(result["manifests_deleted"], 1);
    assert_eq!(result["blobs_deleted"], 2);

    let (status, _, _) = send(&router, "GET", &format!("/v2/alice/app/blobs/{l1}"), Some("alice"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&router, "GET", &format!("/v2/alice/app/blobs/{l2}"), Some("alice"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn anonymous_requests_are_turned_away_with_a_bearer_challenge() {
    let router = test_router(test_state_with(|_| {}));
    let (status, headers, _) = send(&router, "GET", "/v2/alice/app/manifests/v1", None, &[], Vec::new()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.get("www-authenticate").unwrap().to_str().unwrap().starts_with("Bearer"));
}

#[tokio::test]
async fn a_principal_cannot_push_into_another_users_namespace() {
    let router = test_router(test_state_with(|_| {}));
    let body = manifest_body(
        "sha256:dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd",
        1,
        "sha256:1111111111111111111111111111111111111111111111111111111111111a",
        200,
    );
    let (status, _, _) = send(&router, "PUT", "/v2/bob/app/manifests/v1", Some("alice"), &[], body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn a_principal_cannot_manage_another_users_repository_through_the_control_plane() {
    let router = test_router(test_state_with(|_| {}));

    let create_body = serde_json::json!({ "namespace": "bob", "name": "app" }).to_string().into_bytes();
    let (status, _, _) = send(&router, "POST", "/api/v1/repositories", Some("bob"), &[], create_body).await;
    assert_eq!(status, StatusCode::CREATED);

    // alice creating a repository under bob's namespace is rejected outright.
    let create_body = serde_json::json!({ "namespace": "bob", "name": "other" }).to_string().into_bytes();
    let (status, _, _) = send(&router, "POST", "/api/v1/repositories", Some("alice"), &[], create_body).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // alice cannot delete, retag, or trigger a scan on bob's repository either.
    let (status, _, _) =
        send(&router, "DELETE", "/api/v1/repositories/bob/app/tags/v1", Some("alice"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send(
        &router,
        "POST",
        "/api/v1/repositories/bob/app/manifests/v1/scan/trigger",
        Some("alice"),
        &[],
        Vec::new(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send(&router, "DELETE", "/api/v1/repositories/bob/app", Some("alice"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // bob himself still can.
    let (status, _, _) = send(&router, "DELETE", "/api/v1/repositories/bob/app", Some("bob"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
