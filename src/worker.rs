//! Worker Supervisor (spec component 10): the scan-consumer loop and the
//! daily EPSS-refresher loop. Both are cancellable and neither terminates on
//! a per-item error — failures are logged and the loop continues.

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{Catalog, HealthScore};
use crate::health;
use crate::intelligence::Intelligence;
use crate::queue::{Cancellation, JobQueue};
use crate::scanner::Scanner;

const DEQUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(5);
const EPSS_WARMUP_DELAY: Duration = Duration::from_secs(60 * 60);
const EPSS_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// `Dequeue -> ScanManifest -> CalculateManifestPriorities ->
/// CalculateAndStoreHealthScore`, looping until cancelled.
pub async fn run_scan_consumer(
    queue: Arc<dyn JobQueue>,
    catalog: Arc<dyn Catalog>,
    scanner: Arc<Scanner>,
    intelligence: Arc<Intelligence>,
    cancel: Cancellation,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let job = match queue.dequeue(&cancel).await {
            Ok(Some(job)) => job,
            Ok(None) => return, // cancelled mid-dequeue
            Err(e) => {
                tracing::warn!(error = %e, "scan queue dequeue failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(DEQUEUE_ERROR_BACKOFF) => continue,
                    _ = cancel.cancelled() => return,
                }
            }
        };

        if let Err(e) = scanner.scan_manifest(job.manifest_id, &job.repository, &job.reference).await {
            tracing::warn!(error = %e, manifest_id = %job.manifest_id, "scan failed");
            continue;
        }
        if let Err(e) = intelligence.calculate_manifest_priorities(job.manifest_id).await {
            tracing::warn!(error = %e, manifest_id = %job.manifest_id, "priority calculation failed");
        }
        if let Err(e) = calculate_and_store_health(&catalog, &scanner, job.manifest_id).await {
            tracing::warn!(error = %e, manifest_id = %job.manifest_id, "health calculation failed");
        }
    }
}

/// Gathers the metrics `health::calculate` needs from the catalog and
/// persists the result. `days_since_last_push` has no dedicated timestamp in
/// the catalog, so `created_at` stands in for it (a manifest row is only
/// ever created by a push).
async fn calculate_and_store_health(
    catalog: &Arc<dyn Catalog>,
    scanner: &Scanner,
    manifest_id: uuid::Uuid,
) -> crate::error::Result<()> {
    let manifest = match catalog.get_manifest(manifest_id).await? {
        Some(m) => m,
        None => return Ok(()), // deleted since being enqueued; nothing to score
    };
    let counts = scanner.get_vulnerability_summary(manifest_id).await?;
    let severity = health::SeverityCounts {
        critical: counts.critical,
        high: counts.high,
        medium: counts.medium,
        low: counts.low,
    };

    let siblings = catalog.list_all_manifests().await?;
    let repo_sizes: Vec<u64> = siblings
        .iter()
        .filter(|m| m.repository_id == manifest.repository_id && m.id != manifest.id)
        .map(|m| m.size)
        .collect();
    let avg_size_in_repo = if repo_sizes.is_empty() {
        None
    } else {
        Some(repo_sizes.iter().sum::<u64>() as f64 / repo_sizes.len() as f64)
    };

    let now = chrono::Utc::now();
    let days_since_created = (now - manifest.created_at).num_days();

    let result = health::calculate(
        health::HealthInputs {
            vulnerabilities: severity,
            days_since_created,
            days_since_last_push: days_since_created,
            size: manifest.size,
            avg_size_in_repo,
            pull_count: manifest.pull_count,
        },
        Some(manifest.health.overall),
    );

    catalog
        .update_manifest_health(
            manifest_id,
            HealthScore {
                overall: result.overall,
                grade: Some(result.grade),
                security: result.security,
                freshness: result.freshness,
                efficiency: result.efficiency,
                maintenance: result.maintenance,
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    use crate::catalog::memory::InMemoryCatalog;
    use crate::catalog::{NamespaceType, ScanStatus};
    use crate::queue::{InMemoryJobQueue, ScanJob};

    /// A throwaway shell script standing in for the external scanner
    /// process: ignores its argument, always reports one critical and one
    /// high finding.
    fn fake_scanner_script() -> tempfile::TempPath {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "#!/bin/sh\necho '{{\"vulnerabilities\":[{{\"cve_id\":\"CVE-2024-1111\",\"severity\":\"critical\"}},{{\"cve_id\":\"CVE-2024-2222\",\"severity\":\"high\"}}]}}'"
        )
        .unwrap();
        let path = file.into_temp_path();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn scan_consumer_drains_a_job_and_records_health() {
        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let owner = uuid::Uuid::new_v4();
        let ns = catalog.get_or_create_namespace("acme", Some(owner), NamespaceType::User).await.unwrap();
        let repo = catalog.get_or_create_repository(ns.id, "app", owner).await.unwrap();
        let manifest = catalog
            .upsert_manifest(repo.id, "sha256:mmmm", None, "application/vnd.oci.image.manifest.v1+json", 500)
            .await
            .unwrap();

        let script = fake_scanner_script();
        let scanner = Arc::new(Scanner::new(
            catalog.clone(),
            "registry.local:5000".to_string(),
            script.to_string_lossy().to_string(),
        ));
        let intelligence = Arc::new(Intelligence::new(catalog.clone(), "https://epss.example/scores"));
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        queue
            .enqueue(ScanJob {
                manifest_id: manifest.id,
                repository: "acme/app".to_string(),
                reference: "sha256:mmmm".to_string(),
            })
            .await
            .unwrap();

        let cancel = Cancellation::new();
        let consumer = tokio::spawn(run_scan_consumer(
            queue,
            catalog.clone(),
            scanner.clone(),
            intelligence,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        consumer.await.unwrap();

        let (status, _) = scanner.get_scan_status(manifest.id).await.unwrap().unwrap();
        assert_eq!(status, ScanStatus::Completed);

        let report = scanner.get_scan_report(manifest.id).await.unwrap().unwrap();
        assert_eq!(report.critical_count, 1);
        assert_eq!(report.high_count, 1);

        let updated = catalog.get_manifest(manifest.id).await.unwrap().unwrap();
        assert!(updated.health.grade.is_some());
    }
}

/// Sleeps 1 h after boot, then refreshes EPSS data every 24 h. Cancellable.
pub async fn run_epss_refresher(intelligence: Arc<Intelligence>, cancel: Cancellation) {
    tokio::select! {
        _ = tokio::time::sleep(EPSS_WARMUP_DELAY) => {}
        _ = cancel.cancelled() => return,
    }
    loop {
        if cancel.is_cancelled() {
            return;
        }
        if let Err(e) = intelligence.refresh_epss_data().await {
            tracing::warn!(error = %e, "EPSS refresh failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(EPSS_REFRESH_INTERVAL) => {}
            _ = cancel.cancelled() => return,
        }
    }
}
