//! Cost Analyzer (spec component 8): storage/bandwidth cost derivation,
//! zombie-image detection, and the tenant-scoped cost dashboard.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::{Catalog, Principal, StorageCost, ZombieAction, ZombieImage};
use crate::error::Result;

const MIN_ZOMBIE_DAYS_THRESHOLD: i64 = 30;

pub struct CostAnalyzer {
    catalog: Arc<dyn Catalog>,
    storage_cost_per_gb_month: f64,
    bandwidth_cost_per_gb: f64,
}

impl CostAnalyzer {
    pub fn new(catalog: Arc<dyn Catalog>, storage_cost_per_gb_month: f64, bandwidth_cost_per_gb: f64) -> Self {
        CostAnalyzer {
            catalog,
            storage_cost_per_gb_month,
            bandwidth_cost_per_gb,
        }
    }

    /// Recomputes and upserts a `StorageCost` row for every manifest.
    pub async fn refresh_all_costs(&self) -> Result<usize> {
        let manifests = self.catalog.list_all_manifests().await?;
        let mut updated = 0;
        for manifest in manifests {
            let size_gb = manifest.size as f64 / 1e9;
            let storage_cost_usd = size_gb * self.storage_cost_per_gb_month;
            let bandwidth_cost_usd = size_gb * manifest.pull_count as f64 * self.bandwidth_cost_per_gb;
            let total_cost_usd = storage_cost_usd + bandwidth_cost_usd;
            let cost_per_pull = if manifest.pull_count > 0 {
                total_cost_usd / manifest.pull_count as f64
            } else {
                total_cost_usd
            };
            self.catalog
                .upsert_storage_cost(StorageCost {
                    manifest_id: manifest.id,
                    blob_size_bytes: manifest.size,
                    storage_cost_usd,
                    bandwidth_cost_usd,
                    total_cost_usd,
                    pull_count_30d: manifest.pull_count,
                    last_pulled_at: manifest.last_pulled_at,
                    cost_per_pull,
                    calculated_at: Utc::now(),
                })
                .await?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Manifests not pulled in `days_threshold` days, scoped to `principal`'s
    /// repositories (or global for admins). Each detected zombie is upserted.
    pub async fn detect_zombie_images(&self, days_threshold: i64, principal: &Principal) -> Result<Vec<ZombieImage>> {
        let repos = self.catalog.list_repositories_for_principal(principal).await?;
        let repo_ids: std::collections::HashSet<Uuid> = repos.iter().map(|(r, _)| r.id).collect();
        let manifests = self.catalog.list_all_manifests().await?;
        let costs_by_manifest: std::collections::HashMap<Uuid, StorageCost> = self
            .catalog
            .list_costs_for_principal(principal)
            .await?
            .into_iter()
            .map(|c| (c.manifest_id, c))
            .collect();

        let now = Utc::now();
        let mut zombies = Vec::new();
        for manifest in manifests {
            if !principal.is_admin() && !repo_ids.contains(&manifest.repository_id) {
                continue;
            }
            let reference_time = manifest.last_pulled_at.unwrap_or(manifest.created_at);
            let days_since_last_pull = (now - reference_time).num_days();
            if days_since_last_pull < days_threshold {
                continue;
            }
            let storage_cost_usd = costs_by_manifest
                .get(&manifest.id)
                .map(|c| c.storage_cost_usd)
                .unwrap_or(0.0);
            let recommended_action = if days_since_last_pull > 180 {
                ZombieAction::Delete
            } else if days_since_last_pull > 120 {
                ZombieAction::Archive
            } else {
                ZombieAction::Monitor
            };
            let zombie = ZombieImage {
                manifest_id: manifest.id,
                days_since_last_pull,
                storage_cost_usd,
                recommended_action,
                detected_at: now,
            };
            self.catalog.upsert_zombie(zombie.clone()).await?;
            zombies.push(zombie);
        }
        Ok(zombies)
    }

    /// Deletes zombie manifests older than the (clamped) threshold. Clamps
    /// `days_threshold` to a minimum of 30 to prevent accidental mass
    /// deletion. `dry_run=true` reports the count without mutating.
    pub async fn cleanup_zombies(&self, days_threshold: i64, dry_run: bool, principal: &Principal) -> Result<usize> {
        let days_threshold = days_threshold.max(MIN_ZOMBIE_DAYS_THRESHOLD);
        let zombies = self.detect_zombie_images(days_threshold, principal).await?;
        if dry_run {
            return Ok(zombies.len());
        }
        for zombie in &zombies {
            self.catalog.delete_manifest(zombie.manifest_id).await?;
        }
        Ok(zombies.len())
    }

    pub async fn get_dashboard(&self, principal: &Principal) -> Result<CostDashboard> {
        let costs = self.catalog.list_costs_for_principal(principal).await?;
        let total_storage_cost_usd: f64 = costs.iter().map(|c| c.storage_cost_usd).sum();
        let total_bandwidth_cost_usd: f64 = costs.iter().map(|c| c.bandwidth_cost_usd).sum();
        let total_cost_usd: f64 = costs.iter().map(|c| c.total_cost_usd).sum();
        let top_manifests = costs.into_iter().take(10).collect();
        Ok(CostDashboard {
            total_storage_cost_usd,
            total_bandwidth_cost_usd,
            total_cost_usd,
            top_manifests,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CostDashboard {
    pub total_storage_cost_usd: f64,
    pub total_bandwidth_cost_usd: f64,
    pub total_cost_usd: f64,
    /// Top 10 most expensive manifests, ordered by `total_cost_usd DESC`
    /// (the catalog already returns costs in that order).
    pub top_manifests: Vec<StorageCost>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::InMemoryCatalog;
    use crate::catalog::{NamespaceType, Role};

    async fn seed_manifest(catalog: &Arc<dyn Catalog>, owner: Uuid, size: u64, pull_count: u64) -> Uuid {
        let ns = catalog
            .get_or_create_namespace("acme", Some(owner), NamespaceType::User)
            .await
            .unwrap();
        let repo = catalog
            .get_or_create_repository(ns.id, "app", owner)
            .await
            .unwrap();
        let manifest = catalog
            .upsert_manifest(repo.id, "sha256:aaaa", None, "application/vnd.oci.image.manifest.v1+json", size)
            .await
            .unwrap();
        for _ in 0..pull_count {
            catalog.increment_pull(manifest.id).await.unwrap();
        }
        manifest.id
    }

    #[tokio::test]
    async fn refresh_all_costs_computes_storage_and_bandwidth() {
        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let owner = Uuid::new_v4();
        seed_manifest(&catalog, owner, 1_000_000_000, 10).await;
        let analyzer = CostAnalyzer::new(catalog.clone(), 0.023, 0.09);
        let updated = analyzer.refresh_all_costs().await.unwrap();
        assert_eq!(updated, 1);

        let principal = Principal { id: owner, username: "alice".into(), role: Role::User };
        let dashboard = analyzer.get_dashboard(&principal).await.unwrap();
        assert!((dashboard.total_storage_cost_usd - 0.023).abs() < 1e-9);
        assert!((dashboard.total_bandwidth_cost_usd - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cleanup_zombies_clamps_threshold_and_respects_dry_run() {
        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let owner = Uuid::new_v4();
        let manifest_id = seed_manifest(&catalog, owner, 1_000, 0).await;
        // backdate creation by editing pull timestamps is not exposed; rely on
        // threshold clamp behavior alone here.
        let analyzer = CostAnalyzer::new(catalog.clone(), 0.023, 0.09);
        let principal = Principal { id: owner, username: "alice".into(), role: Role::User };
        let deleted_dry = analyzer.cleanup_zombies(1, true, &principal).await.unwrap();
        assert_eq!(deleted_dry, 0); // freshly created, not yet a zombie at any clamped threshold
        let _ = manifest_id;
    }
}
