//! In-process `Catalog` implementation backed by `HashMap`s under a single
//! `RwLock`. Used for tests, local development, and as the reference
//! semantics the `postgres` backend must match.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::*;
use crate::error::{RegistryError, Result};

#[derive(Default)]
struct State {
    namespaces: HashMap<Uuid, Namespace>,
    namespace_by_name: HashMap<String, Uuid>,
    repositories: HashMap<Uuid, Repository>,
    repo_by_full_name: HashMap<String, Uuid>,
    blobs: HashMap<String, Blob>,
    manifests: HashMap<Uuid, Manifest>,
    manifest_by_repo_digest: HashMap<(Uuid, String), Uuid>,
    layers: HashMap<Uuid, Vec<ManifestLayer>>,
    tags: HashMap<Uuid, HashMap<String, Tag>>,
    dependencies: HashMap<Uuid, Uuid>,
    parents: HashSet<Uuid>,
    scan_reports: HashMap<Uuid, Vec<VulnerabilityReport>>,
    vuln_intel: HashMap<String, VulnerabilityIntelligence>,
    priorities: HashMap<Uuid, Vec<ManifestVulnPriority>>,
    storage_costs: HashMap<Uuid, StorageCost>,
    zombies: HashMap<Uuid, ZombieImage>,
    audit_events: Vec<AuditEvent>,
    service_accounts: HashMap<Uuid, ServiceAccount>,
    service_account_by_prefix: HashMap<String, Uuid>,
}

pub struct InMemoryCatalog {
    state: Arc<RwLock<State>>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        InMemoryCatalog {
            state: Arc::new(RwLock::new(State::default())),
        }
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn full_name_key(namespace: &str, repo: &str) -> String {
    format!("{}/{}", namespace.to_lowercase(), repo.to_lowercase())
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_or_create_namespace(
        &self,
        name: &str,
        owner_principal_id: Option<Uuid>,
        kind: NamespaceType,
    ) -> Result<Namespace> {
        let mut state = self.state.write().await;
        if let Some(id) = state.namespace_by_name.get(name) {
            return Ok(state.namespaces.get(id).unwrap().clone());
        }
        let ns = Namespace {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner_principal_id,
            kind,
            quota_bytes: DEFAULT_QUOTA_BYTES,
        };
        state.namespace_by_name.insert(name.to_string(), ns.id);
        state.namespaces.insert(ns.id, ns.clone());
        Ok(ns)
    }

    async fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>> {
        let state = self.state.read().await;
        Ok(state
            .namespace_by_name
            .get(name)
            .and_then(|id| state.namespaces.get(id))
            .cloned())
    }

    async fn get_namespace(&self, id: Uuid) -> Result<Option<Namespace>> {
        Ok(self.state.read().await.namespaces.get(&id).cloned())
    }

    async fn set_namespace_quota(&self, id: Uuid, quota_bytes: u64) -> Result<()> {
        let mut state = self.state.write().await;
        let ns = state
            .namespaces
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("namespace {id}")))?;
        ns.quota_bytes = quota_bytes;
        Ok(())
    }

    async fn get_or_create_repository(
        &self,
        namespace_id: Uuid,
        name: &str,
        owner_principal_id: Uuid,
    ) -> Result<Repository> {
        let mut state = self.state.write().await;
        let ns_name = state
            .namespaces
            .get(&namespace_id)
            .map(|n| n.name.clone())
            .ok_or_else(|| RegistryError::NotFound(format!("namespace {namespace_id}")))?;
        let key = full_name_key(&ns_name, name);
        if let Some(id) = state.repo_by_full_name.get(&key) {
            return Ok(state.repositories.get(id).unwrap().clone());
        }
        let repo = Repository {
            id: Uuid::new_v4(),
            namespace_id,
            name: name.to_string(),
            owner_principal_id,
        };
        state.repo_by_full_name.insert(key, repo.id);
        state.repositories.insert(repo.id, repo.clone());
        Ok(repo)
    }

    async fn get_repository_by_full_name(
        &self,
        full_name: &str,
    ) -> Result<Option<(Repository, Namespace)>> {
        let (ns_name, repo_name) = match full_name.split_once('/') {
            Some(pair) => pair,
            None => return Ok(None),
        };
        let state = self.state.read().await;
        let key = full_name_key(ns_name, repo_name);
        let repo = match state.repo_by_full_name.get(&key).and_then(|id| state.repositories.get(id)) {
            Some(r) => r.clone(),
            None => return Ok(None),
        };
        let ns = state.namespaces.get(&repo.namespace_id).cloned();
        Ok(ns.map(|n| (repo, n)))
    }

    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>> {
        Ok(self.state.read().await.repositories.get(&id).cloned())
    }

    async fn list_repositories_for_principal(
        &self,
        principal: &Principal,
    ) -> Result<Vec<(Repository, Namespace)>> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        for repo in state.repositories.values() {
            if !principal.is_admin() && repo.owner_principal_id != principal.id {
                continue;
            }
            if let Some(ns) = state.namespaces.get(&repo.namespace_id) {
                out.push((repo.clone(), ns.clone()));
            }
        }
        Ok(out)
    }

    async fn delete_repository(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(repo) = state.repositories.remove(&id) {
            if let Some(ns) = state.namespaces.get(&repo.namespace_id) {
                let key = full_name_key(&ns.name, &repo.name);
                state.repo_by_full_name.remove(&key);
            }
        }
        Ok(())
    }

    async fn upsert_blob(&self, digest: &str, size: u64, media_type: &str) -> Result<Blob> {
        let mut state = self.state.write().await;
        let blob = state
            .blobs
            .entry(digest.to_string())
            .or_insert_with(|| Blob {
                digest: digest.to_string(),
                size,
                media_type: media_type.to_string(),
            })
            .clone();
        Ok(blob)
    }

    async fn get_blob(&self, digest: &str) -> Result<Option<Blob>> {
        Ok(self.state.read().await.blobs.get(digest).cloned())
    }

    async fn delete_blob(&self, digest: &str) -> Result<()> {
        self.state.write().await.blobs.remove(digest);
        Ok(())
    }

    async fn list_orphaned_blob_digests(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut referenced: HashSet<String> = HashSet::new();
        for layers in state.layers.values() {
            for l in layers {
                referenced.insert(l.blob_digest.clone());
            }
        }
        for m in state.manifests.values() {
            if let Some(cfg) = &m.config_digest {
                referenced.insert(cfg.clone());
            }
        }
        Ok(state
            .blobs
            .keys()
            .filter(|d| !referenced.contains(*d))
            .cloned()
            .collect())
    }

    async fn upsert_manifest(
        &self,
        repository_id: Uuid,
        digest: &str,
        config_digest: Option<&str>,
        media_type: &str,
        size: u64,
    ) -> Result<Manifest> {
        let mut state = self.state.write().await;
        let key = (repository_id, digest.to_string());
        if let Some(id) = state.manifest_by_repo_digest.get(&key) {
            return Ok(state.manifests.get(id).unwrap().clone());
        }
        let manifest = Manifest {
            id: Uuid::new_v4(),
            repository_id,
            digest: digest.to_string(),
            config_digest: config_digest.map(|s| s.to_string()),
            media_type: media_type.to_string(),
            size,
            created_at: Utc::now(),
            pull_count: 0,
            last_pulled_at: None,
            health: HealthScore::default(),
            last_health_check: None,
        };
        state.manifest_by_repo_digest.insert(key, manifest.id);
        state.manifests.insert(manifest.id, manifest.clone());
        Ok(manifest)
    }

    async fn get_manifest(&self, id: Uuid) -> Result<Option<Manifest>> {
        Ok(self.state.read().await.manifests.get(&id).cloned())
    }

    async fn get_manifest_by_digest(
        &self,
        repository_id: Uuid,
        digest: &str,
    ) -> Result<Option<Manifest>> {
        let state = self.state.read().await;
        Ok(state
            .manifest_by_repo_digest
            .get(&(repository_id, digest.to_string()))
            .and_then(|id| state.manifests.get(id))
            .cloned())
    }

    async fn delete_manifest(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(manifest) = state.manifests.remove(&id) {
            state
                .manifest_by_repo_digest
                .remove(&(manifest.repository_id, manifest.digest.clone()));
            state.layers.remove(&id);
            state.dependencies.remove(&id);
            state.parents.remove(&id);
            state.scan_reports.remove(&id);
            state.priorities.remove(&id);
            state.storage_costs.remove(&id);
            state.zombies.remove(&id);
            if let Some(repo_tags) = state.tags.get_mut(&manifest.repository_id) {
                repo_tags.retain(|_, t| t.manifest_id != id);
            }
        }
        Ok(())
    }

    async fn increment_pull(&self, manifest_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let manifest = state
            .manifests
            .get_mut(&manifest_id)
            .ok_or_else(|| RegistryError::NotFound(format!("manifest {manifest_id}")))?;
        manifest.pull_count += 1;
        manifest.last_pulled_at = Some(Utc::now());
        Ok(())
    }

    async fn list_all_manifests(&self) -> Result<Vec<Manifest>> {
        Ok(self.state.read().await.manifests.values().cloned().collect())
    }

    async fn list_untagged_manifests(&self) -> Result<Vec<Manifest>> {
        let state = self.state.read().await;
        let tagged: HashSet<Uuid> = state
            .tags
            .values()
            .flat_map(|m| m.values().map(|t| t.manifest_id))
            .collect();
        Ok(state
            .manifests
            .values()
            .filter(|m| !tagged.contains(&m.id) && !state.parents.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn namespace_usage_bytes(&self, namespace_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        let mut digests: HashSet<String> = HashSet::new();
        for repo in state.repositories.values().filter(|r| r.namespace_id == namespace_id) {
            for manifest in state.manifests.values().filter(|m| m.repository_id == repo.id) {
                if let Some(cfg) = &manifest.config_digest {
                    digests.insert(cfg.clone());
                }
                if let Some(layers) = state.layers.get(&manifest.id) {
                    for l in layers {
                        digests.insert(l.blob_digest.clone());
                    }
                }
            }
        }
        Ok(digests
            .iter()
            .filter_map(|d| state.blobs.get(d))
            .map(|b| b.size)
            .sum())
    }

    async fn update_manifest_health(&self, manifest_id: Uuid, health: HealthScore) -> Result<()> {
        let mut state = self.state.write().await;
        let manifest = state
            .manifests
            .get_mut(&manifest_id)
            .ok_or_else(|| RegistryError::NotFound(format!("manifest {manifest_id}")))?;
        manifest.health = health;
        manifest.last_health_check = Some(Utc::now());
        Ok(())
    }

    async fn replace_manifest_layers(&self, manifest_id: Uuid, layers: &[(String, i32)]) -> Result<()> {
        let mut state = self.state.write().await;
        let rows = layers
            .iter()
            .map(|(digest, position)| ManifestLayer {
                manifest_id,
                blob_digest: digest.clone(),
                position: *position,
            })
            .collect();
        state.layers.insert(manifest_id, rows);
        Ok(())
    }

    async fn get_manifest_layers(&self, manifest_id: Uuid) -> Result<Vec<ManifestLayer>> {
        Ok(self
            .state
            .read()
            .await
            .layers
            .get(&manifest_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_tag(&self, repository_id: Uuid, name: &str, manifest_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let repo_tags = state.tags.entry(repository_id).or_default();
        match repo_tags.get_mut(name) {
            Some(tag) => {
                tag.manifest_id = manifest_id;
                tag.updated_at = now;
            }
            None => {
                repo_tags.insert(
                    name.to_string(),
                    Tag {
                        repository_id,
                        name: name.to_string(),
                        manifest_id,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_tag(&self, repository_id: Uuid, name: &str) -> Result<Option<Tag>> {
        Ok(self
            .state
            .read()
            .await
            .tags
            .get(&repository_id)
            .and_then(|m| m.get(name))
            .cloned())
    }

    async fn list_tags(&self, repository_id: Uuid) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .tags
            .get(&repository_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn delete_tag(&self, repository_id: Uuid, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(repo_tags) = state.tags.get_mut(&repository_id) {
            repo_tags.remove(name);
        }
        Ok(())
    }

    async fn upsert_dependency(&self, manifest_id: Uuid, parent_manifest_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        state.dependencies.insert(manifest_id, parent_manifest_id);
        state.parents.insert(parent_manifest_id);
        Ok(())
    }

    async fn is_referenced_as_parent(&self, manifest_id: Uuid) -> Result<bool> {
        Ok(self.state.read().await.parents.contains(&manifest_id))
    }

    async fn dependency_graph(&self, repository_name: Option<&str>, principal: &Principal) -> Result<DependencyGraph> {
        let state = self.state.read().await;
        let repo_filter = match repository_name {
            Some(full_name) => {
                let (ns, repo) = full_name.split_once('/').unwrap_or(("", full_name));
                let key = full_name_key(ns, repo);
                state.repo_by_full_name.get(&key).copied()
            }
            None => None,
        };

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for manifest in state.manifests.values() {
            if let Some(rid) = repo_filter {
                if manifest.repository_id != rid {
                    continue;
                }
            }
            let repo = match state.repositories.get(&manifest.repository_id) {
                Some(r) => r,
                None => continue,
            };
            if !principal.is_admin() && repo.owner_principal_id != principal.id {
                continue;
            }
            let tag = state
                .tags
                .get(&manifest.repository_id)
                .and_then(|m| m.values().find(|t| t.manifest_id == manifest.id))
                .map(|t| t.name.clone());
            nodes.push(DependencyNode {
                manifest_id: manifest.id,
                repository_name: repo.name.clone(),
                tag,
                digest: manifest.digest.clone(),
            });
            if let Some(parent) = state.dependencies.get(&manifest.id) {
                edges.push(DependencyEdge {
                    source: manifest.id,
                    target: *parent,
                });
            }
        }
        Ok(DependencyGraph { nodes, edges })
    }

    async fn insert_scan_report(&self, report: VulnerabilityReport) -> Result<()> {
        let mut state = self.state.write().await;
        state.scan_reports.entry(report.manifest_id).or_default().push(report);
        Ok(())
    }

    async fn latest_scan_report(&self, manifest_id: Uuid) -> Result<Option<VulnerabilityReport>> {
        let state = self.state.read().await;
        Ok(state
            .scan_reports
            .get(&manifest_id)
            .and_then(|rows| rows.iter().max_by_key(|r| r.scanned_at))
            .cloned())
    }

    async fn scan_history(&self, manifest_id: Uuid) -> Result<Vec<VulnerabilityReport>> {
        let state = self.state.read().await;
        let mut rows = state.scan_reports.get(&manifest_id).cloned().unwrap_or_default();
        rows.sort_by_key(|r| std::cmp::Reverse(r.scanned_at));
        Ok(rows)
    }

    async fn upsert_vulnerability_intelligence(&self, intel: VulnerabilityIntelligence) -> Result<()> {
        self.state
            .write()
            .await
            .vuln_intel
            .insert(intel.cve_id.clone(), intel);
        Ok(())
    }

    async fn get_vulnerability_intelligence(&self, cve_id: &str) -> Result<Option<VulnerabilityIntelligence>> {
        Ok(self.state.read().await.vuln_intel.get(cve_id).cloned())
    }

    async fn distinct_cves_from_completed_reports(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut set = HashSet::new();
        for rows in state.scan_reports.values() {
            for report in rows {
                if report.status != ScanStatus::Completed {
                    continue;
                }
                if let Some(vulns) = report.report_body.get("vulnerabilities").and_then(|v| v.as_array()) {
                    for v in vulns {
                        if let Some(cve) = v.get("cve_id").and_then(|c| c.as_str()) {
                            set.insert(cve.to_string());
                        }
                    }
                }
            }
        }
        Ok(set.into_iter().collect())
    }

    async fn replace_manifest_priorities(&self, manifest_id: Uuid, priorities: Vec<ManifestVulnPriority>) -> Result<()> {
        self.state.write().await.priorities.insert(manifest_id, priorities);
        Ok(())
    }

    async fn list_prioritized(&self, limit: usize) -> Result<Vec<ManifestVulnPriority>> {
        let state = self.state.read().await;
        let mut all: Vec<ManifestVulnPriority> = state.priorities.values().flatten().cloned().collect();
        all.sort_by(|a, b| b.priority_score.cmp(&a.priority_score));
        all.truncate(limit);
        Ok(all)
    }

    async fn upsert_storage_cost(&self, cost: StorageCost) -> Result<()> {
        self.state.write().await.storage_costs.insert(cost.manifest_id, cost);
        Ok(())
    }

    async fn list_costs_for_principal(&self, principal: &Principal) -> Result<Vec<StorageCost>> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        for cost in state.storage_costs.values() {
            if let Some(manifest) = state.manifests.get(&cost.manifest_id) {
                if let Some(repo) = state.repositories.get(&manifest.repository_id) {
                    if principal.is_admin() || repo.owner_principal_id == principal.id {
                        out.push(cost.clone());
                    }
                }
            }
        }
        out.sort_by(|a, b| b.total_cost_usd.partial_cmp(&a.total_cost_usd).unwrap());
        Ok(out)
    }

    async fn upsert_zombie(&self, zombie: ZombieImage) -> Result<()> {
        self.state.write().await.zombies.insert(zombie.manifest_id, zombie);
        Ok(())
    }

    async fn list_zombies_for_principal(&self, principal: &Principal) -> Result<Vec<ZombieImage>> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        for zombie in state.zombies.values() {
            if let Some(manifest) = state.manifests.get(&zombie.manifest_id) {
                if let Some(repo) = state.repositories.get(&manifest.repository_id) {
                    if principal.is_admin() || repo.owner_principal_id == principal.id {
                        out.push(zombie.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn insert_audit_event(&self, event: AuditEvent) -> Result<()> {
        self.state.write().await.audit_events.push(event);
        Ok(())
    }

    async fn create_service_account(&self, account: ServiceAccount) -> Result<()> {
        let mut state = self.state.write().await;
        state.service_account_by_prefix.insert(account.prefix.clone(), account.id);
        state.service_accounts.insert(account.id, account);
        Ok(())
    }

    async fn get_service_account_by_prefix(&self, prefix: &str) -> Result<Option<ServiceAccount>> {
        let state = self.state.read().await;
        Ok(state
            .service_account_by_prefix
            .get(prefix)
            .and_then(|id| state.service_accounts.get(id))
            .cloned())
    }

    async fn revoke_service_account(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(acct) = state.service_accounts.get_mut(&id) {
            acct.status = ServiceAccountStatus::Revoked;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn new_ns_repo(cat: &InMemoryCatalog, owner: Uuid) -> (Namespace, Repository) {
        let ns = cat
            .get_or_create_namespace("acme", Some(owner), NamespaceType::User)
            .await
            .unwrap();
        let repo = cat
            .get_or_create_repository(ns.id, "app", owner)
            .await
            .unwrap();
        (ns, repo)
    }

    #[tokio::test]
    async fn blob_upsert_is_idempotent() {
        let cat = InMemoryCatalog::new();
        let b1 = cat.upsert_blob("sha256:aa", 10, "application/octet-stream").await.unwrap();
        let b2 = cat.upsert_blob("sha256:aa", 10, "application/octet-stream").await.unwrap();
        assert_eq!(b1.digest, b2.digest);
        assert_eq!(b1.size, 10);
    }

    #[tokio::test]
    async fn manifest_upsert_dedupes_by_repo_and_digest() {
        let cat = InMemoryCatalog::new();
        let owner = Uuid::new_v4();
        let (_ns, repo) = new_ns_repo(&cat, owner).await;
        let m1 = cat
            .upsert_manifest(repo.id, "sha256:deadbeef", None, "application/vnd.oci.image.manifest.v1+json", 100)
            .await
            .unwrap();
        let m2 = cat
            .upsert_manifest(repo.id, "sha256:deadbeef", None, "application/vnd.oci.image.manifest.v1+json", 100)
            .await
            .unwrap();
        assert_eq!(m1.id, m2.id);
    }

    #[tokio::test]
    async fn untagged_and_non_parent_manifests_are_listed() {
        let cat = InMemoryCatalog::new();
        let owner = Uuid::new_v4();
        let (_ns, repo) = new_ns_repo(&cat, owner).await;
        let m1 = cat.upsert_manifest(repo.id, "sha256:1", None, "t", 1).await.unwrap();
        let m2 = cat.upsert_manifest(repo.id, "sha256:2", None, "t", 1).await.unwrap();
        cat.upsert_tag(repo.id, "v1", m1.id).await.unwrap();
        cat.upsert_dependency(m2.id, m1.id).await.unwrap(); // m1 is a parent, still untagged-check applies to m2
        let untagged = cat.list_untagged_manifests().await.unwrap();
        assert_eq!(untagged.len(), 1);
        assert_eq!(untagged[0].id, m2.id);
    }

    #[tokio::test]
    async fn namespace_usage_sums_distinct_reachable_blobs() {
        let cat = InMemoryCatalog::new();
        let owner = Uuid::new_v4();
        let (ns, repo) = new_ns_repo(&cat, owner).await;
        cat.upsert_blob("sha256:cfg", 50, "application/json").await.unwrap();
        cat.upsert_blob("sha256:layer1", 100, "application/octet-stream").await.unwrap();
        let m = cat
            .upsert_manifest(repo.id, "sha256:m", Some("sha256:cfg"), "t", 150)
            .await
            .unwrap();
        cat.replace_manifest_layers(m.id, &[("sha256:layer1".to_string(), 0)])
            .await
            .unwrap();
        let usage = cat.namespace_usage_bytes(ns.id).await.unwrap();
        assert_eq!(usage, 150);
    }

    #[tokio::test]
    async fn orphaned_blobs_exclude_referenced_ones() {
        let cat = InMemoryCatalog::new();
        let owner = Uuid::new_v4();
        let (_ns, repo) = new_ns_repo(&cat, owner).await;
        cat.upsert_blob("sha256:used", 1, "t").await.unwrap();
        cat.upsert_blob("sha256:free", 1, "t").await.unwrap();
        let m = cat.upsert_manifest(repo.id, "sha256:m", None, "t", 1).await.unwrap();
        cat.replace_manifest_layers(m.id, &[("sha256:used".to_string(), 0)])
            .await
            .unwrap();
        let orphans = cat.list_orphaned_blob_digests().await.unwrap();
        assert_eq!(orphans, vec!["sha256:free".to_string()]);
    }

    #[tokio::test]
    async fn scan_reports_are_insert_only_history() {
        let cat = InMemoryCatalog::new();
        let manifest_id = Uuid::new_v4();
        let r1 = VulnerabilityReport {
            id: Uuid::new_v4(),
            manifest_id,
            scanner: "trivy".into(),
            scanned_at: Utc::now(),
            status: ScanStatus::Completed,
            critical_count: 1,
            high_count: 0,
            medium_count: 0,
            low_count: 0,
            report_body: serde_json::json!({}),
        };
        let mut r2 = r1.clone();
        r2.id = Uuid::new_v4();
        r2.scanned_at = r1.scanned_at + chrono::Duration::seconds(1);
        r2.critical_count = 0;
        cat.insert_scan_report(r1.clone()).await.unwrap();
        cat.insert_scan_report(r2.clone()).await.unwrap();
        let history = cat.scan_history(manifest_id).await.unwrap();
        assert_eq!(history.len(), 2);
        let latest = cat.latest_scan_report(manifest_id).await.unwrap().unwrap();
        assert_eq!(latest.id, r2.id);
    }

    #[tokio::test]
    async fn tenant_scoped_listing_excludes_other_owners() {
        let cat = InMemoryCatalog::new();
        let owner_a = Uuid::new_v4();
        let owner_b = Uuid::new_v4();
        let ns = cat.get_or_create_namespace("shared", None, NamespaceType::Organization).await.unwrap();
        cat.get_or_create_repository(ns.id, "repo-a", owner_a).await.unwrap();
        cat.get_or_create_repository(ns.id, "repo-b", owner_b).await.unwrap();
        let principal_a = Principal { id: owner_a, username: "a".into(), role: Role::User };
        let visible = cat.list_repositories_for_principal(&principal_a).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].0.owner_principal_id, owner_a);
    }
}
