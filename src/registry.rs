//! Registry Engine (spec component 9): the OCI Distribution blob/manifest/
//! tags/catalog contracts, orchestrating storage, catalog, policy, queue,
//! audit, and webhook side effects.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::Auditor;
use crate::catalog::{
    Blob, Catalog, Manifest, NamespaceType, Principal, RESERVED_NAMESPACE,
};
use crate::digest::Digest;
use crate::error::{RegistryError, Result};
use crate::policy::{PolicyDecision, PolicyEngine, PolicyInput, VulnerabilityCounts};
use crate::queue::{JobQueue, ScanJob};
use crate::storage::{blob_path, manifest_path, upload_path, ObjectStore};
use crate::webhook::{WebhookEvent, WebhookNotifier};

/// Parsed shape of a `config`/`layers[]` descriptor, as found in a v2/OCI
/// image manifest body.
#[derive(Debug, Clone, Deserialize)]
struct Descriptor {
    digest: String,
    size: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestBody {
    #[serde(default)]
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    #[serde(default)]
    #[serde(rename = "schemaVersion")]
    schema_version: Option<u32>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

const MEDIA_TYPE_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
const MEDIA_TYPE_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, Clone)]
pub struct UploadStarted {
    pub upload_id: String,
}

#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestPutOutcome {
    pub digest: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ManifestGetOutcome {
    pub body: bytes::Bytes,
    pub digest: String,
    pub media_type: String,
}

pub struct Registry {
    storage: Arc<dyn ObjectStore>,
    catalog: Arc<dyn Catalog>,
    policy: Arc<PolicyEngine>,
    queue: Arc<dyn JobQueue>,
    auditor: Auditor,
    webhook: WebhookNotifier,
    immutable_tags: bool,
}

impl Registry {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        catalog: Arc<dyn Catalog>,
        policy: Arc<PolicyEngine>,
        queue: Arc<dyn JobQueue>,
        webhook_url: Option<String>,
        immutable_tags: bool,
    ) -> Self {
        Registry {
            storage,
            catalog: catalog.clone(),
            policy,
            queue,
            auditor: Auditor::new(catalog),
            webhook: WebhookNotifier::new(webhook_url),
            immutable_tags,
        }
    }

    // ---- blob upload (resumable) ----

    /// `Start(repo) -> upload_id`. No storage object is created until the
    /// first `Patch`.
    pub async fn start_upload(&self, _repo: &str) -> Result<UploadStarted> {
        Ok(UploadStarted {
            upload_id: Uuid::new_v4().to_string(),
        })
    }

    /// `Patch(repo, upload_id, bytes)`: appends to the staging object.
    pub async fn patch_upload(&self, upload_id: &str, chunk: bytes::Bytes) -> Result<UploadProgress> {
        let total_bytes = self.storage.append(&upload_path(upload_id), chunk).await?;
        Ok(UploadProgress { total_bytes })
    }

    /// `Put(repo, upload_id, digest, bytes)`: finalizes the upload. If `body`
    /// is non-empty this is the monolithic-PUT path (written directly); else
    /// the staged upload object is promoted to its final location.
    pub async fn finalize_upload(&self, upload_id: &str, digest: &str, body: bytes::Bytes) -> Result<Blob> {
        let parsed = Digest::from_str_loose(digest)?;
        let dest = blob_path(&parsed.to_string());
        if !body.is_empty() {
            self.storage.put(&dest, body.clone()).await?;
        } else {
            self.storage.copy(&upload_path(upload_id), &dest).await?;
            self.storage.delete(&upload_path(upload_id)).await.ok();
        }
        let size = self
            .storage
            .stat(&dest)
            .await?
            .ok_or_else(|| RegistryError::Storage(format!("finalized blob missing: {dest}")))?;
        let blob = self
            .catalog
            .upsert_blob(&parsed.to_string(), size, "application/octet-stream")
            .await?;
        Ok(blob)
    }

    /// `HEAD`/`GET` on a blob digest. Self-heals a missing catalog row when
    /// the storage object itself exists (drift from manual ops).
    pub async fn get_blob(&self, digest: &str) -> Result<Option<bytes::Bytes>> {
        let parsed = Digest::from_str_loose(digest)?;
        let path = blob_path(&parsed.to_string());
        let data = self.storage.get(&path).await?;
        if let Some(data) = &data {
            if self.catalog.get_blob(&parsed.to_string()).await?.is_none() {
                let _ = self
                    .catalog
                    .upsert_blob(&parsed.to_string(), data.len() as u64, "application/octet-stream")
                    .await;
            }
        }
        Ok(data)
    }

    // ---- manifest put ----

    #[allow(clippy::too_many_arguments)]
    pub async fn put_manifest(
        &self,
        namespace_name: &str,
        repo_name: &str,
        reference: &str,
        body: bytes::Bytes,
        principal: &Principal,
    ) -> Result<ManifestPutOutcome> {
        let is_digest_ref = reference.starts_with("sha256:");

        let namespace = self
            .catalog
            .get_or_create_namespace(namespace_name, Some(principal.id), NamespaceType::User)
            .await?;
        let repo_full_name = format!("{namespace_name}/{repo_name}");
        let existing_repo = self.catalog.get_repository_by_full_name(&repo_full_name).await?;

        if self.immutable_tags && !is_digest_ref {
            if let Some((repo, _)) = &existing_repo {
                if self.catalog.get_tag(repo.id, reference).await?.is_some() {
                    return Err(RegistryError::TagImmutable(format!(
                        "tag {reference} already exists in {repo_full_name}"
                    )));
                }
            }
        }

        let repo_path = format!("{namespace_name}/{repo_name}");
        self.storage.put(&manifest_path(&repo_path, reference), body.clone()).await?;

        let digest = Digest::of(&body);
        if !is_digest_ref {
            self.storage
                .put(&manifest_path(&repo_path, &digest.to_string()), body.clone())
                .await?;
        }

        let parsed: Option<ManifestBody> = serde_json::from_slice(&body).ok();
        let media_type = parsed
            .as_ref()
            .and_then(|m| m.media_type.clone())
            .unwrap_or_else(|| {
                if parsed.as_ref().and_then(|m| m.schema_version) == Some(1) {
                    MEDIA_TYPE_V1.to_string()
                } else {
                    MEDIA_TYPE_V2.to_string()
                }
            });

        let mut layer_pairs: Vec<(String, i32)> = Vec::new();
        let mut config_digest: Option<String> = None;
        let total_size: u64;

        if let Some(parsed) = &parsed {
            if let Some(config) = &parsed.config {
                self.catalog.upsert_blob(&config.digest, config.size, "application/vnd.oci.image.config.v1+json").await?;
                config_digest = Some(config.digest.clone());
            }
            let mut size_sum = parsed.config.as_ref().map(|c| c.size).unwrap_or(0);
            for (position, layer) in parsed.layers.iter().enumerate() {
                self.catalog.upsert_blob(&layer.digest, layer.size, "application/vnd.oci.image.layer.v1.tar+gzip").await?;
                layer_pairs.push((layer.digest.clone(), position as i32));
                size_sum += layer.size;
            }
            total_size = if parsed.config.is_some() || !parsed.layers.is_empty() {
                size_sum
            } else {
                body.len() as u64
            };
        } else {
            total_size = body.len() as u64;
        }

        let usage = self.catalog.namespace_usage_bytes(namespace.id).await?;
        if usage + total_size > namespace.quota_bytes {
            return Err(RegistryError::QuotaExceeded {
                used: usage,
                quota: namespace.quota_bytes,
            });
        }

        let repo = match existing_repo {
            Some((repo, _)) => repo,
            None => {
                self.catalog
                    .get_or_create_repository(namespace.id, repo_name, principal.id)
                    .await?
            }
        };

        let manifest = self
            .catalog
            .upsert_manifest(repo.id, &digest.to_string(), config_digest.as_deref(), &media_type, total_size)
            .await?;

        if !is_digest_ref {
            self.catalog.upsert_tag(repo.id, reference, manifest.id).await?;
        }

        if !layer_pairs.is_empty() {
            self.catalog.replace_manifest_layers(manifest.id, &layer_pairs).await?;
            self.detect_dependencies(manifest.id).await?;
        }

        if let Err(e) = self
            .queue
            .enqueue(ScanJob {
                manifest_id: manifest.id,
                repository: repo_full_name.clone(),
                reference: digest.to_string(),
            })
            .await
        {
            tracing::warn!(error = %e, manifest_id = %manifest.id, "failed to enqueue scan job");
        }

        self.webhook
            .notify(WebhookEvent {
                event: "push",
                repository: &repo_full_name,
                tag: if is_digest_ref { None } else { Some(reference) },
                digest: &digest.to_string(),
                size: total_size,
            })
            .await;
        self.auditor
            .record(
                Some(principal.id),
                "PUSH",
                Some(repo.id),
                serde_json::json!({
                    "repository": repo_full_name,
                    "tag": if is_digest_ref { None } else { Some(reference) },
                    "digest": digest.to_string(),
                    "size": total_size,
                }),
            )
            .await;

        Ok(ManifestPutOutcome {
            digest: digest.to_string(),
            size: total_size,
        })
    }

    /// A parent manifest P of child C satisfies `|layers(P)| < |layers(C)|`
    /// and every `(digest, position)` pair of P appears in C. Candidates are
    /// drawn from every repository in the catalog — the canonical case is a
    /// tenant's image deriving from a base image in a different namespace
    /// (e.g. `library/alpine`). The candidate with the most layers (closest
    /// ancestor) wins; ties break on whichever is returned first by the
    /// catalog.
    async fn detect_dependencies(&self, manifest_id: Uuid) -> Result<()> {
        let child_layers = self.catalog.get_manifest_layers(manifest_id).await?;
        let child_set: HashSet<(String, i32)> = child_layers
            .iter()
            .map(|l| (l.blob_digest.clone(), l.position))
            .collect();

        let siblings = self.catalog.list_all_manifests().await?;
        let mut best: Option<(Uuid, usize)> = None;
        for candidate in siblings {
            if candidate.id == manifest_id {
                continue;
            }
            let candidate_layers = self.catalog.get_manifest_layers(candidate.id).await?;
            if candidate_layers.is_empty() || candidate_layers.len() >= child_set.len() {
                continue;
            }
            let is_prefix_subset = candidate_layers
                .iter()
                .all(|l| child_set.contains(&(l.blob_digest.clone(), l.position)));
            if !is_prefix_subset {
                continue;
            }
            if best.as_ref().map(|(_, n)| candidate_layers.len() > *n).unwrap_or(true) {
                best = Some((candidate.id, candidate_layers.len()));
            }
        }

        if let Some((parent_id, _)) = best {
            self.catalog.upsert_dependency(manifest_id, parent_id).await?;
        }
        Ok(())
    }

    // ---- manifest get ----

    pub async fn get_manifest(
        &self,
        namespace_name: &str,
        repo_name: &str,
        reference: &str,
        principal: &Principal,
        environment: &str,
    ) -> Result<ManifestGetOutcome> {
        let repo_full_name = format!("{namespace_name}/{repo_name}");
        let (repo, _) = self
            .catalog
            .get_repository_by_full_name(&repo_full_name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("repository not found: {repo_full_name}")))?;

        let manifest = self.resolve_manifest(repo.id, reference).await?;

        let mut path = manifest_path(&repo_full_name, reference);
        let mut body = self.storage.get(&path).await?;
        if body.is_none() {
            // legacy `library/` prefix swap
            let swapped = if repo_full_name.starts_with(&format!("{RESERVED_NAMESPACE}/")) {
                repo_full_name.replacen(&format!("{RESERVED_NAMESPACE}/"), "", 1)
            } else {
                format!("{RESERVED_NAMESPACE}/{repo_full_name}")
            };
            path = manifest_path(&swapped, reference);
            body = self.storage.get(&path).await?;
        }
        let body = body.ok_or_else(|| RegistryError::NotFound(format!("manifest body missing: {path}")))?;

        let vulns = self.catalog.latest_scan_report(manifest.id).await?;
        let vulnerabilities = vulns
            .map(|r| VulnerabilityCounts { critical: r.critical_count, high: r.high_count })
            .unwrap_or_default();
        let is_signed = self
            .catalog
            .get_tag(repo.id, &format!("{}.sig", manifest.digest.replace("sha256:", "sha256-")))
            .await?
            .is_some();

        let decision: PolicyDecision = self
            .policy
            .evaluate(&PolicyInput {
                repository: repo_full_name.clone(),
                tag: reference.to_string(),
                user: principal.username.clone(),
                environment: environment.to_string(),
                vulnerabilities,
                is_signed,
            })
            .await;
        if !decision.allow {
            return Err(RegistryError::PolicyDenied(decision.message()));
        }

        self.catalog.increment_pull(manifest.id).await?;

        Ok(ManifestGetOutcome {
            body,
            digest: manifest.digest.clone(),
            media_type: manifest.media_type.clone(),
        })
    }

    async fn resolve_manifest(&self, repository_id: Uuid, reference: &str) -> Result<Manifest> {
        if let Some(digest) = reference.strip_prefix("sha256:") {
            return self
                .catalog
                .get_manifest_by_digest(repository_id, &format!("sha256:{digest}"))
                .await?
                .ok_or_else(|| RegistryError::NotFound(format!("manifest not found: {reference}")));
        }
        let tag = self
            .catalog
            .get_tag(repository_id, reference)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("tag not found: {reference}")))?;
        self.catalog
            .get_manifest(tag.manifest_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("manifest not found: {reference}")))
    }

    // ---- tags / catalog ----

    pub async fn list_tags(&self, namespace_name: &str, repo_name: &str) -> Result<Vec<String>> {
        let repo_full_name = format!("{namespace_name}/{repo_name}");
        let (repo, _) = self
            .catalog
            .get_repository_by_full_name(&repo_full_name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("repository not found: {repo_full_name}")))?;
        let mut tags = self.catalog.list_tags(repo.id).await?;
        tags.sort();
        Ok(tags)
    }

    pub async fn list_catalog(&self, principal: &Principal) -> Result<Vec<String>> {
        let repos = self.catalog.list_repositories_for_principal(principal).await?;
        let mut names: Vec<String> = repos.iter().map(|(r, ns)| r.full_name(ns)).collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::InMemoryCatalog;
    use crate::catalog::Role;
    use crate::queue::InMemoryJobQueue;
    use crate::storage::InMemoryObjectStore;

    fn registry(immutable_tags: bool) -> Registry {
        Registry::new(
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryCatalog::new()),
            Arc::new(PolicyEngine::new()),
            Arc::new(InMemoryJobQueue::new()),
            None,
            immutable_tags,
        )
    }

    fn principal() -> Principal {
        Principal { id: Uuid::new_v4(), username: "alice".into(), role: Role::User }
    }

    fn v2_manifest_body() -> bytes::Bytes {
        bytes::Bytes::from(
            serde_json::json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                "config": {"digest": "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc", "size": 100},
                "layers": [
                    {"digest": "sha256:1111111111111111111111111111111111111111111111111111111111111a", "size": 200}
                ]
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn push_then_pull_round_trip() {
        let reg = registry(false);
        let p = principal();
        let outcome = reg.put_manifest("alice", "app", "v1", v2_manifest_body(), &p).await.unwrap();
        assert_eq!(outcome.size, 300);

        let fetched = reg.get_manifest("alice", "app", "v1", &p, "dev").await.unwrap();
        assert_eq!(fetched.digest, outcome.digest);
    }

    #[tokio::test]
    async fn immutable_tag_rejects_second_push() {
        let reg = registry(true);
        let p = principal();
        reg.put_manifest("alice", "app", "v1", v2_manifest_body(), &p).await.unwrap();
        let err = reg.put_manifest("alice", "app", "v1", v2_manifest_body(), &p).await.unwrap_err();
        assert!(matches!(err, RegistryError::TagImmutable(_)));
    }

    #[tokio::test]
    async fn quota_exceeded_is_rejected() {
        let reg = registry(false);
        let p = principal();
        // Force usage above default quota by using a synthetic giant layer.
        let huge = bytes::Bytes::from(
            serde_json::json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                "config": {"digest": "sha256:dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd", "size": 1},
                "layers": [
                    {"digest": "sha256:2222222222222222222222222222222222222222222222222222222222222b", "size": 6_000_000_000u64}
                ]
            })
            .to_string(),
        );
        let err = reg.put_manifest("alice", "app", "v1", huge, &p).await.unwrap_err();
        assert!(matches!(err, RegistryError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn tags_list_is_sorted() {
        let reg = registry(false);
        let p = principal();
        reg.put_manifest("alice", "app", "b", v2_manifest_body(), &p).await.unwrap();
        reg.put_manifest("alice", "app", "a", v2_manifest_body(), &p).await.unwrap();
        let tags = reg.list_tags("alice", "app").await.unwrap();
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn catalog_lists_visible_repositories() {
        let reg = registry(false);
        let p = principal();
        reg.put_manifest("alice", "app", "v1", v2_manifest_body(), &p).await.unwrap();
        let names = reg.list_catalog(&p).await.unwrap();
        assert_eq!(names, vec!["alice/app".to_string()]);
    }
}
