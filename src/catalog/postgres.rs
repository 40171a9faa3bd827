//! PostgreSQL-backed `Catalog`. Grounded on the `pub mod postgres` submodule
//! of the metadata store this registry is adapted from: a `deadpool_postgres`
//! pool over `tokio_postgres::NoTls`, an embedded `SCHEMA_SQL` applied via
//! `batch_execute`, and row-parsing helpers per entity.

use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use std::collections::HashSet;
use tokio_postgres::NoTls;
use uuid::Uuid;

use super::*;
use crate::error::{RegistryError, Result};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS namespaces (
    id UUID PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    owner_principal_id UUID,
    kind TEXT NOT NULL,
    quota_bytes BIGINT NOT NULL DEFAULT 5368709120
);

CREATE TABLE IF NOT EXISTS repositories (
    id UUID PRIMARY KEY,
    namespace_id UUID NOT NULL REFERENCES namespaces(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    owner_principal_id UUID NOT NULL,
    UNIQUE (namespace_id, name, owner_principal_id)
);
CREATE INDEX IF NOT EXISTS idx_repositories_namespace ON repositories(namespace_id);
CREATE INDEX IF NOT EXISTS idx_repositories_owner ON repositories(owner_principal_id);

CREATE TABLE IF NOT EXISTS blobs (
    digest TEXT PRIMARY KEY,
    size BIGINT NOT NULL,
    media_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS manifests (
    id UUID PRIMARY KEY,
    repository_id UUID NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    digest TEXT NOT NULL,
    config_digest TEXT,
    media_type TEXT NOT NULL,
    size BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    pull_count BIGINT NOT NULL DEFAULT 0,
    last_pulled_at TIMESTAMPTZ,
    health_overall INT NOT NULL DEFAULT 0,
    health_grade TEXT,
    health_security INT NOT NULL DEFAULT 0,
    health_freshness INT NOT NULL DEFAULT 0,
    health_efficiency INT NOT NULL DEFAULT 0,
    health_maintenance INT NOT NULL DEFAULT 0,
    last_health_check TIMESTAMPTZ,
    UNIQUE (repository_id, digest)
);
CREATE INDEX IF NOT EXISTS idx_manifests_repository ON manifests(repository_id);
CREATE INDEX IF NOT EXISTS idx_manifests_last_pulled ON manifests(last_pulled_at);

CREATE TABLE IF NOT EXISTS tags (
    repository_id UUID NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    manifest_id UUID NOT NULL REFERENCES manifests(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (repository_id, name)
);
CREATE INDEX IF NOT EXISTS idx_tags_repository ON tags(repository_id);

CREATE TABLE IF NOT EXISTS manifest_layers (
    manifest_id UUID NOT NULL REFERENCES manifests(id) ON DELETE CASCADE,
    blob_digest TEXT NOT NULL,
    position INT NOT NULL,
    PRIMARY KEY (manifest_id, position)
);

CREATE TABLE IF NOT EXISTS image_dependencies (
    manifest_id UUID PRIMARY KEY REFERENCES manifests(id) ON DELETE CASCADE,
    parent_manifest_id UUID NOT NULL REFERENCES manifests(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS vulnerability_reports (
    id UUID PRIMARY KEY,
    manifest_id UUID NOT NULL REFERENCES manifests(id) ON DELETE CASCADE,
    scanner TEXT NOT NULL,
    scanned_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    status TEXT NOT NULL,
    critical_count BIGINT NOT NULL DEFAULT 0,
    high_count BIGINT NOT NULL DEFAULT 0,
    medium_count BIGINT NOT NULL DEFAULT 0,
    low_count BIGINT NOT NULL DEFAULT 0,
    report_body JSONB NOT NULL DEFAULT '{}'::jsonb
);
CREATE INDEX IF NOT EXISTS idx_vuln_reports_manifest_scanned
    ON vulnerability_reports(manifest_id, scanned_at DESC);

CREATE TABLE IF NOT EXISTS vulnerability_intelligence (
    cve_id TEXT PRIMARY KEY,
    epss_score DOUBLE PRECISION NOT NULL,
    epss_percentile DOUBLE PRECISION NOT NULL,
    has_active_exploit BOOLEAN NOT NULL DEFAULT false,
    exploit_maturity TEXT,
    trending_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    last_updated TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_vuln_intel_epss ON vulnerability_intelligence(epss_score DESC);

CREATE TABLE IF NOT EXISTS manifest_vuln_priority (
    manifest_id UUID NOT NULL REFERENCES manifests(id) ON DELETE CASCADE,
    cve_id TEXT NOT NULL,
    base_severity TEXT NOT NULL,
    epss_score DOUBLE PRECISION NOT NULL,
    runtime_exposed BOOLEAN NOT NULL DEFAULT false,
    priority_score INT NOT NULL,
    recommended_action TEXT NOT NULL,
    PRIMARY KEY (manifest_id, cve_id)
);
CREATE INDEX IF NOT EXISTS idx_manifest_vuln_priority_score
    ON manifest_vuln_priority(manifest_id, priority_score DESC);

CREATE TABLE IF NOT EXISTS storage_costs (
    manifest_id UUID PRIMARY KEY REFERENCES manifests(id) ON DELETE CASCADE,
    blob_size_bytes BIGINT NOT NULL,
    storage_cost_usd DOUBLE PRECISION NOT NULL,
    bandwidth_cost_usd DOUBLE PRECISION NOT NULL,
    total_cost_usd DOUBLE PRECISION NOT NULL,
    pull_count_30d BIGINT NOT NULL DEFAULT 0,
    last_pulled_at TIMESTAMPTZ,
    cost_per_pull DOUBLE PRECISION NOT NULL DEFAULT 0,
    calculated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS zombie_images (
    manifest_id UUID PRIMARY KEY REFERENCES manifests(id) ON DELETE CASCADE,
    days_since_last_pull BIGINT NOT NULL,
    storage_cost_usd DOUBLE PRECISION NOT NULL,
    recommended_action TEXT NOT NULL,
    detected_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS audit_events (
    id UUID PRIMARY KEY,
    user_id UUID,
    action TEXT NOT NULL,
    repository_id UUID,
    details JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS service_accounts (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    key_hash TEXT NOT NULL,
    prefix TEXT UNIQUE NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    last_used_at TIMESTAMPTZ
);
"#;

pub struct PostgresCatalog {
    pool: Pool,
}

impl PostgresCatalog {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut cfg = PoolConfig::new();
        cfg.url = Some(database_url.to_string());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| RegistryError::Fatal(format!("postgres pool config: {e}")))?;
        Ok(PostgresCatalog { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        Ok(())
    }
}

fn namespace_from_row(row: &tokio_postgres::Row) -> Result<Namespace> {
    let kind: String = row.get("kind");
    Ok(Namespace {
        id: row.get("id"),
        name: row.get("name"),
        owner_principal_id: row.get("owner_principal_id"),
        kind: if kind == "organization" {
            NamespaceType::Organization
        } else {
            NamespaceType::User
        },
        quota_bytes: row.get::<_, i64>("quota_bytes") as u64,
    })
}

fn repository_from_row(row: &tokio_postgres::Row) -> Repository {
    Repository {
        id: row.get("id"),
        namespace_id: row.get("namespace_id"),
        name: row.get("name"),
        owner_principal_id: row.get("owner_principal_id"),
    }
}

fn blob_from_row(row: &tokio_postgres::Row) -> Blob {
    Blob {
        digest: row.get("digest"),
        size: row.get::<_, i64>("size") as u64,
        media_type: row.get("media_type"),
    }
}

fn manifest_from_row(row: &tokio_postgres::Row) -> Manifest {
    Manifest {
        id: row.get("id"),
        repository_id: row.get("repository_id"),
        digest: row.get("digest"),
        config_digest: row.get("config_digest"),
        media_type: row.get("media_type"),
        size: row.get::<_, i64>("size") as u64,
        created_at: row.get("created_at"),
        pull_count: row.get::<_, i64>("pull_count") as u64,
        last_pulled_at: row.get("last_pulled_at"),
        health: HealthScore {
            overall: row.get("health_overall"),
            grade: row.get("health_grade"),
            security: row.get("health_security"),
            freshness: row.get("health_freshness"),
            efficiency: row.get("health_efficiency"),
            maintenance: row.get("health_maintenance"),
        },
        last_health_check: row.get("last_health_check"),
    }
}

fn scan_status_to_str(s: ScanStatus) -> &'static str {
    match s {
        ScanStatus::Pending => "pending",
        ScanStatus::Scanning => "scanning",
        ScanStatus::Completed => "completed",
        ScanStatus::Failed => "failed",
    }
}

fn scan_status_from_str(s: &str) -> ScanStatus {
    match s {
        "scanning" => ScanStatus::Scanning,
        "completed" => ScanStatus::Completed,
        "failed" => ScanStatus::Failed,
        _ => ScanStatus::Pending,
    }
}

fn report_from_row(row: &tokio_postgres::Row) -> VulnerabilityReport {
    let status: String = row.get("status");
    VulnerabilityReport {
        id: row.get("id"),
        manifest_id: row.get("manifest_id"),
        scanner: row.get("scanner"),
        scanned_at: row.get("scanned_at"),
        status: scan_status_from_str(&status),
        critical_count: row.get("critical_count"),
        high_count: row.get("high_count"),
        medium_count: row.get("medium_count"),
        low_count: row.get("low_count"),
        report_body: row.get("report_body"),
    }
}

fn recommended_action_to_str(a: RecommendedAction) -> &'static str {
    match a {
        RecommendedAction::Urgent => "urgent",
        RecommendedAction::High => "high",
        RecommendedAction::Medium => "medium",
        RecommendedAction::Low => "low",
        RecommendedAction::Monitor => "monitor",
    }
}

fn zombie_action_to_str(a: ZombieAction) -> &'static str {
    match a {
        ZombieAction::Delete => "delete",
        ZombieAction::Archive => "archive",
        ZombieAction::Monitor => "monitor",
        ZombieAction::Keep => "keep",
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn get_or_create_namespace(
        &self,
        name: &str,
        owner_principal_id: Option<Uuid>,
        kind: NamespaceType,
    ) -> Result<Namespace> {
        let client = self.pool.get().await?;
        let kind_str = match kind {
            NamespaceType::User => "user",
            NamespaceType::Organization => "organization",
        };
        let row = client
            .query_one(
                "INSERT INTO namespaces (id, name, owner_principal_id, kind, quota_bytes)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                 RETURNING *",
                &[
                    &Uuid::new_v4(),
                    &name,
                    &owner_principal_id,
                    &kind_str,
                    &(DEFAULT_QUOTA_BYTES as i64),
                ],
            )
            .await?;
        namespace_from_row(&row)
    }

    async fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM namespaces WHERE name = $1", &[&name])
            .await?;
        row.as_ref().map(namespace_from_row).transpose()
    }

    async fn get_namespace(&self, id: Uuid) -> Result<Option<Namespace>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM namespaces WHERE id = $1", &[&id])
            .await?;
        row.as_ref().map(namespace_from_row).transpose()
    }

    async fn set_namespace_quota(&self, id: Uuid, quota_bytes: u64) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE namespaces SET quota_bytes = $2 WHERE id = $1",
                &[&id, &(quota_bytes as i64)],
            )
            .await?;
        Ok(())
    }

    async fn get_or_create_repository(
        &self,
        namespace_id: Uuid,
        name: &str,
        owner_principal_id: Uuid,
    ) -> Result<Repository> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO repositories (id, namespace_id, name, owner_principal_id)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (namespace_id, name, owner_principal_id)
                 DO UPDATE SET name = EXCLUDED.name
                 RETURNING *",
                &[&Uuid::new_v4(), &namespace_id, &name, &owner_principal_id],
            )
            .await?;
        Ok(repository_from_row(&row))
    }

    async fn get_repository_by_full_name(
        &self,
        full_name: &str,
    ) -> Result<Option<(Repository, Namespace)>> {
        let (ns_name, repo_name) = match full_name.split_once('/') {
            Some(pair) => pair,
            None => return Ok(None),
        };
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT r.*, n.name as ns_name, n.owner_principal_id as ns_owner,
                        n.kind as ns_kind, n.quota_bytes as ns_quota
                 FROM repositories r JOIN namespaces n ON n.id = r.namespace_id
                 WHERE n.name = $1 AND r.name = $2",
                &[&ns_name, &repo_name],
            )
            .await?;
        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };
        let repo = repository_from_row(&row);
        let kind: String = row.get("ns_kind");
        let ns = Namespace {
            id: repo.namespace_id,
            name: row.get("ns_name"),
            owner_principal_id: row.get("ns_owner"),
            kind: if kind == "organization" {
                NamespaceType::Organization
            } else {
                NamespaceType::User
            },
            quota_bytes: row.get::<_, i64>("ns_quota") as u64,
        };
        Ok(Some((repo, ns)))
    }

    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM repositories WHERE id = $1", &[&id])
            .await?;
        Ok(row.as_ref().map(repository_from_row))
    }

    async fn list_repositories_for_principal(
        &self,
        principal: &Principal,
    ) -> Result<Vec<(Repository, Namespace)>> {
        let client = self.pool.get().await?;
        let rows = if principal.is_admin() {
            client
                .query(
                    "SELECT r.*, n.name as ns_name, n.owner_principal_id as ns_owner,
                            n.kind as ns_kind, n.quota_bytes as ns_quota
                     FROM repositories r JOIN namespaces n ON n.id = r.namespace_id",
                    &[],
                )
                .await?
        } else {
            client
                .query(
                    "SELECT r.*, n.name as ns_name, n.owner_principal_id as ns_owner,
                            n.kind as ns_kind, n.quota_bytes as ns_quota
                     FROM repositories r JOIN namespaces n ON n.id = r.namespace_id
                     WHERE r.owner_principal_id = $1",
                    &[&principal.id],
                )
                .await?
        };
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let repo = repository_from_row(row);
            let kind: String = row.get("ns_kind");
            let ns = Namespace {
                id: repo.namespace_id,
                name: row.get("ns_name"),
                owner_principal_id: row.get("ns_owner"),
                kind: if kind == "organization" {
                    NamespaceType::Organization
                } else {
                    NamespaceType::User
                },
                quota_bytes: row.get::<_, i64>("ns_quota") as u64,
            };
            out.push((repo, ns));
        }
        Ok(out)
    }

    async fn delete_repository(&self, id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client.execute("DELETE FROM repositories WHERE id = $1", &[&id]).await?;
        Ok(())
    }

    async fn upsert_blob(&self, digest: &str, size: u64, media_type: &str) -> Result<Blob> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO blobs (digest, size, media_type) VALUES ($1, $2, $3)
                 ON CONFLICT (digest) DO UPDATE SET digest = EXCLUDED.digest
                 RETURNING *",
                &[&digest, &(size as i64), &media_type],
            )
            .await?;
        Ok(blob_from_row(&row))
    }

    async fn get_blob(&self, digest: &str) -> Result<Option<Blob>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM blobs WHERE digest = $1", &[&digest])
            .await?;
        Ok(row.as_ref().map(blob_from_row))
    }

    async fn delete_blob(&self, digest: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client.execute("DELETE FROM blobs WHERE digest = $1", &[&digest]).await?;
        Ok(())
    }

    async fn list_orphaned_blob_digests(&self) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT digest FROM blobs b
                 WHERE NOT EXISTS (SELECT 1 FROM manifest_layers ml WHERE ml.blob_digest = b.digest)
                   AND NOT EXISTS (SELECT 1 FROM manifests m WHERE m.config_digest = b.digest)",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("digest")).collect())
    }

    async fn upsert_manifest(
        &self,
        repository_id: Uuid,
        digest: &str,
        config_digest: Option<&str>,
        media_type: &str,
        size: u64,
    ) -> Result<Manifest> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO manifests (id, repository_id, digest, config_digest, media_type, size)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (repository_id, digest) DO UPDATE SET digest = EXCLUDED.digest
                 RETURNING *",
                &[
                    &Uuid::new_v4(),
                    &repository_id,
                    &digest,
                    &config_digest,
                    &media_type,
                    &(size as i64),
                ],
            )
            .await?;
        Ok(manifest_from_row(&row))
    }

    async fn get_manifest(&self, id: Uuid) -> Result<Option<Manifest>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM manifests WHERE id = $1", &[&id])
            .await?;
        Ok(row.as_ref().map(manifest_from_row))
    }

    async fn get_manifest_by_digest(&self, repository_id: Uuid, digest: &str) -> Result<Option<Manifest>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM manifests WHERE repository_id = $1 AND digest = $2",
                &[&repository_id, &digest],
            )
            .await?;
        Ok(row.as_ref().map(manifest_from_row))
    }

    async fn delete_manifest(&self, id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client.execute("DELETE FROM manifests WHERE id = $1", &[&id]).await?;
        Ok(())
    }

    async fn increment_pull(&self, manifest_id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE manifests SET pull_count = pull_count + 1, last_pulled_at = now()
                 WHERE id = $1",
                &[&manifest_id],
            )
            .await?;
        Ok(())
    }

    async fn list_all_manifests(&self) -> Result<Vec<Manifest>> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT * FROM manifests", &[]).await?;
        Ok(rows.iter().map(manifest_from_row).collect())
    }

    async fn list_untagged_manifests(&self) -> Result<Vec<Manifest>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT m.* FROM manifests m
                 WHERE NOT EXISTS (SELECT 1 FROM tags t WHERE t.manifest_id = m.id)
                   AND NOT EXISTS (
                     SELECT 1 FROM image_dependencies d WHERE d.parent_manifest_id = m.id
                   )",
                &[],
            )
            .await?;
        Ok(rows.iter().map(manifest_from_row).collect())
    }

    async fn namespace_usage_bytes(&self, namespace_id: Uuid) -> Result<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COALESCE(SUM(b.size), 0) AS total FROM blobs b WHERE b.digest IN (
                   SELECT ml.blob_digest FROM manifest_layers ml
                   JOIN manifests m ON m.id = ml.manifest_id
                   JOIN repositories r ON r.id = m.repository_id
                   WHERE r.namespace_id = $1
                   UNION
                   SELECT m.config_digest FROM manifests m
                   JOIN repositories r ON r.id = m.repository_id
                   WHERE r.namespace_id = $1 AND m.config_digest IS NOT NULL
                 )",
                &[&namespace_id],
            )
            .await?;
        Ok(row.get::<_, i64>("total") as u64)
    }

    async fn update_manifest_health(&self, manifest_id: Uuid, health: HealthScore) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE manifests SET health_overall = $2, health_grade = $3, health_security = $4,
                    health_freshness = $5, health_efficiency = $6, health_maintenance = $7,
                    last_health_check = now()
                 WHERE id = $1",
                &[
                    &manifest_id,
                    &health.overall,
                    &health.grade,
                    &health.security,
                    &health.freshness,
                    &health.efficiency,
                    &health.maintenance,
                ],
            )
            .await?;
        Ok(())
    }

    async fn replace_manifest_layers(&self, manifest_id: Uuid, layers: &[(String, i32)]) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("DELETE FROM manifest_layers WHERE manifest_id = $1", &[&manifest_id])
            .await?;
        for (digest, position) in layers {
            tx.execute(
                "INSERT INTO manifest_layers (manifest_id, blob_digest, position) VALUES ($1, $2, $3)",
                &[&manifest_id, digest, position],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_manifest_layers(&self, manifest_id: Uuid) -> Result<Vec<ManifestLayer>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM manifest_layers WHERE manifest_id = $1 ORDER BY position",
                &[&manifest_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| ManifestLayer {
                manifest_id: r.get("manifest_id"),
                blob_digest: r.get("blob_digest"),
                position: r.get("position"),
            })
            .collect())
    }

    async fn upsert_tag(&self, repository_id: Uuid, name: &str, manifest_id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO tags (repository_id, name, manifest_id) VALUES ($1, $2, $3)
                 ON CONFLICT (repository_id, name)
                 DO UPDATE SET manifest_id = EXCLUDED.manifest_id, updated_at = now()",
                &[&repository_id, &name, &manifest_id],
            )
            .await?;
        Ok(())
    }

    async fn get_tag(&self, repository_id: Uuid, name: &str) -> Result<Option<Tag>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM tags WHERE repository_id = $1 AND name = $2",
                &[&repository_id, &name],
            )
            .await?;
        Ok(row.map(|r| Tag {
            repository_id: r.get("repository_id"),
            name: r.get("name"),
            manifest_id: r.get("manifest_id"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn list_tags(&self, repository_id: Uuid) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT name FROM tags WHERE repository_id = $1 ORDER BY name",
                &[&repository_id],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("name")).collect())
    }

    async fn delete_tag(&self, repository_id: Uuid, name: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM tags WHERE repository_id = $1 AND name = $2",
                &[&repository_id, &name],
            )
            .await?;
        Ok(())
    }

    async fn upsert_dependency(&self, manifest_id: Uuid, parent_manifest_id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO image_dependencies (manifest_id, parent_manifest_id) VALUES ($1, $2)
                 ON CONFLICT (manifest_id) DO UPDATE SET parent_manifest_id = EXCLUDED.parent_manifest_id",
                &[&manifest_id, &parent_manifest_id],
            )
            .await?;
        Ok(())
    }

    async fn is_referenced_as_parent(&self, manifest_id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM image_dependencies WHERE parent_manifest_id = $1) AS found",
                &[&manifest_id],
            )
            .await?;
        Ok(row.get("found"))
    }

    async fn dependency_graph(&self, repository_name: Option<&str>, principal: &Principal) -> Result<DependencyGraph> {
        let client = self.pool.get().await?;
        let owner_clause = if principal.is_admin() { "" } else { " AND r.owner_principal_id = $owner" };
        let rows = match repository_name {
            Some(full_name) => {
                let (ns, repo) = full_name.split_once('/').unwrap_or(("", full_name));
                let query = format!(
                    "SELECT m.id, r.name as repo_name, m.digest,
                            (SELECT name FROM tags t WHERE t.manifest_id = m.id LIMIT 1) as tag
                     FROM manifests m
                     JOIN repositories r ON r.id = m.repository_id
                     JOIN namespaces n ON n.id = r.namespace_id
                     WHERE n.name = $1 AND r.name = $2{}",
                    owner_clause.replace("$owner", "$3")
                );
                if principal.is_admin() {
                    client.query(&query, &[&ns, &repo]).await?
                } else {
                    client.query(&query, &[&ns, &repo, &principal.id]).await?
                }
            }
            None => {
                let query = format!(
                    "SELECT m.id, r.name as repo_name, m.digest,
                            (SELECT name FROM tags t WHERE t.manifest_id = m.id LIMIT 1) as tag
                     FROM manifests m JOIN repositories r ON r.id = m.repository_id{}",
                    if principal.is_admin() {
                        String::new()
                    } else {
                        " WHERE r.owner_principal_id = $1".to_string()
                    }
                );
                if principal.is_admin() {
                    client.query(&query, &[]).await?
                } else {
                    client.query(&query, &[&principal.id]).await?
                }
            }
        };
        let nodes: Vec<DependencyNode> = rows
            .iter()
            .map(|r| DependencyNode {
                manifest_id: r.get("id"),
                repository_name: r.get("repo_name"),
                tag: r.get("tag"),
                digest: r.get("digest"),
            })
            .collect();
        let node_ids: HashSet<Uuid> = nodes.iter().map(|n| n.manifest_id).collect();
        let dep_rows = client.query("SELECT * FROM image_dependencies", &[]).await?;
        let edges = dep_rows
            .iter()
            .filter_map(|r| {
                let manifest_id: Uuid = r.get("manifest_id");
                let parent_manifest_id: Uuid = r.get("parent_manifest_id");
                if node_ids.contains(&manifest_id) {
                    Some(DependencyEdge {
                        source: manifest_id,
                        target: parent_manifest_id,
                    })
                } else {
                    None
                }
            })
            .collect();
        Ok(DependencyGraph { nodes, edges })
    }

    async fn insert_scan_report(&self, report: VulnerabilityReport) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO vulnerability_reports
                   (id, manifest_id, scanner, scanned_at, status, critical_count, high_count, medium_count, low_count, report_body)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &report.id,
                    &report.manifest_id,
                    &report.scanner,
                    &report.scanned_at,
                    &scan_status_to_str(report.status),
                    &report.critical_count,
                    &report.high_count,
                    &report.medium_count,
                    &report.low_count,
                    &report.report_body,
                ],
            )
            .await?;
        Ok(())
    }

    async fn latest_scan_report(&self, manifest_id: Uuid) -> Result<Option<VulnerabilityReport>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM vulnerability_reports WHERE manifest_id = $1
                 ORDER BY scanned_at DESC LIMIT 1",
                &[&manifest_id],
            )
            .await?;
        Ok(row.as_ref().map(report_from_row))
    }

    async fn scan_history(&self, manifest_id: Uuid) -> Result<Vec<VulnerabilityReport>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM vulnerability_reports WHERE manifest_id = $1 ORDER BY scanned_at DESC",
                &[&manifest_id],
            )
            .await?;
        Ok(rows.iter().map(report_from_row).collect())
    }

    async fn upsert_vulnerability_intelligence(&self, intel: VulnerabilityIntelligence) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO vulnerability_intelligence
                   (cve_id, epss_score, epss_percentile, has_active_exploit, exploit_maturity, trending_score, last_updated)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (cve_id) DO UPDATE SET
                   epss_score = EXCLUDED.epss_score,
                   epss_percentile = EXCLUDED.epss_percentile,
                   has_active_exploit = EXCLUDED.has_active_exploit,
                   exploit_maturity = EXCLUDED.exploit_maturity,
                   trending_score = EXCLUDED.trending_score,
                   last_updated = EXCLUDED.last_updated",
                &[
                    &intel.cve_id,
                    &intel.epss_score,
                    &intel.epss_percentile,
                    &intel.has_active_exploit,
                    &intel.exploit_maturity,
                    &intel.trending_score,
                    &intel.last_updated,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_vulnerability_intelligence(&self, cve_id: &str) -> Result<Option<VulnerabilityIntelligence>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM vulnerability_intelligence WHERE cve_id = $1",
                &[&cve_id],
            )
            .await?;
        Ok(row.map(|r| VulnerabilityIntelligence {
            cve_id: r.get("cve_id"),
            epss_score: r.get("epss_score"),
            epss_percentile: r.get("epss_percentile"),
            has_active_exploit: r.get("has_active_exploit"),
            exploit_maturity: r.get("exploit_maturity"),
            trending_score: r.get("trending_score"),
            last_updated: r.get("last_updated"),
        }))
    }

    async fn distinct_cves_from_completed_reports(&self) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT DISTINCT jsonb_array_elements(report_body->'vulnerabilities')->>'cve_id' AS cve_id
                 FROM vulnerability_reports WHERE status = 'completed'",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get::<_, Option<String>>("cve_id"))
            .collect())
    }

    async fn replace_manifest_priorities(&self, manifest_id: Uuid, priorities: Vec<ManifestVulnPriority>) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute(
            "DELETE FROM manifest_vuln_priority WHERE manifest_id = $1",
            &[&manifest_id],
        )
        .await?;
        for p in &priorities {
            tx.execute(
                "INSERT INTO manifest_vuln_priority
                   (manifest_id, cve_id, base_severity, epss_score, runtime_exposed, priority_score, recommended_action)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &p.manifest_id,
                    &p.cve_id,
                    &p.base_severity,
                    &p.epss_score,
                    &p.runtime_exposed,
                    &p.priority_score,
                    &recommended_action_to_str(p.recommended_action),
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_prioritized(&self, limit: usize) -> Result<Vec<ManifestVulnPriority>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM manifest_vuln_priority ORDER BY priority_score DESC LIMIT $1",
                &[&(limit as i64)],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| {
                let action: String = r.get("recommended_action");
                ManifestVulnPriority {
                    manifest_id: r.get("manifest_id"),
                    cve_id: r.get("cve_id"),
                    base_severity: r.get("base_severity"),
                    epss_score: r.get("epss_score"),
                    runtime_exposed: r.get("runtime_exposed"),
                    priority_score: r.get("priority_score"),
                    recommended_action: match action.as_str() {
                        "urgent" => RecommendedAction::Urgent,
                        "high" => RecommendedAction::High,
                        "medium" => RecommendedAction::Medium,
                        "low" => RecommendedAction::Low,
                        _ => RecommendedAction::Monitor,
                    },
                }
            })
            .collect())
    }

    async fn upsert_storage_cost(&self, cost: StorageCost) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO storage_costs
                   (manifest_id, blob_size_bytes, storage_cost_usd, bandwidth_cost_usd, total_cost_usd,
                    pull_count_30d, last_pulled_at, cost_per_pull, calculated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (manifest_id) DO UPDATE SET
                   blob_size_bytes = EXCLUDED.blob_size_bytes,
                   storage_cost_usd = EXCLUDED.storage_cost_usd,
                   bandwidth_cost_usd = EXCLUDED.bandwidth_cost_usd,
                   total_cost_usd = EXCLUDED.total_cost_usd,
                   pull_count_30d = EXCLUDED.pull_count_30d,
                   last_pulled_at = EXCLUDED.last_pulled_at,
                   cost_per_pull = EXCLUDED.cost_per_pull,
                   calculated_at = EXCLUDED.calculated_at",
                &[
                    &cost.manifest_id,
                    &(cost.blob_size_bytes as i64),
                    &cost.storage_cost_usd,
                    &cost.bandwidth_cost_usd,
                    &cost.total_cost_usd,
                    &(cost.pull_count_30d as i64),
                    &cost.last_pulled_at,
                    &cost.cost_per_pull,
                    &cost.calculated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_costs_for_principal(&self, principal: &Principal) -> Result<Vec<StorageCost>> {
        let client = self.pool.get().await?;
        let rows = if principal.is_admin() {
            client
                .query(
                    "SELECT * FROM storage_costs ORDER BY total_cost_usd DESC LIMIT 10",
                    &[],
                )
                .await?
        } else {
            client
                .query(
                    "SELECT sc.* FROM storage_costs sc
                     JOIN manifests m ON m.id = sc.manifest_id
                     JOIN repositories r ON r.id = m.repository_id
                     WHERE r.owner_principal_id = $1
                     ORDER BY sc.total_cost_usd DESC LIMIT 10",
                    &[&principal.id],
                )
                .await?
        };
        Ok(rows
            .iter()
            .map(|r| StorageCost {
                manifest_id: r.get("manifest_id"),
                blob_size_bytes: r.get::<_, i64>("blob_size_bytes") as u64,
                storage_cost_usd: r.get("storage_cost_usd"),
                bandwidth_cost_usd: r.get("bandwidth_cost_usd"),
                total_cost_usd: r.get("total_cost_usd"),
                pull_count_30d: r.get::<_, i64>("pull_count_30d") as u64,
                last_pulled_at: r.get("last_pulled_at"),
                cost_per_pull: r.get("cost_per_pull"),
                calculated_at: r.get("calculated_at"),
            })
            .collect())
    }

    async fn upsert_zombie(&self, zombie: ZombieImage) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO zombie_images
                   (manifest_id, days_since_last_pull, storage_cost_usd, recommended_action, detected_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (manifest_id) DO UPDATE SET
                   days_since_last_pull = EXCLUDED.days_since_last_pull,
                   storage_cost_usd = EXCLUDED.storage_cost_usd,
                   recommended_action = EXCLUDED.recommended_action,
                   detected_at = EXCLUDED.detected_at",
                &[
                    &zombie.manifest_id,
                    &zombie.days_since_last_pull,
                    &zombie.storage_cost_usd,
                    &zombie_action_to_str(zombie.recommended_action),
                    &zombie.detected_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_zombies_for_principal(&self, principal: &Principal) -> Result<Vec<ZombieImage>> {
        let client = self.pool.get().await?;
        let rows = if principal.is_admin() {
            client.query("SELECT * FROM zombie_images", &[]).await?
        } else {
            client
                .query(
                    "SELECT z.* FROM zombie_images z
                     JOIN manifests m ON m.id = z.manifest_id
                     JOIN repositories r ON r.id = m.repository_id
                     WHERE r.owner_principal_id = $1",
                    &[&principal.id],
                )
                .await?
        };
        Ok(rows
            .iter()
            .map(|r| {
                let action: String = r.get("recommended_action");
                ZombieImage {
                    manifest_id: r.get("manifest_id"),
                    days_since_last_pull: r.get("days_since_last_pull"),
                    storage_cost_usd: r.get("storage_cost_usd"),
                    recommended_action: match action.as_str() {
                        "delete" => ZombieAction::Delete,
                        "archive" => ZombieAction::Archive,
                        "keep" => ZombieAction::Keep,
                        _ => ZombieAction::Monitor,
                    },
                    detected_at: r.get("detected_at"),
                }
            })
            .collect())
    }

    async fn insert_audit_event(&self, event: AuditEvent) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO audit_events (id, user_id, action, repository_id, details, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &event.id,
                    &event.user_id,
                    &event.action,
                    &event.repository_id,
                    &event.details,
                    &event.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn create_service_account(&self, account: ServiceAccount) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO service_accounts (id, name, description, key_hash, prefix, status, last_used_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &account.id,
                    &account.name,
                    &account.description,
                    &account.key_hash,
                    &account.prefix,
                    &"active",
                    &account.last_used_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_service_account_by_prefix(&self, prefix: &str) -> Result<Option<ServiceAccount>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM service_accounts WHERE prefix = $1", &[&prefix])
            .await?;
        Ok(row.map(|r| {
            let status: String = r.get("status");
            ServiceAccount {
                id: r.get("id"),
                name: r.get("name"),
                description: r.get("description"),
                key_hash: r.get("key_hash"),
                prefix: r.get("prefix"),
                status: if status == "revoked" {
                    ServiceAccountStatus::Revoked
                } else {
                    ServiceAccountStatus::Active
                },
                last_used_at: r.get("last_used_at"),
            }
        }))
    }

    async fn revoke_service_account(&self, id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE service_accounts SET status = 'revoked' WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(())
    }
}

