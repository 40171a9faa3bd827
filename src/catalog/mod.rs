//! Catalog Store (spec component 2): strongly-typed, transactional
//! persistence for namespaces, repositories, manifests, tags, blobs, layers,
//! dependencies, audit, quotas, costs, scans, and health.
//!
//! Grounded on the `MetadataStore` trait and its `postgres` submodule in the
//! crate this registry is adapted from; the table shapes here are the
//! registry's own (§3), not the package-registry's.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024 * 1024; // 5 GiB
pub const RESERVED_NAMESPACE: &str = "library";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    User,
    Organization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: Uuid,
    pub name: String,
    pub owner_principal_id: Option<Uuid>,
    pub kind: NamespaceType,
    pub quota_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub namespace_id: Uuid,
    pub name: String,
    pub owner_principal_id: Uuid,
}

impl Repository {
    /// The full `<namespace>/<repo>` name, given its owning namespace.
    pub fn full_name(&self, namespace: &Namespace) -> String {
        format!("{}/{}", namespace.name, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub digest: String,
    pub size: u64,
    pub media_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthGrade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthScore {
    pub overall: i32,
    pub grade: Option<String>,
    pub security: i32,
    pub freshness: i32,
    pub efficiency: i32,
    pub maintenance: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub digest: String,
    pub config_digest: Option<String>,
    pub media_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub pull_count: u64,
    pub last_pulled_at: Option<DateTime<Utc>>,
    pub health: HealthScore,
    pub last_health_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub repository_id: Uuid,
    pub name: String,
    pub manifest_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestLayer {
    pub manifest_id: Uuid,
    pub blob_digest: String,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDependency {
    pub manifest_id: Uuid,
    pub parent_manifest_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Scanning,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityReport {
    pub id: Uuid,
    pub manifest_id: Uuid,
    pub scanner: String,
    pub scanned_at: DateTime<Utc>,
    pub status: ScanStatus,
    pub critical_count: i64,
    pub high_count: i64,
    pub medium_count: i64,
    pub low_count: i64,
    pub report_body: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityIntelligence {
    pub cve_id: String,
    pub epss_score: f64,
    pub epss_percentile: f64,
    pub has_active_exploit: bool,
    pub exploit_maturity: Option<String>,
    pub trending_score: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Urgent,
    High,
    Medium,
    Low,
    Monitor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestVulnPriority {
    pub manifest_id: Uuid,
    pub cve_id: String,
    pub base_severity: String,
    pub epss_score: f64,
    pub runtime_exposed: bool,
    pub priority_score: i32,
    pub recommended_action: RecommendedAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageCost {
    pub manifest_id: Uuid,
    pub blob_size_bytes: u64,
    pub storage_cost_usd: f64,
    pub bandwidth_cost_usd: f64,
    pub total_cost_usd: f64,
    pub pull_count_30d: u64,
    pub last_pulled_at: Option<DateTime<Utc>>,
    pub cost_per_pull: f64,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZombieAction {
    Delete,
    Archive,
    Monitor,
    Keep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZombieImage {
    pub manifest_id: Uuid,
    pub days_since_last_pull: i64,
    pub storage_cost_usd: f64,
    pub recommended_action: ZombieAction,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub repository_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAccountStatus {
    Active,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub key_hash: String,
    pub prefix: String,
    pub status: ServiceAccountStatus,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub login_at: DateTime<Utc>,
}

/// A manifest together with the repository/namespace it resolved through,
/// for read paths that need the full name.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub manifest: Manifest,
    pub repository: Repository,
    pub namespace: Namespace,
}

/// Row used to answer dependency-graph queries (§6 `GET /api/v1/dependencies`).
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub manifest_id: Uuid,
    pub repository_name: String,
    pub tag: Option<String>,
    pub digest: String,
}

#[derive(Debug, Clone)]
pub struct DependencyEdge {
    pub source: Uuid,
    pub target: Uuid,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub nodes: Vec<DependencyNode>,
    pub edges: Vec<DependencyEdge>,
}

/// The full persistence surface consumed by the registry engine and its
/// collaborators. Every multi-row mutation named in §4.2 must be atomic
/// with respect to concurrent readers; implementations backed by a real
/// transactional store (see `postgres`) wrap these in a single transaction.
#[async_trait]
pub trait Catalog: Send + Sync {
    // Namespaces
    async fn get_or_create_namespace(
        &self,
        name: &str,
        owner_principal_id: Option<Uuid>,
        kind: NamespaceType,
    ) -> Result<Namespace>;
    async fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>>;
    async fn get_namespace(&self, id: Uuid) -> Result<Option<Namespace>>;
    async fn set_namespace_quota(&self, id: Uuid, quota_bytes: u64) -> Result<()>;

    // Repositories
    async fn get_or_create_repository(
        &self,
        namespace_id: Uuid,
        name: &str,
        owner_principal_id: Uuid,
    ) -> Result<Repository>;
    async fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<(Repository, Namespace)>>;
    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>>;
    async fn list_repositories_for_principal(&self, principal: &Principal) -> Result<Vec<(Repository, Namespace)>>;
    async fn delete_repository(&self, id: Uuid) -> Result<()>;

    // Blobs
    async fn upsert_blob(&self, digest: &str, size: u64, media_type: &str) -> Result<Blob>;
    async fn get_blob(&self, digest: &str) -> Result<Option<Blob>>;
    async fn delete_blob(&self, digest: &str) -> Result<()>;
    async fn list_orphaned_blob_digests(&self) -> Result<Vec<String>>;

    // Manifests
    #[allow(clippy::too_many_arguments)]
    async fn upsert_manifest(
        &self,
        repository_id: Uuid,
        digest: &str,
        config_digest: Option<&str>,
        media_type: &str,
        size: u64,
    ) -> Result<Manifest>;
    async fn get_manifest(&self, id: Uuid) -> Result<Option<Manifest>>;
    async fn get_manifest_by_digest(&self, repository_id: Uuid, digest: &str) -> Result<Option<Manifest>>;
    async fn delete_manifest(&self, id: Uuid) -> Result<()>;
    async fn increment_pull(&self, manifest_id: Uuid) -> Result<()>;
    async fn list_all_manifests(&self) -> Result<Vec<Manifest>>;
    async fn list_untagged_manifests(&self) -> Result<Vec<Manifest>>;
    async fn namespace_usage_bytes(&self, namespace_id: Uuid) -> Result<u64>;
    async fn update_manifest_health(&self, manifest_id: Uuid, health: HealthScore) -> Result<()>;

    // Layers
    async fn replace_manifest_layers(&self, manifest_id: Uuid, layers: &[(String, i32)]) -> Result<()>;
    async fn get_manifest_layers(&self, manifest_id: Uuid) -> Result<Vec<ManifestLayer>>;

    // Tags
    async fn upsert_tag(&self, repository_id: Uuid, name: &str, manifest_id: Uuid) -> Result<()>;
    async fn get_tag(&self, repository_id: Uuid, name: &str) -> Result<Option<Tag>>;
    async fn list_tags(&self, repository_id: Uuid) -> Result<Vec<String>>;
    async fn delete_tag(&self, repository_id: Uuid, name: &str) -> Result<()>;

    // Dependencies
    async fn upsert_dependency(&self, manifest_id: Uuid, parent_manifest_id: Uuid) -> Result<()>;
    async fn is_referenced_as_parent(&self, manifest_id: Uuid) -> Result<bool>;
    /// Scoped to `principal`'s own repositories unless it's an admin (spec §4.13).
    async fn dependency_graph(&self, repository_name: Option<&str>, principal: &Principal) -> Result<DependencyGraph>;

    // Vulnerability scanning
    async fn insert_scan_report(&self, report: VulnerabilityReport) -> Result<()>;
    async fn latest_scan_report(&self, manifest_id: Uuid) -> Result<Option<VulnerabilityReport>>;
    async fn scan_history(&self, manifest_id: Uuid) -> Result<Vec<VulnerabilityReport>>;

    // Intelligence
    async fn upsert_vulnerability_intelligence(&self, intel: VulnerabilityIntelligence) -> Result<()>;
    async fn get_vulnerability_intelligence(&self, cve_id: &str) -> Result<Option<VulnerabilityIntelligence>>;
    async fn distinct_cves_from_completed_reports(&self) -> Result<Vec<String>>;
    async fn replace_manifest_priorities(&self, manifest_id: Uuid, priorities: Vec<ManifestVulnPriority>) -> Result<()>;
    async fn list_prioritized(&self, limit: usize) -> Result<Vec<ManifestVulnPriority>>;

    // Cost
    async fn upsert_storage_cost(&self, cost: StorageCost) -> Result<()>;
    async fn list_costs_for_principal(&self, principal: &Principal) -> Result<Vec<StorageCost>>;
    async fn upsert_zombie(&self, zombie: ZombieImage) -> Result<()>;
    async fn list_zombies_for_principal(&self, principal: &Principal) -> Result<Vec<ZombieImage>>;

    // Audit
    async fn insert_audit_event(&self, event: AuditEvent) -> Result<()>;

    // Service accounts
    async fn create_service_account(&self, account: ServiceAccount) -> Result<()>;
    async fn get_service_account_by_prefix(&self, prefix: &str) -> Result<Option<ServiceAccount>>;
    async fn revoke_service_account(&self, id: Uuid) -> Result<()>;
}

#[cfg(test)]
pub(crate) fn new_uuid() -> Uuid {
    Uuid::new_v4()
}
