//! Scanner (spec component 5): invokes the external vulnerability scanner
//! against a pullable reference, parses its JSON report, and records status
//! transitions. The stuck-scanning demotion rule is applied at read time in
//! [`Scanner::get_scan_status`].

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use uuid::Uuid;

use crate::catalog::{Catalog, ScanStatus, VulnerabilityReport};
use crate::error::{RegistryError, Result};

pub const STUCK_SCANNING_THRESHOLD: ChronoDuration = ChronoDuration::minutes(5);

#[derive(Debug, Deserialize)]
struct RawVulnerability {
    #[serde(default)]
    cve_id: Option<String>,
    severity: String,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    vulnerabilities: Vec<RawVulnerability>,
}

#[derive(Debug, Clone, Default)]
pub struct SeverityCounts {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl SeverityCounts {
    fn bucket(&mut self, severity: &str) {
        match severity.to_uppercase().as_str() {
            "CRITICAL" => self.critical += 1,
            "HIGH" => self.high += 1,
            "MEDIUM" => self.medium += 1,
            "LOW" => self.low += 1,
            _ => {}
        }
    }
}

/// Builds the pullable reference the external scanner is invoked against.
pub fn pullable_reference(host: &str, repo: &str, reference: &str) -> String {
    if let Some(digest) = reference.strip_prefix("sha256:") {
        format!("{host}/{repo}@sha256:{digest}")
    } else {
        format!("{host}/{repo}:{reference}")
    }
}

pub struct Scanner {
    catalog: Arc<dyn Catalog>,
    registry_host: String,
    scanner_command: String,
}

impl Scanner {
    pub fn new(catalog: Arc<dyn Catalog>, registry_host: String, scanner_command: String) -> Self {
        Scanner {
            catalog,
            registry_host,
            scanner_command,
        }
    }

    /// Synchronous worker routine. Transitions `pending -> scanning ->
    /// (completed | failed)`. A fresh report row is inserted on entry;
    /// because the catalog's scan history is insert-only (see the registry's
    /// scan-status resolution), the final outcome is recorded as a second,
    /// newer row rather than an in-place update — reads always resolve to
    /// the most recent row by `scanned_at`.
    pub async fn scan_manifest(&self, manifest_id: Uuid, repo: &str, reference: &str) -> Result<()> {
        self.catalog
            .insert_scan_report(VulnerabilityReport {
                id: Uuid::new_v4(),
                manifest_id,
                scanner: self.scanner_command.clone(),
                scanned_at: Utc::now(),
                status: ScanStatus::Scanning,
                critical_count: 0,
                high_count: 0,
                medium_count: 0,
                low_count: 0,
                report_body: serde_json::json!({}),
            })
            .await?;

        let pullable = pullable_reference(&self.registry_host, repo, reference);
        let outcome = self.invoke_scanner(&pullable).await;

        let final_report = match outcome {
            Ok((counts, body)) => VulnerabilityReport {
                id: Uuid::new_v4(),
                manifest_id,
                scanner: self.scanner_command.clone(),
                scanned_at: Utc::now(),
                status: ScanStatus::Completed,
                critical_count: counts.critical,
                high_count: counts.high,
                medium_count: counts.medium,
                low_count: counts.low,
                report_body: body,
            },
            Err(e) => {
                tracing::warn!(error = %e, %manifest_id, "scan failed");
                VulnerabilityReport {
                    id: Uuid::new_v4(),
                    manifest_id,
                    scanner: self.scanner_command.clone(),
                    scanned_at: Utc::now(),
                    status: ScanStatus::Failed,
                    critical_count: 0,
                    high_count: 0,
                    medium_count: 0,
                    low_count: 0,
                    report_body: serde_json::json!({ "error": e.to_string() }),
                }
            }
        };
        self.catalog.insert_scan_report(final_report).await?;
        Ok(())
    }

    async fn invoke_scanner(&self, pullable: &str) -> Result<(SeverityCounts, serde_json::Value)> {
        let output = Command::new(&self.scanner_command)
            .arg(pullable)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RegistryError::Transient(format!("scanner invocation failed: {e}")))?;

        if !output.status.success() {
            return Err(RegistryError::Transient(format!(
                "scanner exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let body: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let raw: RawReport = serde_json::from_value(body.clone())?;
        let mut counts = SeverityCounts::default();
        for v in &raw.vulnerabilities {
            counts.bucket(&v.severity);
        }
        Ok((counts, body))
    }

    /// Current status, with the stuck-scanning demotion rule applied: a
    /// `scanning` row older than [`STUCK_SCANNING_THRESHOLD`] is surfaced as
    /// `failed` without mutating the catalog.
    pub async fn get_scan_status(&self, manifest_id: Uuid) -> Result<Option<(ScanStatus, Option<String>)>> {
        let latest = self.catalog.latest_scan_report(manifest_id).await?;
        Ok(latest.map(|report| {
            if report.status == ScanStatus::Scanning
                && Utc::now() - report.scanned_at > STUCK_SCANNING_THRESHOLD
            {
                (ScanStatus::Failed, Some("Scan timed out".to_string()))
            } else {
                (report.status, None)
            }
        }))
    }

    pub async fn get_scan_report(&self, manifest_id: Uuid) -> Result<Option<VulnerabilityReport>> {
        self.catalog.latest_scan_report(manifest_id).await
    }

    pub async fn get_scan_history(&self, manifest_id: Uuid) -> Result<Vec<VulnerabilityReport>> {
        self.catalog.scan_history(manifest_id).await
    }

    pub async fn get_vulnerability_summary(&self, manifest_id: Uuid) -> Result<SeverityCounts> {
        Ok(self
            .catalog
            .latest_scan_report(manifest_id)
            .await?
            .map(|r| SeverityCounts {
                critical: r.critical_count,
                high: r.high_count,
                medium: r.medium_count,
                low: r.low_count,
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pullable_reference_uses_digest_form() {
        assert_eq!(
            pullable_reference("registry.local:5000", "acme/app", "sha256:abcd"),
            "registry.local:5000/acme/app@sha256:abcd"
        );
    }

    #[test]
    fn pullable_reference_uses_tag_form() {
        assert_eq!(
            pullable_reference("registry.local:5000", "acme/app", "v1"),
            "registry.local:5000/acme/app:v1"
        );
    }

    #[test]
    fn severity_bucketing_is_case_insensitive() {
        let mut counts = SeverityCounts::default();
        counts.bucket("critical");
        counts.bucket("HIGH");
        counts.bucket("Medium");
        counts.bucket("low");
        counts.bucket("unknown");
        assert_eq!(counts.critical, 1);
        assert_eq!(counts.high, 1);
        assert_eq!(counts.medium, 1);
        assert_eq!(counts.low, 1);
    }

    #[tokio::test]
    async fn stuck_scanning_row_surfaces_as_failed() {
        use crate::catalog::memory::InMemoryCatalog;

        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let manifest_id = Uuid::new_v4();
        catalog
            .insert_scan_report(VulnerabilityReport {
                id: Uuid::new_v4(),
                manifest_id,
                scanner: "trivy".into(),
                scanned_at: Utc::now() - ChronoDuration::minutes(10),
                status: ScanStatus::Scanning,
                critical_count: 0,
                high_count: 0,
                medium_count: 0,
                low_count: 0,
                report_body: serde_json::json!({}),
            })
            .await
            .unwrap();

        let scanner = Scanner::new(catalog, "registry.local:5000".into(), "trivy".into());
        let (status, message) = scanner.get_scan_status(manifest_id).await.unwrap().unwrap();
        assert_eq!(status, ScanStatus::Failed);
        assert_eq!(message.as_deref(), Some("Scan timed out"));
    }

    #[tokio::test]
    async fn fresh_scanning_row_is_not_demoted() {
        use crate::catalog::memory::InMemoryCatalog;

        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let manifest_id = Uuid::new_v4();
        catalog
            .insert_scan_report(VulnerabilityReport {
                id: Uuid::new_v4(),
                manifest_id,
                scanner: "trivy".into(),
                scanned_at: Utc::now(),
                status: ScanStatus::Scanning,
                critical_count: 0,
                high_count: 0,
                medium_count: 0,
                low_count: 0,
                report_body: serde_json::json!({}),
            })
            .await
            .unwrap();

        let scanner = Scanner::new(catalog, "registry.local:5000".into(), "trivy".into());
        let (status, _) = scanner.get_scan_status(manifest_id).await.unwrap().unwrap();
        assert_eq!(status, ScanStatus::Scanning);
    }
}
