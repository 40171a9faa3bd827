//! Intelligence (spec component 6): bulk EPSS refresh and per-manifest
//! vulnerability prioritization.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::{Catalog, ManifestVulnPriority, RecommendedAction, VulnerabilityIntelligence};
use crate::error::Result;

const EPSS_BATCH_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct EpssApiResponse {
    data: Vec<EpssApiRow>,
}

#[derive(Debug, Deserialize)]
struct EpssApiRow {
    cve: String,
    epss: String,
    percentile: String,
}

pub struct Intelligence {
    catalog: Arc<dyn Catalog>,
    http: reqwest::Client,
    epss_api_base: String,
}

impl Intelligence {
    pub fn new(catalog: Arc<dyn Catalog>, epss_api_base: impl Into<String>) -> Self {
        Intelligence {
            catalog,
            http: reqwest::Client::new(),
            epss_api_base: epss_api_base.into(),
        }
    }

    /// Collects the distinct CVE set from all completed reports and
    /// refreshes their EPSS scores in batches of up to 50.
    pub async fn refresh_epss_data(&self) -> Result<usize> {
        let cves = self.catalog.distinct_cves_from_completed_reports().await?;
        let mut refreshed = 0;
        for batch in cves.chunks(EPSS_BATCH_SIZE) {
            let rows = self.fetch_epss_batch(batch).await?;
            for row in rows {
                let epss_score: f64 = row.epss.parse().unwrap_or(0.0);
                let epss_percentile: f64 = row.percentile.parse().unwrap_or(0.0);
                self.catalog
                    .upsert_vulnerability_intelligence(VulnerabilityIntelligence {
                        cve_id: row.cve,
                        epss_score,
                        epss_percentile,
                        has_active_exploit: epss_score > 0.5,
                        exploit_maturity: None,
                        trending_score: 0.0,
                        last_updated: Utc::now(),
                    })
                    .await?;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    async fn fetch_epss_batch(&self, cves: &[String]) -> Result<Vec<EpssApiRow>> {
        if cves.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}?cve={}", self.epss_api_base, cves.join(","));
        let response = self
            .http
            .get(&url)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?;
        let parsed: EpssApiResponse = response.json().await?;
        Ok(parsed.data)
    }

    /// Computes and replaces (in full) the priority rows for `manifest_id`,
    /// given the vulnerabilities of its latest completed scan report.
    pub async fn calculate_manifest_priorities(&self, manifest_id: Uuid) -> Result<Vec<ManifestVulnPriority>> {
        let report = match self.catalog.latest_scan_report(manifest_id).await? {
            Some(r) if r.status == crate::catalog::ScanStatus::Completed => r,
            _ => {
                self.catalog.replace_manifest_priorities(manifest_id, Vec::new()).await?;
                return Ok(Vec::new());
            }
        };

        let vulns = report
            .report_body
            .get("vulnerabilities")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut priorities = Vec::with_capacity(vulns.len());
        for vuln in &vulns {
            let cve_id = vuln
                .get("cve_id")
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string();
            let severity = vuln
                .get("severity")
                .and_then(|v| v.as_str())
                .unwrap_or("LOW")
                .to_uppercase();
            let intel = self.catalog.get_vulnerability_intelligence(&cve_id).await?;
            let epss = intel.as_ref().map(|i| i.epss_score).unwrap_or(0.0);
            let runtime_exposed = false; // currently always false, per spec §4.6
            let score = priority_score(&severity, epss, runtime_exposed);
            priorities.push(ManifestVulnPriority {
                manifest_id,
                cve_id,
                base_severity: severity,
                epss_score: epss,
                runtime_exposed,
                priority_score: score,
                recommended_action: recommended_action(score),
            });
        }
        self.catalog
            .replace_manifest_priorities(manifest_id, priorities.clone())
            .await?;
        Ok(priorities)
    }

    pub async fn list_prioritized(&self, limit: usize) -> Result<Vec<ManifestVulnPriority>> {
        self.catalog.list_prioritized(limit).await
    }

    pub async fn get_intelligence(&self, cve_id: &str) -> Result<Option<VulnerabilityIntelligence>> {
        self.catalog.get_vulnerability_intelligence(cve_id).await
    }
}

fn severity_weight(severity: &str) -> f64 {
    match severity {
        "CRITICAL" => 30.0,
        "HIGH" => 22.0,
        "MEDIUM" => 15.0,
        "LOW" => 7.0,
        _ => 0.0,
    }
}

fn exploit_bonus(epss: f64) -> f64 {
    if epss > 0.5 {
        20.0
    } else if epss > 0.2 {
        10.0
    } else {
        0.0
    }
}

/// `score = severity_weight + 40*epss + exploit_bonus + runtime_bonus`,
/// capped at 100.
pub fn priority_score(severity: &str, epss: f64, runtime_exposed: bool) -> i32 {
    let runtime_bonus = if runtime_exposed { 10.0 } else { 0.0 };
    let score = severity_weight(severity) + 40.0 * epss + exploit_bonus(epss) + runtime_bonus;
    score.min(100.0).round() as i32
}

pub fn recommended_action(score: i32) -> RecommendedAction {
    if score >= 80 {
        RecommendedAction::Urgent
    } else if score >= 60 {
        RecommendedAction::High
    } else if score >= 40 {
        RecommendedAction::Medium
    } else if score >= 20 {
        RecommendedAction::Low
    } else {
        RecommendedAction::Monitor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_score_caps_at_100() {
        let score = priority_score("CRITICAL", 1.0, true);
        assert_eq!(score, 100);
    }

    #[test]
    fn priority_score_low_severity_no_exploit() {
        let score = priority_score("LOW", 0.0, false);
        assert_eq!(score, 7);
    }

    #[test]
    fn recommended_action_buckets() {
        assert_eq!(recommended_action(85), RecommendedAction::Urgent);
        assert_eq!(recommended_action(65), RecommendedAction::High);
        assert_eq!(recommended_action(45), RecommendedAction::Medium);
        assert_eq!(recommended_action(25), RecommendedAction::Low);
        assert_eq!(recommended_action(5), RecommendedAction::Monitor);
    }

    #[tokio::test]
    async fn priorities_are_replaced_in_full_for_non_completed_scan() {
        use crate::catalog::memory::InMemoryCatalog;
        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let intelligence = Intelligence::new(catalog, "https://epss.example/scores");
        let manifest_id = Uuid::new_v4();
        let priorities = intelligence.calculate_manifest_priorities(manifest_id).await.unwrap();
        assert!(priorities.is_empty());
    }
}
